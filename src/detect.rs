//! Scrollable-container detection.
//!
//! Single-page apps often keep the document body still and scroll an inner
//! element instead. Detection decides which surface a capture should drive.

use crate::geometry::{Point, Rect};
use crate::host::{ContainerCandidate, DetectionProbe, Host, ScrollSurface};
use crate::surface::bounded;
use crate::{Error, Result};
use log::debug;

/// A structural match must scroll by more than this to count (absorbs rounding).
pub const STRUCTURAL_MIN_SCROLL: f64 = 10.0;
/// Scored candidates must cover more than this share of the viewport.
pub const SCORED_MIN_VISIBLE_RATIO: f64 = 0.3;
/// Scored candidates must scroll by more than this.
pub const SCORED_MIN_SCROLL: f64 = 100.0;

fn visible_area(c: &ContainerCandidate, viewport: &Rect) -> f64 {
    c.bounds.intersect(viewport).map(|r| r.width * r.height).unwrap_or(0.0)
}

fn covers(c: &ContainerCandidate, point: Option<Point>) -> bool {
    point.map_or(true, |p| c.bounds.contains(p))
}

/// Pick the scroll container for an interaction at `point` (viewport space).
///
/// Structural matches are tried in the host's priority order and the first
/// qualifying one wins. Otherwise the block candidate with the best
/// `scrollable height * visible share` score is taken. `None` means the
/// document itself is the surface.
pub fn detect(probe: &DetectionProbe, point: Option<Point>) -> Option<ScrollSurface> {
    let viewport = Rect::new(0.0, 0.0, probe.viewport.width, probe.viewport.height);
    let viewport_area = probe.viewport.area();

    if let Some(hit) = probe.structural.iter().find(|c| {
        c.overflow_y.scrolls() && c.scrollable_height() > STRUCTURAL_MIN_SCROLL && covers(c, point)
    }) {
        debug!("structural scroll container {:?}", hit.element);
        return Some(ScrollSurface::Container(hit.element.clone()));
    }

    if viewport_area <= 0.0 {
        return None;
    }

    let mut best: Option<(&ContainerCandidate, f64)> = None;
    for c in &probe.blocks {
        if !c.overflow_y.scrolls() || !covers(c, point) {
            continue;
        }
        let ratio = visible_area(c, &viewport) / viewport_area;
        let scrollable = c.scrollable_height();
        if ratio <= SCORED_MIN_VISIBLE_RATIO || scrollable <= SCORED_MIN_SCROLL {
            continue;
        }
        let score = scrollable * ratio;
        // strict comparison keeps the earliest candidate on ties
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((c, score));
        }
    }

    best.map(|(c, score)| {
        debug!("scored scroll container {:?} (score {:.1})", c.element, score);
        ScrollSurface::Container(c.element.clone())
    })
}

/// Detection result held for the lifetime of one user interaction.
///
/// Content of single-page apps changes between interactions, so a new
/// `Interaction` must be started for each one.
#[derive(Debug, Clone, Default)]
pub struct Interaction {
    point: Option<Point>,
    surface: Option<ScrollSurface>,
}

impl Interaction {
    pub fn new(point: Option<Point>) -> Self {
        Self { point, surface: None }
    }

    /// An interaction whose surface is already known (e.g. a caller hint).
    pub fn with_surface(surface: ScrollSurface) -> Self {
        Self { point: None, surface: Some(surface) }
    }

    pub fn point(&self) -> Option<Point> {
        self.point
    }

    /// Detected surface, running detection on first use only.
    pub async fn surface<H: Host>(&mut self, host: &H, timeout_ms: u64) -> Result<ScrollSurface> {
        if let Some(s) = &self.surface {
            return Ok(s.clone());
        }
        let probe = bounded(timeout_ms, host.probe_containers(), Error::Unmeasurable).await?;
        let surface = detect(&probe, self.point).unwrap_or_default();
        self.surface = Some(surface.clone());
        Ok(surface)
    }
}
