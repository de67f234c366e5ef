//! Coordinate mapping between content, viewport and device-pixel space.
//!
//! * content space: relative to the surface's full content, stable under scrolling
//! * viewport space: relative to the captured viewport raster, in CSS pixels
//!   (`origin + content - scroll`)
//! * device space: viewport space times the device pixel ratio, integral
//!
//! Everything that turns a selection or a page into crop windows and tile
//! offsets lives here so it can be tested without a host.

use crate::geometry::{DeviceRect, Point, Rect, ScrollMetrics};
use crate::{Error, Result};
use log::warn;
use serde::Serialize;

/// Offsets up to this many CSS pixels are treated as scroll rounding noise.
pub const ROUNDING_TOLERANCE: f64 = 1.0;

const EPSILON: f64 = 1e-6;

/// Something the mapper had to correct while producing the image.
///
/// Small sub-pixel corrections are not reported; these are the ones that may
/// point at a geometry or selection bug on the caller's side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// The selection extended past the surface content and was clipped.
    SelectionOutOfBounds { requested: Rect, clipped: Rect },
    /// A crop window fell outside its raster tile by more than rounding noise.
    CropClamped { tile: usize, overshoot_px: u32 },
}

pub fn content_to_viewport(p: Point, m: &ScrollMetrics) -> Point {
    Point::new(m.origin.x + (p.x - m.scroll.x), m.origin.y + (p.y - m.scroll.y))
}

pub fn viewport_to_content(p: Point, m: &ScrollMetrics) -> Point {
    Point::new(p.x - m.origin.x + m.scroll.x, p.y - m.origin.y + m.scroll.y)
}

pub fn rect_to_viewport(r: &Rect, m: &ScrollMetrics) -> Rect {
    let p = content_to_viewport(Point::new(r.x, r.y), m);
    Rect::new(p.x, p.y, r.width, r.height)
}

/// Round a CSS length to device pixels.
pub fn to_device(v: f64, dpr: f64) -> i64 {
    (v * dpr).round() as i64
}

fn floor_device(v: f64, dpr: f64) -> u32 {
    (v * dpr + EPSILON).floor().max(0.0) as u32
}

fn ceil_device(v: f64, dpr: f64) -> u32 {
    (v * dpr - EPSILON).ceil().max(0.0) as u32
}

/// A crop window in device pixels that may still lie partly outside its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCrop {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl RawCrop {
    /// Device-pixel version of a viewport-space rectangle.
    pub fn from_viewport(r: &Rect, dpr: f64) -> Self {
        Self {
            x: to_device(r.x, dpr),
            y: to_device(r.y, dpr),
            width: to_device(r.width, dpr),
            height: to_device(r.height, dpr),
        }
    }
}

/// A crop window clamped into its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub rect: DeviceRect,
    /// Largest distance, in device pixels, any edge had to move
    pub overshoot: u32,
}

/// Clamp `raw` into `[0, 0, tile_w, tile_h]`.
///
/// Negative origins move to zero, edges past the tile shrink to fit, and the
/// result is never smaller than 1x1.
pub fn clamp_crop(raw: RawCrop, tile_w: u32, tile_h: u32) -> CropWindow {
    let tw = i64::from(tile_w.max(1));
    let th = i64::from(tile_h.max(1));

    let x0 = raw.x;
    let y0 = raw.y;
    let x1 = raw.x + raw.width.max(1);
    let y1 = raw.y + raw.height.max(1);

    let overshoot = [-x0, -y0, x1 - tw, y1 - th].into_iter().max().unwrap_or(0).max(0);

    let cx0 = x0.clamp(0, tw - 1);
    let cy0 = y0.clamp(0, th - 1);
    let cx1 = x1.clamp(cx0 + 1, tw);
    let cy1 = y1.clamp(cy0 + 1, th);

    CropWindow {
        rect: DeviceRect::new(cx0 as u32, cy0 as u32, (cx1 - cx0) as u32, (cy1 - cy0) as u32),
        overshoot: overshoot as u32,
    }
}

/// Clamp a crop for tile `tile`, reporting overshoots beyond rounding noise.
pub fn clamp_crop_reporting(
    raw: RawCrop,
    tile_w: u32,
    tile_h: u32,
    dpr: f64,
    tile: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> DeviceRect {
    let win = clamp_crop(raw, tile_w, tile_h);
    if f64::from(win.overshoot) > ROUNDING_TOLERANCE * dpr {
        warn!("crop for tile {} overshot its raster by {}px; clamped", tile, win.overshoot);
        diagnostics.push(Diagnostic::CropClamped { tile, overshoot_px: win.overshoot });
    }
    win.rect
}

/// One scroll-and-capture step of a multi-tile capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileStep {
    pub index: usize,
    /// Scroll offset to request (content space); the host may clamp it
    pub scroll_y: f64,
    /// Content-space offset of this step from the start of the captured range
    pub captured: f64,
    /// Content-space height this step contributes
    pub height: f64,
    /// Row of the output image where this tile starts
    pub device_y: u32,
    /// Rows this tile contributes to the output image
    pub device_height: u32,
    pub is_last: bool,
}

/// Sequence of steps plus the output surface size, in device pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub steps: Vec<TileStep>,
    pub device_width: u32,
    pub device_height: u32,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build steps covering `[0, total)` in slices of `step`, using `boundary`
/// to place each slice on the output's device rows.
fn build_steps(total: f64, step: f64, device_total: u32, boundary: impl Fn(f64) -> u32, scroll_for: impl Fn(f64) -> f64) -> Vec<TileStep> {
    let count = ((total / step) - EPSILON).ceil().max(1.0) as usize;
    let mut steps: Vec<TileStep> = Vec::with_capacity(count);
    for i in 0..count {
        let captured = i as f64 * step;
        let device_y = boundary(captured);
        // a trailing sliver thinner than a device row adds nothing
        if i > 0 && device_y >= device_total {
            break;
        }
        steps.push(TileStep {
            index: i,
            scroll_y: scroll_for(captured),
            captured,
            height: step.min(total - captured),
            device_y,
            device_height: 0,
            is_last: false,
        });
    }
    let n = steps.len();
    for i in 0..n {
        let end = if i + 1 < n { steps[i + 1].device_y } else { device_total };
        steps[i].device_height = end - steps[i].device_y;
        steps[i].is_last = i + 1 == n;
    }
    if let Some(last) = steps.last_mut() {
        last.height = total - last.captured;
    }
    steps
}

/// Plan a full-page capture of the surface described by `m`.
///
/// `ceil(content / viewport)` steps; step `i` scrolls to `i * viewport`
/// (clamped to the maximum scroll). Device heights sum to exactly
/// `ceil(content * dpr)`.
pub fn full_page_plan(m: &ScrollMetrics) -> TilePlan {
    let dpr = m.dpr;
    let device_height = ceil_device(m.content.height, dpr).max(1);
    let max_y = m.max_scroll().y;
    let steps = build_steps(
        m.content.height,
        m.viewport.height,
        device_height,
        |captured| floor_device(captured, dpr),
        |captured| captured.min(max_y),
    );
    TilePlan {
        steps,
        device_width: (to_device(m.viewport.width, dpr).max(1)) as u32,
        device_height,
    }
}

/// The surface's visible box in viewport space, i.e. what one full-page
/// tile is cropped to.
pub fn surface_box(m: &ScrollMetrics) -> Rect {
    Rect::new(m.origin.x, m.origin.y, m.viewport.width, m.viewport.height)
}

/// Plan a selection capture in slices of the surface's viewport height.
///
/// Step `i` scrolls so that `selection.y + i * step_height` sits at the top of
/// the surface. Device heights sum to exactly `round(selection.height * dpr)`.
/// The output is never wider than the surface's client width, since no tile
/// can show more columns than that.
pub fn selection_plan(sel: &Rect, m: &ScrollMetrics) -> TilePlan {
    let dpr = m.dpr;
    let device_height = to_device(sel.height, dpr).max(1) as u32;
    let top = sel.y;
    let steps = build_steps(
        sel.height,
        m.viewport.height,
        device_height,
        |captured| to_device(captured, dpr).max(0) as u32,
        |captured| top + captured,
    );
    TilePlan {
        steps,
        device_width: to_device(sel.width.min(m.viewport.width), dpr).max(1) as u32,
        device_height,
    }
}

/// Crop window, in viewport space, for the slice of `sel` starting
/// `captured` pixels below its top, given the surface's actual metrics
/// after scrolling.
///
/// Width is limited to the surface's scrollbar-excluded client width.
pub fn selection_crop(sel: &Rect, captured: f64, step_height: f64, m: &ScrollMetrics) -> Rect {
    let x = m.origin.x + (sel.x - m.scroll.x);
    let y = m.origin.y + (sel.y + captured - m.scroll.y);
    let width = sel.width.min(m.viewport.width);
    let height = step_height.min(sel.height - captured);
    Rect::new(x, y, width, height)
}

/// Device crop for a selection slice whose output rows are fixed by `step`.
///
/// The window keeps the plan's device size so tile heights always sum to
/// the output height; only the origin comes from the live metrics.
pub fn selection_device_crop(sel: &Rect, step: &TileStep, plan: &TilePlan, m: &ScrollMetrics) -> RawCrop {
    let r = selection_crop(sel, step.captured, step.height, m);
    let max_width = to_device(m.viewport.width, m.dpr);
    RawCrop {
        x: to_device(r.x, m.dpr),
        y: to_device(r.y, m.dpr),
        width: i64::from(plan.device_width).min(max_width),
        height: i64::from(step.device_height),
    }
}

/// Clip a selection to the surface content, reporting real overshoots.
pub fn clip_selection(sel: &Rect, m: &ScrollMetrics, diagnostics: &mut Vec<Diagnostic>) -> Result<Rect> {
    let content = Rect::new(0.0, 0.0, m.content.width, m.content.height);
    let clipped = sel.intersect(&content).ok_or_else(|| {
        warn!("selection {:?} does not overlap content {:?}", sel, content);
        Error::SelectionOutOfBounds {
            x: sel.x,
            y: sel.y,
            content_width: m.content.width,
            content_height: m.content.height,
        }
    })?;

    let drift = (clipped.x - sel.x)
        .abs()
        .max((clipped.y - sel.y).abs())
        .max((clipped.right() - sel.right()).abs())
        .max((clipped.bottom() - sel.bottom()).abs());
    if drift > ROUNDING_TOLERANCE {
        warn!("selection {:?} extends outside content {:?}; clipped", sel, content);
        diagnostics.push(Diagnostic::SelectionOutOfBounds { requested: *sel, clipped });
    }
    Ok(clipped)
}
