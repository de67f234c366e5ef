//! Geometry primitives and the layout metric reduction.
//!
//! Coordinates are CSS pixels unless a type says otherwise. `DeviceRect` is
//! the only device-pixel type; it is what raster tiles are cropped with.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// A rectangle in CSS pixels.
///
/// A user selection is a `Rect` in the content space of its scroll surface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Intersection with `other`, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if r <= x || b <= y {
            return None;
        }
        Some(Rect::new(x, y, r - x, b - y))
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Integer rectangle in device pixels, always inside some raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DeviceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Raw layout numbers reported by the host for one scroll surface.
///
/// Rendering engines disagree about which of these reflects the real content
/// size, so the host reports all of them and [`ScrollMetrics::from_probe`]
/// reduces them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutProbe {
    /// `scrollWidth` / `scrollHeight`
    pub scroll_size: Size,
    /// `offsetWidth` / `offsetHeight`
    pub offset_size: Size,
    /// Visible box excluding scrollbars (`clientWidth` / `clientHeight`,
    /// or the window's inner size for the top-level document)
    pub client_size: Size,
    /// Current scroll offset of the surface
    pub scroll_offset: Point,
    /// Where the visible box sits inside the outer viewport (zero for the window)
    pub origin: Point,
    pub device_pixel_ratio: f64,
}

/// Geometry of one scroll surface, read fresh for each capture operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub content: Size,
    pub viewport: Size,
    pub scroll: Point,
    /// Offset of the surface's visible box within the captured viewport
    pub origin: Point,
    pub dpr: f64,
}

impl ScrollMetrics {
    /// Reduce a raw probe to metrics, taking the largest reported content
    /// extent in each axis.
    pub fn from_probe(probe: &LayoutProbe) -> Result<Self> {
        let p = probe;
        let numbers = [
            p.scroll_size.width,
            p.scroll_size.height,
            p.offset_size.width,
            p.offset_size.height,
            p.client_size.width,
            p.client_size.height,
            p.scroll_offset.x,
            p.scroll_offset.y,
            p.origin.x,
            p.origin.y,
            p.device_pixel_ratio,
        ];
        if numbers.iter().any(|n| !n.is_finite()) {
            return Err(Error::Unmeasurable("host reported non-finite layout metrics".into()));
        }
        if p.device_pixel_ratio <= 0.0 {
            return Err(Error::Unmeasurable(format!(
                "invalid device pixel ratio {}",
                p.device_pixel_ratio
            )));
        }
        if p.client_size.width < 1.0 || p.client_size.height < 1.0 {
            return Err(Error::Unmeasurable(format!(
                "empty viewport {}x{}",
                p.client_size.width, p.client_size.height
            )));
        }

        let content = Size::new(
            p.scroll_size.width.max(p.offset_size.width).max(p.client_size.width),
            p.scroll_size.height.max(p.offset_size.height).max(p.client_size.height),
        );

        Ok(Self {
            content,
            viewport: p.client_size,
            scroll: p.scroll_offset,
            origin: p.origin,
            dpr: p.device_pixel_ratio,
        })
    }

    /// Largest reachable scroll offset in each axis.
    pub fn max_scroll(&self) -> Point {
        Point::new(
            (self.content.width - self.viewport.width).max(0.0),
            (self.content.height - self.viewport.height).max(0.0),
        )
    }

    /// Currently visible part of the content, in content space.
    pub fn visible_content(&self) -> Rect {
        Rect::new(self.scroll.x, self.scroll.y, self.viewport.width, self.viewport.height)
    }
}
