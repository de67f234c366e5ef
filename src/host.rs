//! Host capabilities consumed by the capture engine.
//!
//! A `Host` is one capture target (a browser tab, a webview, a test double).
//! The engine only reads geometry, moves scroll offsets, toggles element
//! visibility and asks for viewport rasters through this trait.

use crate::geometry::{LayoutProbe, Rect, Size};
use crate::{ImageFormat, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Opaque handle to an element inside the hosted document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The thing that scrolls during a capture: the top-level document or an
/// internally-scrolling element.
///
/// Fixed for the lifetime of one interaction; never re-derived mid-operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ScrollSurface {
    #[default]
    Window,
    Container(ElementRef),
}

/// Computed `overflow-y` of a candidate element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    Visible,
    Hidden,
    Clip,
    Auto,
    Scroll,
}

impl Overflow {
    /// Whether the user can scroll an element with this overflow.
    pub fn scrolls(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

/// Layout facts about one element that might be the page's real scroller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCandidate {
    pub element: ElementRef,
    pub overflow_y: Overflow,
    pub scroll_height: f64,
    pub client_height: f64,
    /// Border box in viewport space
    pub bounds: Rect,
}

impl ContainerCandidate {
    /// Height that can be scrolled past the visible box.
    pub fn scrollable_height(&self) -> f64 {
        self.scroll_height - self.client_height
    }
}

/// Candidates gathered by the host for container detection.
///
/// `structural` lists elements matching the "main content" patterns in
/// priority order; `blocks` lists every other block-level element.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionProbe {
    pub structural: Vec<ContainerCandidate>,
    pub blocks: Vec<ContainerCandidate>,
    pub viewport: Size,
}

/// Capabilities the capture engine needs from its environment.
///
/// Implementations must be cheap to clone (they are handles). Every call may
/// be bounded by a timeout on the engine side, so implementations should not
/// rely on running to completion.
pub trait Host: Clone + Send + Sync + 'static {
    /// Raw layout metrics of `surface`.
    fn measure_scroll(&self, surface: &ScrollSurface) -> impl Future<Output = Result<LayoutProbe>> + Send;

    /// Jump (no animation) to the given scroll offset. Out-of-range targets
    /// clamp; scrolling to the current offset is a no-op.
    fn scroll_to(&self, surface: &ScrollSurface, x: f64, y: f64) -> impl Future<Output = Result<()>> + Send;

    /// Encoded raster of the whole visible viewport.
    ///
    /// Rejections for privileged documents are reported as
    /// [`crate::Error::RestrictedSurface`].
    fn capture_viewport(&self, format: ImageFormat, quality: u8) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Currently visible fixed or sticky positioned elements.
    fn fixed_elements(&self) -> impl Future<Output = Result<Vec<ElementRef>>> + Send;

    /// Toggle the `visibility` of `elements` without touching layout.
    fn set_element_visibility(&self, elements: &[ElementRef], hidden: bool) -> impl Future<Output = Result<()>> + Send;

    /// Candidate scroll containers for detection.
    fn probe_containers(&self) -> impl Future<Output = Result<DetectionProbe>> + Send;

    /// Fire-and-forget progress notification.
    fn send_progress(&self, percent: u8);

    /// Remove any progress indicator. Called on every exit path.
    fn clear_progress(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_parses_from_css_keywords() {
        let o: Overflow = serde_json::from_str("\"auto\"").unwrap();
        assert!(o.scrolls());
        let o: Overflow = serde_json::from_str("\"hidden\"").unwrap();
        assert!(!o.scrolls());
    }

    #[test]
    fn candidate_deserializes_from_probe_json() {
        let json = r#"{"element":"rf-3","overflowY":"scroll","scrollHeight":2400,"clientHeight":600,
            "bounds":{"x":0,"y":60,"width":1280,"height":600}}"#;
        let c: ContainerCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.element.as_str(), "rf-3");
        assert_eq!(c.scrollable_height(), 1800.0);
    }
}
