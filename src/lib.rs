//! RFox Capture Engine
//!
//! Captures documents larger than their viewport and stitches the partial
//! captures back into one seamless image.
//!
//! # Features
//!
//! - **Three modes**: visible area, full page, and rectangular selections that
//!   may be taller than the viewport or live inside an inner scroll container
//! - **Host-agnostic**: the engine drives any [`Host`]; the `cdp` feature ships
//!   one backed by headless Chrome
//! - **Safe page state**: scroll offsets and hidden fixed elements are restored
//!   on every exit path, including failure and cancellation
//!
//! # Example
//!
//! ```no_run
//! # async fn run<H: rfcapture::Host>(tab: H) -> rfcapture::Result<()> {
//! use rfcapture::{CaptureConfig, ImageFormat};
//!
//! let config = CaptureConfig { quality: 85, ..Default::default() };
//! let mut capturer = rfcapture::new_capturer(config)?;
//! let shot = capturer.capture_full_page(&tab, ImageFormat::Png, 85, None).await?;
//! println!("{}x{} ({} bytes)", shot.width, shot.height, shot.image.len());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod compositor;
pub mod detect;
pub mod geometry;
pub mod host;
pub mod lease;
pub mod mapper;
pub mod orchestrator;
pub mod queue;
pub mod surface;
pub mod throttle;

#[cfg(feature = "cdp")]
pub mod cdp;

pub use compositor::{CaptureResult, RasterTile};
pub use detect::Interaction;
pub use geometry::{Point, Rect, ScrollMetrics, Size};
pub use host::{ElementRef, Host, ScrollSurface};
pub use mapper::Diagnostic;
pub use orchestrator::{CancelHandle, CaptureRequest, CaptureState, Capturer, ProgressFn};
pub use queue::CaptureQueue;

/// Encoding of captured images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(Error::ConfigError(format!("unknown image format '{}'", other))),
        }
    }
}

/// Viewport dimensions used when the engine launches its own browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Configuration for the capture engine
///
/// Defaults follow what hosts tolerate in practice: browsers allow roughly
/// two viewport captures per second and need a few hundred milliseconds to
/// paint freshly scrolled content.
///
/// # Examples
///
/// ```
/// let cfg = rfcapture::CaptureConfig::default();
/// assert_eq!(cfg.min_capture_interval_ms, 500);
/// assert!(cfg.hide_fixed_elements);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Output encoding
    pub format: ImageFormat,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Settlement delay after the first capture-triggering scroll
    pub first_settle_ms: u64,
    /// Settlement delay after every later scroll
    pub settle_ms: u64,
    /// Minimum spacing between two viewport captures
    pub min_capture_interval_ms: u64,
    /// Upper bound for any single host call
    pub host_timeout_ms: u64,
    /// Selections smaller than this (CSS px) in either dimension are ignored
    pub min_selection_px: f64,
    /// Hide fixed/sticky elements after the first tile
    pub hide_fixed_elements: bool,
    /// Refuse captures that would need more tiles than this
    pub max_tiles: usize,
    /// Browser window size for the Chrome backend
    pub viewport: Viewport,
    /// Device scale factor for the Chrome backend
    pub device_scale_factor: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 92,
            first_settle_ms: 300,
            settle_ms: 550,
            min_capture_interval_ms: 500,
            host_timeout_ms: 10_000,
            min_selection_px: 10.0,
            hide_fixed_elements: true,
            max_tiles: 200,
            viewport: Viewport::default(),
            device_scale_factor: 1.0,
        }
    }
}

impl CaptureConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: CaptureConfig =
            serde_json::from_str(s).map_err(|e| Error::ConfigError(format!("malformed config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Reject values that would make captures misbehave.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(Error::ConfigError(format!("quality must be 1-100, got {}", self.quality)));
        }
        if self.host_timeout_ms == 0 {
            return Err(Error::ConfigError("host_timeout_ms must be positive".into()));
        }
        if self.max_tiles == 0 {
            return Err(Error::ConfigError("max_tiles must be positive".into()));
        }
        if !(self.min_selection_px.is_finite() && self.min_selection_px >= 0.0) {
            return Err(Error::ConfigError("min_selection_px must be a non-negative number".into()));
        }
        if !(self.device_scale_factor.is_finite() && self.device_scale_factor > 0.0) {
            return Err(Error::ConfigError("device_scale_factor must be positive".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError("viewport must not be empty".into()));
        }
        Ok(())
    }
}

/// Create a capturer with its own capture throttle.
pub fn new_capturer(config: CaptureConfig) -> Result<Capturer> {
    config.validate()?;
    Ok(Capturer::new(config))
}
