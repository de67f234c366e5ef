//! Rate gate in front of the host's viewport capture primitive.
//!
//! Hosts typically allow about two captures per second. The throttle is an
//! owned value handed to the orchestrator so the limit is global to
//! whoever holds it, and tests can drive it with tokio's paused clock.

use crate::host::Host;
use crate::surface::bounded;
use crate::{Error, ImageFormat, Result};
use image::RgbaImage;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed-interval gate: at most one capture per `min_interval`.
#[derive(Debug)]
pub struct CaptureThrottle {
    min_interval: Duration,
    last_shot: Option<Instant>,
}

impl CaptureThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_shot: None }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Earliest instant the next capture may be issued.
    pub fn next_slot(&self) -> Option<Instant> {
        self.last_shot.map(|t| t + self.min_interval)
    }

    /// Wait for the gate, then capture and decode the whole viewport.
    pub async fn shoot<H: Host>(
        &mut self,
        host: &H,
        format: ImageFormat,
        quality: u8,
        timeout_ms: u64,
    ) -> Result<RgbaImage> {
        if let Some(slot) = self.next_slot() {
            if slot > Instant::now() {
                debug!("capture throttled for {:?}", slot - Instant::now());
                tokio::time::sleep_until(slot).await;
            }
        }
        self.last_shot = Some(Instant::now());

        let bytes = bounded(timeout_ms, host.capture_viewport(format, quality), Error::RestrictedSurface).await?;
        if bytes.is_empty() {
            return Err(Error::RestrictedSurface("host returned an empty capture".into()));
        }
        let img = image::load_from_memory(&bytes)?.to_rgba8();
        debug!("captured {}x{} viewport raster", img.width(), img.height());
        Ok(img)
    }
}

impl Default for CaptureThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}
