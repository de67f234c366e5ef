//! Viewport driver and geometry oracle bound to one scroll surface.
//!
//! The orchestrator talks to a `SurfaceDriver` and never looks at which
//! `ScrollSurface` variant it wraps; the host resolves that.

use crate::geometry::{Point, ScrollMetrics};
use crate::host::{Host, ScrollSurface};
use crate::{Error, Result};
use log::debug;
use std::future::Future;
use std::time::Duration;

/// Await a host call, mapping an expired wait onto `on_timeout`.
pub(crate) async fn bounded<T, F>(timeout_ms: u64, fut: F, on_timeout: fn(String) -> Error) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(res) => res,
        Err(_) => Err(on_timeout(format!("host did not answer within {}ms", timeout_ms))),
    }
}

/// Scroll and measure operations for one surface of one host.
pub struct SurfaceDriver<'a, H: Host> {
    host: &'a H,
    surface: &'a ScrollSurface,
    timeout_ms: u64,
}

impl<'a, H: Host> SurfaceDriver<'a, H> {
    pub fn new(host: &'a H, surface: &'a ScrollSurface, timeout_ms: u64) -> Self {
        Self { host, surface, timeout_ms }
    }

    pub fn surface(&self) -> &ScrollSurface {
        self.surface
    }

    /// Fresh metrics; never cached because the page may reflow between calls.
    pub async fn measure(&self) -> Result<ScrollMetrics> {
        let probe = bounded(self.timeout_ms, self.host.measure_scroll(self.surface), Error::Unmeasurable).await?;
        ScrollMetrics::from_probe(&probe)
    }

    /// Instant jump to an absolute offset. Settlement is the caller's job.
    pub async fn scroll_to(&self, x: f64, y: f64) -> Result<()> {
        debug!("scroll {:?} to ({}, {})", self.surface, x, y);
        bounded(self.timeout_ms, self.host.scroll_to(self.surface, x, y), Error::Unmeasurable).await
    }

    pub async fn scroll_by(&self, dx: f64, dy: f64) -> Result<()> {
        let m = self.measure().await?;
        self.scroll_to(m.scroll.x + dx, m.scroll.y + dy).await
    }

    /// Where the surface's visible box sits inside the captured viewport.
    pub async fn viewport_offset(&self) -> Result<Point> {
        Ok(self.measure().await?.origin)
    }
}
