//! Scoped lease over the two pieces of page state a capture borrows:
//! the surface's scroll offset and the visibility of fixed/sticky elements.
//!
//! Release is explicit and async. A lease dropped without being released
//! (e.g. the capture future was dropped by its caller) schedules the same
//! restoration on the current tokio runtime.

use crate::geometry::Point;
use crate::host::{ElementRef, Host, ScrollSurface};
use crate::surface::bounded;
use crate::{Error, Result};
use log::{debug, warn};

pub struct PageLease<H: Host> {
    host: H,
    surface: ScrollSurface,
    original_scroll: Point,
    hidden: Vec<ElementRef>,
    timeout_ms: u64,
    released: bool,
}

impl<H: Host> PageLease<H> {
    /// Take the lease, remembering `original_scroll` as the offset to restore.
    pub fn acquire(host: &H, surface: &ScrollSurface, original_scroll: Point, timeout_ms: u64) -> Self {
        debug!("lease acquired on {:?} at ({}, {})", surface, original_scroll.x, original_scroll.y);
        Self {
            host: host.clone(),
            surface: surface.clone(),
            original_scroll,
            hidden: Vec::new(),
            timeout_ms,
            released: false,
        }
    }

    pub fn original_scroll(&self) -> Point {
        self.original_scroll
    }

    pub fn hidden(&self) -> &[ElementRef] {
        &self.hidden
    }

    /// Hide every currently visible fixed/sticky element. Returns how many
    /// were hidden; they stay hidden until release.
    pub async fn suppress_fixed(&mut self) -> Result<usize> {
        let found = bounded(self.timeout_ms, self.host.fixed_elements(), Error::Unmeasurable).await?;
        let fresh: Vec<ElementRef> = found.into_iter().filter(|e| !self.hidden.contains(e)).collect();
        if fresh.is_empty() {
            return Ok(0);
        }
        // record before hiding so a failed call is still undone on release
        self.hidden.extend(fresh.iter().cloned());
        bounded(self.timeout_ms, self.host.set_element_visibility(&fresh, true), Error::Unmeasurable).await?;
        debug!("suppressed {} fixed elements", fresh.len());
        Ok(fresh.len())
    }

    /// Restore visibility and scroll offset. Both steps are attempted even if
    /// the first fails; the first error is returned.
    pub async fn release(mut self) -> Result<()> {
        let res = restore(&self.host, &self.surface, &self.hidden, self.original_scroll, self.timeout_ms).await;
        self.released = true;
        res
    }
}

async fn restore<H: Host>(host: &H, surface: &ScrollSurface, hidden: &[ElementRef], scroll: Point, timeout_ms: u64) -> Result<()> {
    let shown = if hidden.is_empty() {
        Ok(())
    } else {
        bounded(timeout_ms, host.set_element_visibility(hidden, false), Error::Unmeasurable).await
    };
    let scrolled = bounded(timeout_ms, host.scroll_to(surface, scroll.x, scroll.y), Error::Unmeasurable).await;
    host.clear_progress();
    debug!("lease released on {:?}", surface);
    shown.and(scrolled)
}

impl<H: Host> Drop for PageLease<H> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("page lease dropped without release; restoring in background");
        let host = self.host.clone();
        let surface = self.surface.clone();
        let hidden = std::mem::take(&mut self.hidden);
        let scroll = self.original_scroll;
        let timeout_ms = self.timeout_ms;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = restore(&host, &surface, &hidden, scroll, timeout_ms).await {
                        warn!("background restore failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("no runtime available; page state for {:?} left as-is", surface),
        }
    }
}
