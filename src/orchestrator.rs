//! Capture orchestrator: the state machine behind the three capture modes.
//!
//! ```text
//! Idle -> Measuring -> Capturing[0..n) -> Compositing -> Done
//!                  \__________________________________-> Failed
//! ```
//!
//! Multi-tile modes hold a [`PageLease`] for their whole tile loop and
//! release it before the outcome is inspected, so scroll position and fixed
//! element visibility are restored on success, failure and cancellation.

use crate::compositor::{self, CaptureResult, RasterTile};
use crate::detect::Interaction;
use crate::geometry::{Point, Rect, ScrollMetrics};
use crate::host::{Host, ScrollSurface};
use crate::lease::PageLease;
use crate::mapper::{self, Diagnostic, RawCrop, TilePlan};
use crate::surface::SurfaceDriver;
use crate::throttle::CaptureThrottle;
use crate::{CaptureConfig, Error, ErrorKind, ImageFormat, Result};
use image::{imageops, RgbaImage};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Progress callback receiving a percentage (0-100).
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Measuring,
    Capturing(usize),
    Compositing,
    Done,
    Failed(ErrorKind),
}

/// What to capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureRequest {
    Visible,
    FullPage,
    /// `rect` is in the content space of `container`, or of the detected
    /// scroll surface when `None`
    Selection { rect: Rect, container: Option<ScrollSurface> },
}

/// Cancels the operation currently running on a [`Capturer`].
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs capture operations, one at a time, against any [`Host`].
///
/// The capturer owns the capture throttle, so every operation it runs shares
/// one rate limit regardless of which target it is pointed at.
pub struct Capturer {
    config: CaptureConfig,
    throttle: CaptureThrottle,
    state: CaptureState,
    cancel: CancelHandle,
}

impl Capturer {
    pub fn new(config: CaptureConfig) -> Self {
        let throttle = CaptureThrottle::new(Duration::from_millis(config.min_capture_interval_ms));
        Self {
            config,
            throttle,
            state: CaptureState::Idle,
            cancel: CancelHandle::default(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Dispatch a [`CaptureRequest`] using the configured format and quality.
    pub async fn run<H: Host>(&mut self, target: &H, request: CaptureRequest, progress: Option<ProgressFn>) -> Result<CaptureResult> {
        let (format, quality) = (self.config.format, self.config.quality);
        match request {
            CaptureRequest::Visible => self.capture_visible(target, format, quality).await,
            CaptureRequest::FullPage => self.capture_full_page(target, format, quality, progress).await,
            CaptureRequest::Selection { rect, container } => {
                self.capture_selection(target, rect, format, quality, container).await
            }
        }
    }

    /// Capture exactly what is currently visible.
    pub async fn capture_visible<H: Host>(&mut self, target: &H, format: ImageFormat, quality: u8) -> Result<CaptureResult> {
        self.begin("visible");
        let outcome = self.visible_inner(target, format, quality).await;
        target.clear_progress();
        self.finish(outcome)
    }

    /// Capture the whole scrollable content of the page's main scroll surface.
    pub async fn capture_full_page<H: Host>(
        &mut self,
        target: &H,
        format: ImageFormat,
        quality: u8,
        progress: Option<ProgressFn>,
    ) -> Result<CaptureResult> {
        self.begin("full-page");
        let outcome = self.full_page_inner(target, format, quality, progress.as_ref()).await;
        target.clear_progress();
        self.finish(outcome)
    }

    /// Capture `rect`, given in the content space of `container`. Without a
    /// container the surface is detected first, anchored at the selection's
    /// corner. Selections taller than the surface's viewport are captured in
    /// several scrolled tiles.
    pub async fn capture_selection<H: Host>(
        &mut self,
        target: &H,
        rect: Rect,
        format: ImageFormat,
        quality: u8,
        container: Option<ScrollSurface>,
    ) -> Result<CaptureResult> {
        self.begin("selection");
        let outcome = self.selection_inner(target, rect, format, quality, container).await;
        target.clear_progress();
        self.finish(outcome)
    }

    fn begin(&mut self, mode: &str) {
        debug!("starting {} capture", mode);
        self.cancel.reset();
        self.state = CaptureState::Idle;
        self.transition(CaptureState::Measuring);
    }

    fn transition(&mut self, next: CaptureState) {
        debug!("capture state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn finish(&mut self, outcome: Result<CaptureResult>) -> Result<CaptureResult> {
        match &outcome {
            Ok(res) => {
                info!("capture done: {}x{} {}", res.width, res.height, res.format.mime_type());
                self.transition(CaptureState::Done);
            }
            Err(e) if e.is_silent() => {
                debug!("capture ended quietly: {}", e);
                self.transition(CaptureState::Failed(e.kind()));
            }
            Err(e) => {
                warn!("capture failed: {}", e);
                self.transition(CaptureState::Failed(e.kind()));
            }
        }
        outcome
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Wait for the renderer to paint after a scroll, waking early on cancel.
    async fn settle(&self, tile: usize) -> Result<()> {
        let ms = if tile == 0 { self.config.first_settle_ms } else { self.config.settle_ms };
        let sleep = tokio::time::sleep(Duration::from_millis(ms));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return self.check_cancelled(),
                _ = self.cancel.notify.notified() => self.check_cancelled()?,
            }
        }
    }

    fn report_progress<H: Host>(&self, target: &H, progress: Option<&ProgressFn>, done: usize, total: usize) {
        let pct = ((done * 100) / total.max(1)).min(100) as u8;
        target.send_progress(pct);
        if let Some(cb) = progress {
            cb(pct);
        }
    }

    async fn shoot<H: Host>(&mut self, target: &H, format: ImageFormat, quality: u8) -> Result<RgbaImage> {
        let timeout = self.config.host_timeout_ms;
        self.throttle.shoot(target, format, quality, timeout).await
    }

    async fn visible_inner<H: Host>(&mut self, target: &H, format: ImageFormat, quality: u8) -> Result<CaptureResult> {
        let surface = ScrollSurface::Window;
        let driver = SurfaceDriver::new(target, &surface, self.config.host_timeout_ms);
        let metrics = driver.measure().await?;
        debug!("visible capture at dpr {}", metrics.dpr);

        self.transition(CaptureState::Capturing(0));
        let raw = self.shoot(target, format, quality).await?;
        self.check_cancelled()?;

        self.transition(CaptureState::Compositing);
        Ok(CaptureResult {
            image: compositor::encode(&raw, format, quality)?,
            width: raw.width(),
            height: raw.height(),
            format,
            diagnostics: Vec::new(),
        })
    }

    async fn full_page_inner<H: Host>(
        &mut self,
        target: &H,
        format: ImageFormat,
        quality: u8,
        progress: Option<&ProgressFn>,
    ) -> Result<CaptureResult> {
        let timeout = self.config.host_timeout_ms;
        let mut interaction = Interaction::new(None);
        let surface = interaction.surface(target, timeout).await?;
        let driver = SurfaceDriver::new(target, &surface, timeout);
        let metrics = driver.measure().await?;

        let plan = mapper::full_page_plan(&metrics);
        self.check_tile_budget(&plan)?;
        info!(
            "full-page capture of {:?}: {}x{} css in {} tiles",
            surface,
            metrics.content.width,
            metrics.content.height,
            plan.len()
        );

        let mut diagnostics = Vec::new();
        let mut lease = PageLease::acquire(target, &surface, metrics.scroll, timeout);
        let tiles = self
            .page_tiles(target, &driver, &mut lease, &metrics, &plan, format, quality, progress, &mut diagnostics)
            .await;
        let released = lease.release().await;
        let tiles = tiles?;
        if let Err(e) = released {
            warn!("could not fully restore page state: {}", e);
        }

        self.transition(CaptureState::Compositing);
        let step = mapper::to_device(metrics.viewport.height, metrics.dpr).max(1) as u32;
        compositor::composite_encoded(tiles, plan.device_width, plan.device_height, step, format, quality, diagnostics)
    }

    #[allow(clippy::too_many_arguments)]
    async fn page_tiles<H: Host>(
        &mut self,
        target: &H,
        driver: &SurfaceDriver<'_, H>,
        lease: &mut PageLease<H>,
        metrics: &ScrollMetrics,
        plan: &TilePlan,
        format: ImageFormat,
        quality: u8,
        progress: Option<&ProgressFn>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<RasterTile>> {
        let window = RawCrop::from_viewport(&mapper::surface_box(metrics), metrics.dpr);
        let mut tiles = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            self.check_cancelled()?;
            self.transition(CaptureState::Capturing(step.index));
            driver.scroll_to(0.0, step.scroll_y).await?;
            self.settle(step.index).await?;

            let raw = self.shoot(target, format, quality).await?;
            let crop = mapper::clamp_crop_reporting(window, raw.width(), raw.height(), metrics.dpr, step.index, diagnostics);
            let image = imageops::crop_imm(&raw, crop.x, crop.y, crop.width, crop.height).to_image();
            tiles.push(RasterTile {
                image,
                document_y: step.device_y,
                height: step.device_height,
                is_last: step.is_last,
            });

            if step.index == 0 && !step.is_last && self.config.hide_fixed_elements {
                lease.suppress_fixed().await?;
            }
            debug!("tile {}/{} captured", step.index + 1, plan.len());
            self.report_progress(target, progress, step.index + 1, plan.len());
        }
        Ok(tiles)
    }

    async fn selection_inner<H: Host>(
        &mut self,
        target: &H,
        rect: Rect,
        format: ImageFormat,
        quality: u8,
        container: Option<ScrollSurface>,
    ) -> Result<CaptureResult> {
        let min = self.config.min_selection_px;
        if !(rect.width >= min && rect.height >= min) {
            return Err(Error::DegenerateSelection { width: rect.width, height: rect.height });
        }

        let timeout = self.config.host_timeout_ms;
        let mut interaction = match container {
            Some(surface) => Interaction::with_surface(surface),
            None => Interaction::new(Self::selection_anchor(target, &rect, timeout).await?),
        };
        let surface = interaction.surface(target, timeout).await?;
        debug!("selection {:?} mapped onto {:?}", rect, surface);
        let driver = SurfaceDriver::new(target, &surface, timeout);
        let metrics = driver.measure().await?;

        let mut diagnostics = Vec::new();
        let sel = mapper::clip_selection(&rect, &metrics, &mut diagnostics)?;
        if sel.width < min || sel.height < min {
            return Err(Error::DegenerateSelection { width: sel.width, height: sel.height });
        }

        let mut lease = PageLease::acquire(target, &surface, metrics.scroll, timeout);
        let outcome = if sel.height <= metrics.viewport.height {
            self.selection_single(target, &driver, &metrics, &sel, format, quality, diagnostics).await
        } else {
            self.selection_tiled(target, &driver, &mut lease, &metrics, &sel, format, quality, diagnostics).await
        };
        let released = lease.release().await;
        let res = outcome?;
        if let Err(e) = released {
            warn!("could not fully restore page state: {}", e);
        }
        Ok(res)
    }

    /// Point detection tests for a selection given without a surface: its
    /// top-left corner in viewport space, or `None` when that is off screen
    /// (detection then picks the page's main scroller).
    async fn selection_anchor<H: Host>(target: &H, rect: &Rect, timeout: u64) -> Result<Option<Point>> {
        let window = ScrollSurface::Window;
        let metrics = SurfaceDriver::new(target, &window, timeout).measure().await?;
        let anchor = mapper::content_to_viewport(Point::new(rect.x, rect.y), &metrics);
        let screen = Rect::new(0.0, 0.0, metrics.viewport.width, metrics.viewport.height);
        Ok(screen.contains(anchor).then_some(anchor))
    }

    /// Horizontal offset that shows the selection's columns, keeping the
    /// current one when they are already visible.
    fn scroll_x_for(sel: &Rect, m: &ScrollMetrics) -> f64 {
        let visible = m.visible_content();
        if sel.x >= visible.x && sel.right() <= visible.right() {
            m.scroll.x
        } else {
            sel.x.min(m.max_scroll().x)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn selection_single<H: Host>(
        &mut self,
        target: &H,
        driver: &SurfaceDriver<'_, H>,
        metrics: &ScrollMetrics,
        sel: &Rect,
        format: ImageFormat,
        quality: u8,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<CaptureResult> {
        let visible = metrics.visible_content();
        let inside = sel.y >= visible.y && sel.bottom() <= visible.bottom() && sel.x >= visible.x && sel.right() <= visible.right();

        let live = if inside {
            *metrics
        } else {
            let x = Self::scroll_x_for(sel, metrics);
            let y = sel.y.min(metrics.max_scroll().y);
            debug!("selection outside viewport; corrective scroll to ({}, {})", x, y);
            driver.scroll_to(x, y).await?;
            self.settle(0).await?;
            driver.measure().await?
        };

        self.check_cancelled()?;
        self.transition(CaptureState::Capturing(0));
        let raw = self.shoot(target, format, quality).await?;

        let plan = mapper::selection_plan(sel, &live);
        let step = plan.steps[0];
        let window = mapper::selection_device_crop(sel, &step, &plan, &live);
        let crop = mapper::clamp_crop_reporting(window, raw.width(), raw.height(), live.dpr, 0, &mut diagnostics);
        let image = imageops::crop_imm(&raw, crop.x, crop.y, crop.width, crop.height).to_image();

        self.transition(CaptureState::Compositing);
        Ok(CaptureResult {
            image: compositor::encode(&image, format, quality)?,
            width: image.width(),
            height: image.height(),
            format,
            diagnostics,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn selection_tiled<H: Host>(
        &mut self,
        target: &H,
        driver: &SurfaceDriver<'_, H>,
        lease: &mut PageLease<H>,
        metrics: &ScrollMetrics,
        sel: &Rect,
        format: ImageFormat,
        quality: u8,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<CaptureResult> {
        let step_height = metrics.viewport.height;
        let plan = mapper::selection_plan(sel, metrics);
        self.check_tile_budget(&plan)?;
        info!("selection {:?} needs {} tiles", sel, plan.len());

        let scroll_x = Self::scroll_x_for(sel, metrics);
        let mut tiles = Vec::with_capacity(plan.len());
        for step in &plan.steps {
            self.check_cancelled()?;
            self.transition(CaptureState::Capturing(step.index));
            driver.scroll_to(scroll_x, step.scroll_y).await?;
            self.settle(step.index).await?;
            // the host may clamp the requested offset; crop against where it really is
            let live = driver.measure().await?;

            let raw = self.shoot(target, format, quality).await?;
            let window = mapper::selection_device_crop(sel, step, &plan, &live);
            let crop = mapper::clamp_crop_reporting(window, raw.width(), raw.height(), live.dpr, step.index, &mut diagnostics);
            let image = imageops::crop_imm(&raw, crop.x, crop.y, crop.width, crop.height).to_image();
            tiles.push(RasterTile {
                image,
                document_y: step.device_y,
                height: step.device_height,
                is_last: step.is_last,
            });

            if step.index == 0 && self.config.hide_fixed_elements {
                lease.suppress_fixed().await?;
            }
            self.report_progress(target, None, step.index + 1, plan.len());
        }

        self.transition(CaptureState::Compositing);
        let step_device = mapper::to_device(step_height, metrics.dpr).max(1) as u32;
        compositor::composite_encoded(tiles, plan.device_width, plan.device_height, step_device, format, quality, diagnostics)
    }

    fn check_tile_budget(&self, plan: &TilePlan) -> Result<()> {
        if plan.len() > self.config.max_tiles {
            return Err(Error::Unmeasurable(format!(
                "capture needs {} tiles, limit is {}",
                plan.len(),
                self.config.max_tiles
            )));
        }
        Ok(())
    }
}
