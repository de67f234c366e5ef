//! In-memory capture host used by the integration tests.
//!
//! Every pixel of a rendered viewport encodes which content device row and
//! column it shows, so stitched output can be checked row by row:
//! `R = row & 0xff`, `G = row >> 8`, `B = col & 0xff`. Alpha tells surfaces
//! apart (window, inner container, fixed header).

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use rfcapture::geometry::LayoutProbe;
use rfcapture::host::{ContainerCandidate, DetectionProbe, Overflow};
use rfcapture::{ElementRef, Error, Host, ImageFormat, Point, Rect, Result, ScrollSurface, Size};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub const WINDOW_ALPHA: u8 = 255;
pub const CONTAINER_ALPHA: u8 = 254;
pub const HEADER_ALPHA: u8 = 200;

pub const CONTAINER_ID: &str = "rf-main";
pub const HEADER_ID: &str = "rf-header";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub origin: Point,
    pub client: Size,
    pub content: Size,
    pub scroll: Point,
}

#[derive(Debug)]
pub struct PageState {
    pub content: Size,
    pub viewport: Size,
    pub dpr: f64,
    pub scroll: Point,
    pub container: Option<FakeContainer>,
    /// Height of a fixed header pinned to the top of the viewport; 0 for none
    pub header_height: f64,
    pub header_hidden: bool,
    /// Advertise the container as a structural match during detection
    pub detectable: bool,
    /// Fail the capture with this (zero-based) index as restricted
    pub fail_capture_at: Option<usize>,
    pub captures: Vec<Instant>,
    pub scrolls: Vec<(ScrollSurface, f64, f64)>,
    pub progress: Vec<u8>,
    pub progress_cleared: usize,
}

#[derive(Clone)]
pub struct FakeHost {
    pub state: Arc<Mutex<PageState>>,
}

impl FakeHost {
    pub fn page(viewport: Size, content: Size, dpr: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                content,
                viewport,
                dpr,
                scroll: Point::default(),
                container: None,
                header_height: 0.0,
                header_hidden: false,
                detectable: false,
                fail_capture_at: None,
                captures: Vec::new(),
                scrolls: Vec::new(),
                progress: Vec::new(),
                progress_cleared: 0,
            })),
        }
    }

    pub fn with_header(self, height: f64) -> Self {
        self.state.lock().unwrap().header_height = height;
        self
    }

    pub fn with_scroll(self, x: f64, y: f64) -> Self {
        self.state.lock().unwrap().scroll = Point::new(x, y);
        self
    }

    pub fn with_container(self, container: FakeContainer, detectable: bool) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            s.container = Some(container);
            s.detectable = detectable;
        }
        self
    }

    pub fn failing_capture(self, index: usize) -> Self {
        self.state.lock().unwrap().fail_capture_at = Some(index);
        self
    }

    pub fn scroll(&self) -> Point {
        self.state.lock().unwrap().scroll
    }

    pub fn container_scroll(&self) -> Option<Point> {
        self.state.lock().unwrap().container.as_ref().map(|c| c.scroll)
    }

    pub fn header_hidden(&self) -> bool {
        self.state.lock().unwrap().header_hidden
    }

    pub fn captures(&self) -> Vec<Instant> {
        self.state.lock().unwrap().captures.clone()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.state.lock().unwrap().progress.clone()
    }

    pub fn progress_cleared(&self) -> usize {
        self.state.lock().unwrap().progress_cleared
    }

    fn container_ref() -> ElementRef {
        ElementRef::new(CONTAINER_ID)
    }
}

fn clamp(v: f64, max: f64) -> f64 {
    v.max(0.0).min(max.max(0.0))
}

fn device(v: f64, dpr: f64) -> u32 {
    (v * dpr).round() as u32
}

fn encode_pixel(row: u32, col: u32, alpha: u8) -> Rgba<u8> {
    Rgba([(row & 0xff) as u8, ((row >> 8) & 0xff) as u8, (col & 0xff) as u8, alpha])
}

/// Content device row and column a pixel encodes.
pub fn decode_pixel(p: &Rgba<u8>) -> (u32, u32) {
    (u32::from(p[0]) | (u32::from(p[1]) << 8), u32::from(p[2]))
}

fn render(s: &PageState) -> RgbaImage {
    let dpr = s.dpr;
    let w = device(s.viewport.width, dpr);
    let h = device(s.viewport.height, dpr);
    let sx = device(s.scroll.x, dpr);
    let sy = device(s.scroll.y, dpr);
    let header_rows = if s.header_hidden { 0 } else { device(s.header_height, dpr) };

    RgbaImage::from_fn(w, h, |c, r| {
        if r < header_rows {
            return Rgba([0, 0, 0, HEADER_ALPHA]);
        }
        if let Some(cont) = &s.container {
            let (ox, oy) = (device(cont.origin.x, dpr), device(cont.origin.y, dpr));
            let (cw, ch) = (device(cont.client.width, dpr), device(cont.client.height, dpr));
            if c >= ox && c < ox + cw && r >= oy && r < oy + ch {
                let row = r - oy + device(cont.scroll.y, dpr);
                let col = c - ox + device(cont.scroll.x, dpr);
                return encode_pixel(row, col, CONTAINER_ALPHA);
            }
        }
        encode_pixel(r + sy, c + sx, WINDOW_ALPHA)
    })
}

fn to_png(img: &RgbaImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

impl Host for FakeHost {
    async fn measure_scroll(&self, surface: &ScrollSurface) -> Result<LayoutProbe> {
        let s = self.state.lock().unwrap();
        match surface {
            ScrollSurface::Window => Ok(LayoutProbe {
                scroll_size: s.content,
                offset_size: s.content,
                client_size: s.viewport,
                scroll_offset: s.scroll,
                origin: Point::default(),
                device_pixel_ratio: s.dpr,
            }),
            ScrollSurface::Container(el) => {
                let c = s
                    .container
                    .as_ref()
                    .filter(|_| el.as_str() == CONTAINER_ID)
                    .ok_or_else(|| Error::DetachedTarget(el.as_str().to_string()))?;
                Ok(LayoutProbe {
                    scroll_size: c.content,
                    offset_size: c.content,
                    client_size: c.client,
                    scroll_offset: c.scroll,
                    origin: c.origin,
                    device_pixel_ratio: s.dpr,
                })
            }
        }
    }

    async fn scroll_to(&self, surface: &ScrollSurface, x: f64, y: f64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.scrolls.push((surface.clone(), x, y));
        match surface {
            ScrollSurface::Window => {
                let (mx, my) = (s.content.width - s.viewport.width, s.content.height - s.viewport.height);
                s.scroll = Point::new(clamp(x, mx), clamp(y, my));
            }
            ScrollSurface::Container(el) => {
                let c = s
                    .container
                    .as_mut()
                    .filter(|_| el.as_str() == CONTAINER_ID)
                    .ok_or_else(|| Error::DetachedTarget(el.as_str().to_string()))?;
                let (mx, my) = (c.content.width - c.client.width, c.content.height - c.client.height);
                c.scroll = Point::new(clamp(x, mx), clamp(y, my));
            }
        }
        Ok(())
    }

    async fn capture_viewport(&self, _format: ImageFormat, _quality: u8) -> Result<Vec<u8>> {
        let img = {
            let mut s = self.state.lock().unwrap();
            let index = s.captures.len();
            s.captures.push(Instant::now());
            if s.fail_capture_at == Some(index) {
                return Err(Error::RestrictedSurface("privileged page".into()));
            }
            render(&s)
        };
        Ok(to_png(&img))
    }

    async fn fixed_elements(&self) -> Result<Vec<ElementRef>> {
        let s = self.state.lock().unwrap();
        if s.header_height > 0.0 && !s.header_hidden {
            Ok(vec![ElementRef::new(HEADER_ID)])
        } else {
            Ok(Vec::new())
        }
    }

    async fn set_element_visibility(&self, elements: &[ElementRef], hidden: bool) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if elements.iter().any(|e| e.as_str() == HEADER_ID) {
            s.header_hidden = hidden;
        }
        Ok(())
    }

    async fn probe_containers(&self) -> Result<DetectionProbe> {
        let s = self.state.lock().unwrap();
        let structural = match (&s.container, s.detectable) {
            (Some(c), true) => vec![ContainerCandidate {
                element: Self::container_ref(),
                overflow_y: Overflow::Auto,
                scroll_height: c.content.height,
                client_height: c.client.height,
                bounds: Rect::new(c.origin.x, c.origin.y, c.client.width, c.client.height),
            }],
            _ => Vec::new(),
        };
        Ok(DetectionProbe {
            structural,
            blocks: Vec::new(),
            viewport: s.viewport,
        })
    }

    fn send_progress(&self, percent: u8) {
        self.state.lock().unwrap().progress.push(percent);
    }

    fn clear_progress(&self) {
        self.state.lock().unwrap().progress_cleared += 1;
    }
}

/// Decode a PNG capture result.
pub fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

/// Assert that output row `k` shows content device row `first_row + k` for
/// every row at or below `from`, and that the row came from `alpha`.
pub fn assert_rows(img: &RgbaImage, from: u32, first_row: u32, alpha: u8) {
    for y in from..img.height() {
        for x in [0, img.width() / 2, img.width() - 1] {
            let p = img.get_pixel(x, y);
            assert_eq!(p[3], alpha, "surface at ({}, {})", x, y);
            let (row, _) = decode_pixel(p);
            assert_eq!(row, (first_row + y) & 0xffff, "row at ({}, {})", x, y);
        }
    }
}
