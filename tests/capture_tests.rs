//! End-to-end capture tests against the in-memory host

mod common;

use common::*;
use rfcapture::mapper::Diagnostic;
use rfcapture::{
    new_capturer, CaptureConfig, CaptureState, Error, ErrorKind, Host, ImageFormat, Point, Rect, ScrollSurface, Size,
};
use std::time::Duration;

fn tall_page(dpr: f64) -> FakeHost {
    FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 750.0), dpr)
}

fn container(scroll_y: f64, client_h: f64, content_h: f64) -> FakeContainer {
    FakeContainer {
        origin: Point::new(30.0, 60.0),
        client: Size::new(300.0, client_h),
        content: Size::new(300.0, content_h),
        scroll: Point::new(0.0, scroll_y),
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_page_rows_line_up() {
    for &dpr in &[1.0, 2.0] {
        let host = tall_page(dpr).with_header(20.0).with_scroll(0.0, 120.0);
        let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

        let shot = capturer.capture_full_page(&host, ImageFormat::Png, 90, None).await.unwrap();
        let img = decode(&shot.image);
        assert_eq!((img.width(), img.height()), ((200.0 * dpr) as u32, (750.0 * dpr) as u32));
        assert_eq!((shot.width, shot.height), img.dimensions());

        // header only on the first tile
        let header_rows = (20.0 * dpr) as u32;
        assert_eq!(img.get_pixel(0, 0)[3], HEADER_ALPHA);
        assert_rows(&img, header_rows, 0, WINDOW_ALPHA);

        assert_eq!(host.captures().len(), 3);
        assert_eq!(host.scroll(), Point::new(0.0, 120.0));
        assert!(!host.header_hidden());
        assert_eq!(capturer.state(), CaptureState::Done);
        assert!(shot.diagnostics.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_page_reports_progress() {
    let host = tall_page(1.0);
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress: rfcapture::ProgressFn = std::sync::Arc::new(move |p| sink.lock().unwrap().push(p));

    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();
    capturer
        .capture_full_page(&host, ImageFormat::Png, 90, Some(progress))
        .await
        .unwrap();

    assert_eq!(host.progress(), vec![33, 66, 100]);
    assert_eq!(*seen.lock().unwrap(), vec![33, 66, 100]);
    assert!(host.progress_cleared() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_viewport_page_needs_one_tile() {
    let host = FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 300.0), 1.0).with_header(20.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let shot = capturer.capture_full_page(&host, ImageFormat::Png, 90, None).await.unwrap();
    assert_eq!((shot.width, shot.height), (200, 300));
    assert_eq!(host.captures().len(), 1);
    let img = decode(&shot.image);
    // nothing to hide when there is no second tile
    assert_eq!(img.get_pixel(0, 0)[3], HEADER_ALPHA);
    assert_rows(&img, 20, 0, WINDOW_ALPHA);
}

#[tokio::test(start_paused = true)]
async fn test_captures_respect_rate_limit() {
    let host = FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 1500.0), 1.0);
    let config = CaptureConfig {
        first_settle_ms: 0,
        settle_ms: 0,
        ..Default::default()
    };
    let mut capturer = new_capturer(config).unwrap();
    capturer.capture_full_page(&host, ImageFormat::Png, 90, None).await.unwrap();

    let shots = host.captures();
    assert_eq!(shots.len(), 5);
    for pair in shots.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(500), "captures {:?} apart", pair[1] - pair[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_detected_container_is_captured_in_full() {
    let host = FakeHost::page(Size::new(400.0, 300.0), Size::new(400.0, 300.0), 1.0)
        .with_container(container(50.0, 200.0, 700.0), true);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let shot = capturer.capture_full_page(&host, ImageFormat::Png, 90, None).await.unwrap();
    assert_eq!((shot.width, shot.height), (300, 700));
    assert_rows(&decode(&shot.image), 0, 0, CONTAINER_ALPHA);
    assert_eq!(host.captures().len(), 4);
    assert_eq!(host.container_scroll(), Some(Point::new(0.0, 50.0)));
    assert_eq!(host.scroll(), Point::default());
}

#[tokio::test(start_paused = true)]
async fn test_tall_selection_is_stitched() {
    for &dpr in &[1.0, 2.0] {
        let host = FakeHost::page(Size::new(200.0, 100.0), Size::new(200.0, 1000.0), dpr);
        let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

        let sel = Rect::new(10.0, 50.0, 120.0, 250.0);
        let shot = capturer.capture_selection(&host, sel, ImageFormat::Png, 90, None).await.unwrap();
        assert_eq!((shot.width, shot.height), ((120.0 * dpr) as u32, (250.0 * dpr) as u32));

        let img = decode(&shot.image);
        assert_rows(&img, 0, (50.0 * dpr) as u32, WINDOW_ALPHA);
        let (_, col) = decode_pixel(img.get_pixel(0, 0));
        assert_eq!(col, (10.0 * dpr) as u32);

        assert_eq!(host.captures().len(), 3);
        assert_eq!(host.scroll(), Point::default());
    }
}

#[tokio::test(start_paused = true)]
async fn test_selection_in_container() {
    let host = FakeHost::page(Size::new(400.0, 300.0), Size::new(400.0, 300.0), 1.0)
        .with_container(container(10.0, 100.0, 1000.0), false);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let surface = ScrollSurface::Container(rfcapture::ElementRef::new(CONTAINER_ID));
    let sel = Rect::new(0.0, 40.0, 300.0, 80.0);
    let shot = capturer
        .capture_selection(&host, sel, ImageFormat::Png, 90, Some(surface))
        .await
        .unwrap();

    assert_eq!((shot.width, shot.height), (300, 80));
    assert_rows(&decode(&shot.image), 0, 40, CONTAINER_ALPHA);
    assert_eq!(host.captures().len(), 1);
    assert_eq!(host.container_scroll(), Some(Point::new(0.0, 10.0)));
}

#[tokio::test(start_paused = true)]
async fn test_selection_past_content_is_clipped() {
    let host = FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 1000.0), 1.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let sel = Rect::new(0.0, 900.0, 100.0, 200.0);
    let shot = capturer.capture_selection(&host, sel, ImageFormat::Png, 90, None).await.unwrap();

    assert_eq!((shot.width, shot.height), (100, 100));
    assert_rows(&decode(&shot.image), 0, 900, WINDOW_ALPHA);
    assert!(shot
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::SelectionOutOfBounds { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_degenerate_selection_is_silent() {
    let host = tall_page(1.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let err = capturer
        .capture_selection(&host, Rect::new(0.0, 0.0, 5.0, 100.0), ImageFormat::Png, 90, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DegenerateSelection { .. }));
    assert!(err.is_silent());
    assert!(host.captures().is_empty());
    assert_eq!(capturer.state(), CaptureState::Failed(ErrorKind::DegenerateSelection));
}

#[tokio::test(start_paused = true)]
async fn test_restricted_capture_restores_page() {
    let host = tall_page(1.0).with_header(20.0).with_scroll(0.0, 120.0).failing_capture(1);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let err = capturer
        .capture_full_page(&host, ImageFormat::Png, 90, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RestrictedSurface);
    assert_eq!(host.scroll(), Point::new(0.0, 120.0));
    assert!(!host.header_hidden());
    assert!(host.progress_cleared() >= 1);
    assert_eq!(capturer.state(), CaptureState::Failed(ErrorKind::RestrictedSurface));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_restores_page() {
    let host = FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 1500.0), 1.0)
        .with_header(20.0)
        .with_scroll(0.0, 90.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();
    let cancel = capturer.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();
    });

    let res = capturer.capture_full_page(&host, ImageFormat::Png, 90, None).await;
    assert!(matches!(res, Err(Error::Cancelled)));
    assert_eq!(host.captures().len(), 2);
    assert_eq!(host.scroll(), Point::new(0.0, 90.0));
    assert!(!host.header_hidden());
    assert_eq!(capturer.state(), CaptureState::Failed(ErrorKind::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_capture_restores_in_background() {
    let host = FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 1500.0), 1.0)
        .with_header(20.0)
        .with_scroll(0.0, 90.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let res = tokio::time::timeout(
        Duration::from_millis(1000),
        capturer.capture_full_page(&host, ImageFormat::Png, 90, None),
    )
    .await;
    assert!(res.is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(host.scroll(), Point::new(0.0, 90.0));
    assert!(!host.header_hidden());
}

#[tokio::test(start_paused = true)]
async fn test_visible_capture() {
    let host = tall_page(2.0).with_scroll(0.0, 120.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let shot = capturer.capture_visible(&host, ImageFormat::Png, 90).await.unwrap();
    assert_eq!((shot.width, shot.height), (400, 600));
    assert_rows(&decode(&shot.image), 0, 240, WINDOW_ALPHA);
    assert!(host.state.lock().unwrap().scrolls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_jpeg_output() {
    let host = tall_page(1.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let shot = capturer.capture_visible(&host, ImageFormat::Jpeg, 70).await.unwrap();
    assert_eq!(image::guess_format(&shot.image).unwrap(), image::ImageFormat::Jpeg);
    assert!(shot.data_url().starts_with("data:image/jpeg;base64,"));
    assert_eq!(shot.sha256_hex().len(), 64);
}

#[tokio::test(start_paused = true)]
async fn test_tile_budget() {
    let host = FakeHost::page(Size::new(200.0, 100.0), Size::new(200.0, 1000.0), 1.0);
    let config = CaptureConfig { max_tiles: 5, ..Default::default() };
    let mut capturer = new_capturer(config).unwrap();

    let err = capturer
        .capture_full_page(&host, ImageFormat::Png, 90, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unmeasurable);
    assert!(host.captures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_surface_driver_scrolls_and_clamps() {
    use rfcapture::surface::SurfaceDriver;

    let host = FakeHost::page(Size::new(400.0, 300.0), Size::new(400.0, 300.0), 1.0)
        .with_container(container(0.0, 200.0, 700.0), false);
    let surface = ScrollSurface::Container(rfcapture::ElementRef::new(CONTAINER_ID));
    let driver = SurfaceDriver::new(&host, &surface, 1000);

    driver.scroll_to(0.0, 120.0).await.unwrap();
    let once = driver.measure().await.unwrap();
    driver.scroll_to(0.0, 120.0).await.unwrap();
    let twice = driver.measure().await.unwrap();
    assert_eq!(once, twice);
    assert_eq!(host.container_scroll(), Some(Point::new(0.0, 120.0)));

    driver.scroll_by(0.0, 1000.0).await.unwrap();
    let m = driver.measure().await.unwrap();
    assert_eq!(m.scroll.y, 500.0);
    assert_eq!(driver.viewport_offset().await.unwrap(), Point::new(30.0, 60.0));
    // the window never moves when a container is driven
    assert_eq!(host.scroll(), Point::default());
}

#[tokio::test(start_paused = true)]
async fn test_missing_container_is_detached() {
    use rfcapture::surface::SurfaceDriver;

    let host = tall_page(1.0);
    let surface = ScrollSurface::Container(rfcapture::ElementRef::new("rf-gone"));
    let driver = SurfaceDriver::new(&host, &surface, 1000);
    let err = driver.measure().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DetachedTarget);
}

#[tokio::test(start_paused = true)]
async fn test_lease_restores_on_release() {
    use rfcapture::lease::PageLease;

    let host = tall_page(1.0).with_header(20.0).with_scroll(0.0, 70.0);
    let mut lease = PageLease::acquire(&host, &ScrollSurface::Window, host.scroll(), 1000);
    assert_eq!(lease.original_scroll(), Point::new(0.0, 70.0));

    host.scroll_to(&ScrollSurface::Window, 0.0, 400.0).await.unwrap();
    assert_eq!(lease.suppress_fixed().await.unwrap(), 1);
    assert_eq!(lease.suppress_fixed().await.unwrap(), 0);
    assert_eq!(lease.hidden().len(), 1);
    assert!(host.header_hidden());

    lease.release().await.unwrap();
    assert_eq!(host.scroll(), Point::new(0.0, 70.0));
    assert!(!host.header_hidden());
}

fn spa_page() -> FakeHost {
    FakeHost::page(Size::new(400.0, 300.0), Size::new(400.0, 300.0), 1.0)
        .with_container(container(0.0, 200.0, 1000.0), true)
}

#[tokio::test(start_paused = true)]
async fn test_selection_detects_container_without_hint() {
    let host = spa_page();
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    // corner is below the fold, so the page's main scroller is used
    let sel = Rect::new(0.0, 400.0, 100.0, 50.0);
    let shot = capturer.capture_selection(&host, sel, ImageFormat::Png, 90, None).await.unwrap();

    assert_eq!((shot.width, shot.height), (100, 50));
    assert_rows(&decode(&shot.image), 0, 400, CONTAINER_ALPHA);
    assert_eq!(host.container_scroll(), Some(Point::default()));
    assert_eq!(host.scroll(), Point::default());
}

#[tokio::test(start_paused = true)]
async fn test_selection_anchor_picks_surface_under_corner() {
    let host = spa_page();
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let inside = Rect::new(40.0, 100.0, 50.0, 20.0);
    let shot = capturer.capture_selection(&host, inside, ImageFormat::Png, 90, None).await.unwrap();
    let img = decode(&shot.image);
    assert_rows(&img, 0, 100, CONTAINER_ALPHA);
    assert_eq!(decode_pixel(img.get_pixel(0, 0)).1, 40);
    assert_eq!(host.captures().len(), 1);
    assert_eq!(host.container_scroll(), Some(Point::default()));

    // a corner left of the container lands on the window
    let header = Rect::new(10.0, 10.0, 15.0, 20.0);
    let shot = capturer.capture_selection(&host, header, ImageFormat::Png, 90, None).await.unwrap();
    assert_eq!((shot.width, shot.height), (15, 20));
    assert_rows(&decode(&shot.image), 0, 10, WINDOW_ALPHA);
}

#[tokio::test(start_paused = true)]
async fn test_selection_outside_content_is_reported() {
    let host = FakeHost::page(Size::new(200.0, 300.0), Size::new(200.0, 1000.0), 1.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let err = capturer
        .capture_selection(&host, Rect::new(0.0, 1200.0, 100.0, 50.0), ImageFormat::Png, 90, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SelectionOutOfBounds { .. }));
    assert!(!err.is_silent());
    assert!(host.captures().is_empty());
    assert_eq!(capturer.state(), CaptureState::Failed(ErrorKind::SelectionOutOfBounds));
}

#[tokio::test(start_paused = true)]
async fn test_tall_selection_in_container() {
    for &dpr in &[1.0, 2.0] {
        let host = FakeHost::page(Size::new(400.0, 300.0), Size::new(400.0, 300.0), dpr)
            .with_container(container(10.0, 100.0, 1000.0), false);
        let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

        let surface = ScrollSurface::Container(rfcapture::ElementRef::new(CONTAINER_ID));
        let sel = Rect::new(0.0, 150.0, 300.0, 250.0);
        let shot = capturer
            .capture_selection(&host, sel, ImageFormat::Png, 90, Some(surface))
            .await
            .unwrap();

        assert_eq!((shot.width, shot.height), ((300.0 * dpr) as u32, (250.0 * dpr) as u32));
        assert_rows(&decode(&shot.image), 0, (150.0 * dpr) as u32, CONTAINER_ALPHA);
        assert_eq!(host.captures().len(), 3);
        assert_eq!(host.container_scroll(), Some(Point::new(0.0, 10.0)));
        assert!(shot.diagnostics.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_wide_selection_is_limited_to_client_width() {
    let host = FakeHost::page(Size::new(200.0, 100.0), Size::new(400.0, 1000.0), 1.0);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let tall = capturer
        .capture_selection(&host, Rect::new(0.0, 0.0, 300.0, 250.0), ImageFormat::Png, 90, None)
        .await
        .unwrap();
    let short = capturer
        .capture_selection(&host, Rect::new(0.0, 0.0, 300.0, 80.0), ImageFormat::Png, 90, None)
        .await
        .unwrap();
    assert_eq!((tall.width, tall.height), (200, 250));
    assert_eq!((short.width, short.height), (200, 80));

    let img = decode(&tall.image);
    for y in [0, 10, 120, 249] {
        let p = img.get_pixel(199, y);
        assert_eq!(p[3], WINDOW_ALPHA, "transparent column at row {}", y);
        assert_eq!(decode_pixel(p), (y, 199));
    }
}

#[tokio::test(start_paused = true)]
async fn test_fractional_dpr_full_page_has_no_gaps() {
    let host = FakeHost::page(Size::new(200.0, 604.0), Size::new(200.0, 2000.0), 1.1);
    let mut capturer = new_capturer(CaptureConfig::default()).unwrap();

    let shot = capturer.capture_full_page(&host, ImageFormat::Png, 90, None).await.unwrap();
    let img = decode(&shot.image);
    assert_eq!(img.dimensions(), (220, 2200));

    for y in 0..img.height() {
        let p = img.get_pixel(0, y);
        assert_eq!(p[3], WINDOW_ALPHA, "transparent row {}", y);
        let (row, _) = decode_pixel(p);
        // scroll offsets snap to whole device rows, so tiles may sit one row off
        assert!(row.abs_diff(y) <= 1, "row {} shows content row {}", y, row);
    }
    // the last tile is placed flush with the bottom
    assert_eq!(decode_pixel(img.get_pixel(0, 2199)).0, 2199);
}
