//! Chrome DevTools Protocol host implementation

use crate::geometry::LayoutProbe;
use crate::host::{DetectionProbe, ElementRef, Host, ScrollSurface};
use crate::{CaptureConfig, Error, ImageFormat, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

// Every in-page script runs inside this envelope so exceptions come back as data.
const ENVELOPE: &str = r#"(function(){
    function stamp(el) {
        if (!el.dataset.rfcaptureId) {
            window.__rfcaptureSeq = (window.__rfcaptureSeq || 0) + 1;
            el.dataset.rfcaptureId = 'rf-' + window.__rfcaptureSeq;
        }
        return el.dataset.rfcaptureId;
    }
    function byRef(id) {
        var el = document.querySelector('[data-rfcapture-id="' + id + '"]');
        if (!el) { throw new Error('detached element ' + id); }
        return el;
    }
    try {
        var out = (function(){ {{BODY}} })();
        return JSON.stringify({ ok: out === undefined ? null : out });
    } catch (e) {
        return JSON.stringify({ error: String(e) });
    }
})()"#;

const MEASURE_WINDOW: &str = r#"
    var d = document.documentElement, b = document.body || d;
    return {
        scrollSize: { width: Math.max(d.scrollWidth, b.scrollWidth), height: Math.max(d.scrollHeight, b.scrollHeight) },
        offsetSize: { width: Math.max(d.offsetWidth, b.offsetWidth), height: Math.max(d.offsetHeight, b.offsetHeight) },
        clientSize: { width: d.clientWidth || window.innerWidth, height: d.clientHeight || window.innerHeight },
        scrollOffset: { x: window.scrollX, y: window.scrollY },
        origin: { x: 0, y: 0 },
        devicePixelRatio: window.devicePixelRatio || 1
    };"#;

const MEASURE_CONTAINER: &str = r#"
    var el = byRef({{REF}});
    var r = el.getBoundingClientRect();
    return {
        scrollSize: { width: el.scrollWidth, height: el.scrollHeight },
        offsetSize: { width: el.scrollWidth, height: el.scrollHeight },
        clientSize: { width: el.clientWidth, height: el.clientHeight },
        scrollOffset: { x: el.scrollLeft, y: el.scrollTop },
        origin: { x: r.left + el.clientLeft, y: r.top + el.clientTop },
        devicePixelRatio: window.devicePixelRatio || 1
    };"#;

const FIXED_ELEMENTS: &str = r#"
    var out = [];
    var all = document.body ? document.body.getElementsByTagName('*') : [];
    for (var i = 0; i < all.length; i++) {
        var el = all[i];
        var cs = getComputedStyle(el);
        if ((cs.position === 'fixed' || cs.position === 'sticky') && cs.visibility !== 'hidden' && cs.display !== 'none') {
            var r = el.getBoundingClientRect();
            if (r.width > 0 && r.height > 0) { out.push(stamp(el)); }
        }
    }
    return out;"#;

const SET_VISIBILITY: &str = r#"
    var ids = {{IDS}}, hide = {{HIDE}}, n = 0;
    ids.forEach(function(id){
        var el = document.querySelector('[data-rfcapture-id="' + id + '"]');
        if (!el) { return; }
        if (hide) {
            if (el.dataset.rfcapturePrev === undefined) { el.dataset.rfcapturePrev = el.style.visibility || ''; }
            el.style.setProperty('visibility', 'hidden', 'important');
        } else if (el.dataset.rfcapturePrev !== undefined) {
            el.style.removeProperty('visibility');
            if (el.dataset.rfcapturePrev) { el.style.visibility = el.dataset.rfcapturePrev; }
            delete el.dataset.rfcapturePrev;
        }
        n++;
    });
    return n;"#;

const PROBE_CONTAINERS: &str = r#"
    var STRUCTURAL = ['main', '[role="main"]', '#app', '#root', '#__next', '.main-content', '.content', '[data-scroll-container]'];
    function candidate(el) {
        var cs = getComputedStyle(el);
        var r = el.getBoundingClientRect();
        var ov = cs.overflowY === 'overlay' ? 'auto' : cs.overflowY;
        return {
            element: stamp(el), overflowY: ov,
            scrollHeight: el.scrollHeight, clientHeight: el.clientHeight,
            bounds: { x: r.left, y: r.top, width: r.width, height: r.height }
        };
    }
    var seen = new Set(), structural = [], blocks = [];
    STRUCTURAL.forEach(function(sel){
        document.querySelectorAll(sel).forEach(function(el){
            if (!seen.has(el)) { seen.add(el); structural.push(candidate(el)); }
        });
    });
    var all = document.body ? document.body.getElementsByTagName('*') : [];
    for (var i = 0; i < all.length; i++) {
        var el = all[i];
        if (seen.has(el) || el.scrollHeight <= el.clientHeight) { continue; }
        var cs = getComputedStyle(el);
        if (cs.display === 'inline' || cs.display === 'none') { continue; }
        if (cs.overflowY !== 'auto' && cs.overflowY !== 'scroll' && cs.overflowY !== 'overlay') { continue; }
        blocks.push(candidate(el));
    }
    return { structural: structural, blocks: blocks, viewport: { width: window.innerWidth, height: window.innerHeight } };"#;

#[derive(Deserialize)]
struct Envelope<T> {
    ok: Option<T>,
    error: Option<String>,
}

fn script(body: &str) -> String {
    ENVELOPE.replace("{{BODY}}", body)
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn scroll_script(surface: &ScrollSurface, x: f64, y: f64) -> String {
    match surface {
        ScrollSurface::Window => script(&format!(
            "window.scrollTo({{ left: {}, top: {}, behavior: 'instant' }}); return true;",
            x, y
        )),
        ScrollSurface::Container(el) => script(&format!(
            "byRef({}).scrollTo({{ left: {}, top: {}, behavior: 'instant' }}); return true;",
            js_string(el.as_str()),
            x,
            y
        )),
    }
}

fn is_detached(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    m.contains("detached") || m.contains("no target") || m.contains("target closed") || m.contains("connection closed")
}

/// Map a backend failure onto the engine's error taxonomy.
fn classify(err: anyhow::Error, fallback: fn(String) -> Error) -> Error {
    let msg = err.to_string();
    if is_detached(&msg) {
        Error::DetachedTarget(msg)
    } else {
        fallback(msg)
    }
}

/// CDP-backed capture host over one headless Chrome tab.
///
/// Element references are stamped onto the page as `data-rfcapture-id`
/// attributes. Blocking `headless_chrome` calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct CdpHost {
    browser: Option<Arc<Browser>>,
    tab: Arc<Tab>,
    navigation_timeout_ms: u64,
}

impl CdpHost {
    /// Launch headless Chrome at the configured viewport and scale factor.
    pub fn launch(config: &CaptureConfig) -> Result<Self> {
        let scale_arg = format!("--force-device-scale-factor={}", config.device_scale_factor);
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .args(vec![OsStr::new(&scale_arg), OsStr::new("--hide-scrollbars")])
            .idle_browser_timeout(Duration::from_millis(config.host_timeout_ms.max(30_000)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options).map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        Ok(Self {
            browser: Some(Arc::new(browser)),
            tab,
            navigation_timeout_ms: config.host_timeout_ms,
        })
    }

    /// Wrap a tab owned by someone else.
    pub fn from_tab(tab: Arc<Tab>) -> Self {
        Self {
            browser: None,
            tab,
            navigation_timeout_ms: CaptureConfig::default().host_timeout_ms,
        }
    }

    /// The browser this host launched, if it owns one.
    pub fn browser(&self) -> Option<&Arc<Browser>> {
        self.browser.as_ref()
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    pub async fn load_url(&self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        let task = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        });
        let limit = self.navigation_timeout_ms;
        tokio::time::timeout(Duration::from_millis(limit), task)
            .await
            .map_err(|_| Error::Timeout(limit))?
            .map_err(|e| Error::Other(format!("navigation task failed: {}", e)))?
            .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))
    }

    async fn eval<T>(&self, source: String, fallback: fn(String) -> Error) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tab = self.tab.clone();
        let remote = tokio::task::spawn_blocking(move || tab.evaluate(&source, false))
            .await
            .map_err(|e| Error::Other(format!("evaluation task failed: {}", e)))?
            .map_err(|e| classify(e, fallback))?;

        let text = remote
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| fallback("script returned no value".into()))?
            .to_string();
        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| fallback(format!("malformed script result: {}", e)))?;
        if let Some(err) = envelope.error {
            return Err(if is_detached(&err) { Error::DetachedTarget(err) } else { fallback(err) });
        }
        envelope.ok.ok_or_else(|| fallback("script returned null".into()))
    }
}

impl Host for CdpHost {
    async fn measure_scroll(&self, surface: &ScrollSurface) -> Result<LayoutProbe> {
        let body = match surface {
            ScrollSurface::Window => MEASURE_WINDOW.to_string(),
            ScrollSurface::Container(el) => MEASURE_CONTAINER.replace("{{REF}}", &js_string(el.as_str())),
        };
        self.eval(script(&body), Error::Unmeasurable).await
    }

    async fn scroll_to(&self, surface: &ScrollSurface, x: f64, y: f64) -> Result<()> {
        let _: bool = self.eval(scroll_script(surface, x, y), Error::Unmeasurable).await?;
        Ok(())
    }

    async fn capture_viewport(&self, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
        let tab = self.tab.clone();
        let (fmt, quality) = match format {
            ImageFormat::Png => (Page::CaptureScreenshotFormatOption::Png, None),
            ImageFormat::Jpeg => (Page::CaptureScreenshotFormatOption::Jpeg, Some(u32::from(quality))),
        };
        tokio::task::spawn_blocking(move || tab.capture_screenshot(fmt, quality, None, true))
            .await
            .map_err(|e| Error::Other(format!("screenshot task failed: {}", e)))?
            .map_err(|e| classify(e, Error::RestrictedSurface))
    }

    async fn fixed_elements(&self) -> Result<Vec<ElementRef>> {
        let ids: Vec<String> = self.eval(script(FIXED_ELEMENTS), Error::Unmeasurable).await?;
        Ok(ids.into_iter().map(ElementRef).collect())
    }

    async fn set_element_visibility(&self, elements: &[ElementRef], hidden: bool) -> Result<()> {
        let ids: Vec<&str> = elements.iter().map(|e| e.as_str()).collect();
        let ids = serde_json::to_string(&ids).map_err(|e| Error::Other(e.to_string()))?;
        let body = SET_VISIBILITY.replace("{{IDS}}", &ids).replace("{{HIDE}}", if hidden { "true" } else { "false" });
        let n: u32 = self.eval(script(&body), Error::Unmeasurable).await?;
        debug!("visibility of {} elements set (hidden={})", n, hidden);
        Ok(())
    }

    async fn probe_containers(&self) -> Result<DetectionProbe> {
        self.eval(script(PROBE_CONTAINERS), Error::Unmeasurable).await
    }

    fn send_progress(&self, percent: u8) {
        debug!("capture progress {}%", percent);
    }
}
