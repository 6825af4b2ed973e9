//! Headless-browser scraper (spec §4.1): navigates real Chromium via
//! `chromiumoxide`, reusing the browser-discovery and headless-config
//! logic this crate already carried for native rendering, and a trimmed
//! version of its stealth injection for standard stealth flags (spec §1
//! Non-goals calls out "no full fingerprint evasion suite" — this keeps
//! the baseline navigator/canvas spoofing, not the mouse/scroll humanizer).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use scraper::{Html, Selector};
use tokio::sync::{Mutex, Semaphore};

use crate::error::{FingerprintError, Result};
use crate::observation::{CertificateInfo, MultiMap, Observation};

use super::common::{dns_lookup, fetch_favicon};
use super::robots::RobotsCache;
use super::{browser_manager, PageHandle, Scraper};

const DEFAULT_POOL_SIZE: usize = 10;
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);
const JS_EVAL_TIMEOUT: Duration = Duration::from_secs(3);

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

/// A pooled, navigable page. Cheap to clone — every clone points at the
/// same live chromiumoxide page.
#[derive(Clone)]
pub struct BrowserPage(Arc<Page>);

pub struct HeadlessScraper {
    browser: Arc<Mutex<Browser>>,
    _handler_task: tokio::task::JoinHandle<()>,
    pool: Mutex<VecDeque<Arc<Page>>>,
    permits: Semaphore,
    robots: RobotsCache,
    client: reqwest::Client,
    depth: AtomicU8,
}

impl HeadlessScraper {
    pub async fn launch(user_agent: impl Into<String>, pool_size: Option<usize>) -> Result<Self> {
        let user_agent = user_agent.into();
        let exe = browser_manager::find_chrome_executable()
            .ok_or_else(|| FingerprintError::invalid_input("no Chromium-family browser found; set CHROME_EXECUTABLE"))?;
        let config = browser_manager::build_headless_config(&exe, None, 1280, 900)
            .map_err(|e| FingerprintError::invalid_input(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FingerprintError::invalid_input(format!("launching {exe}: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("chromium CDP handler error: {e}");
                }
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(&user_agent)
            .build()
            .map_err(|e| FingerprintError::invalid_input(e.to_string()))?;
        let robots = RobotsCache::new(user_agent, client.clone());

        Ok(HeadlessScraper {
            browser: Arc::new(Mutex::new(browser)),
            _handler_task: handler_task,
            pool: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(pool_size.unwrap_or(DEFAULT_POOL_SIZE)),
            robots,
            client,
            depth: AtomicU8::new(0),
        })
    }

    /// Acquire a page from the pool, blocking until one is free (spec
    /// §4.1: "fixed-size reusable page pool"). Creates a fresh page the
    /// first `pool_size` times the pool is drawn from.
    async fn get_page(&self) -> Result<(Arc<Page>, tokio::sync::SemaphorePermit<'_>)> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FingerprintError::invalid_input("page pool semaphore closed"))?;

        let pooled = self.pool.lock().await.pop_front();
        let page = match pooled {
            Some(page) => page,
            None => {
                let browser = self.browser.lock().await;
                let page = browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| FingerprintError::invalid_input(format!("opening page: {e}")))?;
                page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
                    .await
                    .map_err(|e| FingerprintError::invalid_input(format!("injecting stealth script: {e}")))?;
                Arc::new(page)
            }
        };
        Ok((page, permit))
    }

    /// Return a page to the pool after navigating it back to a blank
    /// document, so the next caller doesn't inherit page state.
    async fn put_page(&self, page: Arc<Page>) {
        let _ = page.goto("about:blank").await;
        self.pool.lock().await.push_back(page);
    }

    async fn navigate_and_capture(&self, page: &Page, url: &str) -> Result<(u16, MultiMap)> {
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| FingerprintError::scrape_failure(url, format!("listening for response: {e}")))?;

        tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(url))
            .await
            .map_err(|_| FingerprintError::scrape_failure(url, "navigation timed out"))?
            .map_err(|e| FingerprintError::scrape_failure(url, e.to_string()))?;

        let mut status_code = 200u16;
        let mut headers = MultiMap::new();
        if let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), responses.next()).await {
            status_code = event.response.status as u16;
            if let Some(extra) = &event.response.headers.inner().as_object() {
                for (k, v) in extra.iter() {
                    if let Some(s) = v.as_str() {
                        headers.insert(k, s);
                    }
                }
            }
        }

        tokio::time::timeout(NAVIGATION_TIMEOUT, page.wait_for_navigation())
            .await
            .ok();

        Ok((status_code, headers))
    }
}

#[async_trait::async_trait]
impl Scraper for HeadlessScraper {
    async fn scrape(&self, url: &str) -> Result<(Observation, PageHandle)> {
        if self.depth.load(Ordering::Relaxed) > 0 && !self.robots.is_allowed(url).await {
            return Err(FingerprintError::scrape_failure(url, "disallowed by robots.txt"));
        }

        let (page, permit) = self.get_page().await?;
        let result = self.navigate_and_capture(&page, url).await;
        let (status_code, headers) = match result {
            Ok(v) => v,
            Err(e) => {
                drop(permit);
                self.put_page(page).await;
                return Err(e);
            }
        };

        let html = page
            .content()
            .await
            .unwrap_or_default();
        drop(permit);

        let doc = Html::parse_document(&html);
        let title = extract_title(&doc);
        let scripts = extract_scripts(&doc);
        let meta = extract_meta(&doc);
        let cookies = fetch_cookies(&page).await;

        let (favicon, favicon_hash) = match fetch_favicon(&self.client, url, &html).await {
            Some((b64, hash)) => (Some(b64), Some(hash)),
            None => (None, None),
        };
        let dns = dns_lookup(url).await;

        let observation = Observation {
            url: url.to_string(),
            status_code,
            title,
            html,
            headers,
            scripts,
            cookies,
            meta,
            dns,
            cert_issuer: Vec::new(),
            favicon,
            favicon_hash,
            certificate: CertificateInfo::default(),
        };

        Ok((observation, PageHandle::Browser(BrowserPage(page))))
    }

    fn can_render_page(&self) -> bool {
        true
    }

    async fn eval_js(&self, page: &PageHandle, expr: &str) -> Option<String> {
        let PageHandle::Browser(BrowserPage(page)) = page else {
            return None;
        };
        let eval = tokio::time::timeout(JS_EVAL_TIMEOUT, page.evaluate(expr)).await.ok()??;
        let value: serde_json::Value = eval.into_value().ok()?;
        match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn set_depth(&self, depth: u8) {
        self.depth.store(depth, Ordering::Relaxed);
    }

    /// Returns the underlying page to the pool (spec §4.1 `put_page`).
    /// `PageHandle::None` (never produced by this scraper) is ignored.
    async fn release(&self, page: PageHandle) {
        if let PageHandle::Browser(BrowserPage(page)) = page {
            self.put_page(page).await;
        }
    }

    async fn close(&self) {
        self.pool.lock().await.clear();
        if let Err(e) = self.browser.lock().await.close().await {
            tracing::warn!("error closing browser: {e}");
        }
    }
}

async fn fetch_cookies(page: &Page) -> std::collections::BTreeMap<String, String> {
    page.get_cookies()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|c| (c.name, c.value))
        .collect()
}

fn extract_title(doc: &Html) -> String {
    static TITLE: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    let sel = TITLE.get_or_init(|| Selector::parse("title").unwrap());
    doc.select(sel).next().map(|e| e.text().collect::<String>()).unwrap_or_default()
}

fn extract_scripts(doc: &Html) -> Vec<String> {
    static SCRIPT: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    let sel = SCRIPT.get_or_init(|| Selector::parse("script[src]").unwrap());
    doc.select(sel)
        .filter_map(|e| e.value().attr("src"))
        .map(|s| s.to_string())
        .collect()
}

fn extract_meta(doc: &Html) -> MultiMap {
    static META: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    let sel = META.get_or_init(|| Selector::parse("meta").unwrap());
    let mut out = MultiMap::new();
    for el in doc.select(sel) {
        let name = el.value().attr("name").or_else(|| el.value().attr("property"));
        if let (Some(name), Some(content)) = (name, el.value().attr("content")) {
            out.insert(name, content);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_scripts_from_rendered_html() {
        let html = r#"<html><head><title>Rendered</title>
            <script src="/bundle.js"></script></head><body></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_title(&doc), "Rendered");
        assert_eq!(extract_scripts(&doc), vec!["/bundle.js".to_string()]);
    }
}
