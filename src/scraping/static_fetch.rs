//! Static HTTP scraper (spec §4.1): a plain `reqwest` GET with no JS
//! rendering. Cheaper and faster than the headless scraper, at the cost
//! of `can_render_page() == false` — `js`/`dom` catalog signals never run
//! against its Observations (spec §4.2).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use scraper::{Html, Selector};

use crate::error::{FingerprintError, Result};
use crate::observation::{CertificateInfo, MultiMap, Observation};

use super::common::{dns_lookup, fetch_favicon};
use super::robots::RobotsCache;
use super::{PageHandle, Scraper};

pub struct StaticScraper {
    client: reqwest::Client,
    user_agent: String,
    robots: RobotsCache,
    depth: AtomicU8,
}

impl StaticScraper {
    pub fn new(user_agent: impl Into<String>, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let user_agent = user_agent.into();
        let client = reqwest::Client::builder()
            .user_agent(&user_agent)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::limited(1))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| FingerprintError::invalid_input(e.to_string()))?;
        let robots = RobotsCache::new(user_agent.clone(), client.clone());
        Ok(StaticScraper { client, user_agent, robots, depth: AtomicU8::new(0) })
    }
}

#[async_trait::async_trait]
impl Scraper for StaticScraper {
    async fn scrape(&self, url: &str) -> Result<(Observation, PageHandle)> {
        if self.depth.load(Ordering::Relaxed) > 0 && !self.robots.is_allowed(url).await {
            return Err(FingerprintError::scrape_failure(url, "disallowed by robots.txt"));
        }

        // Retries connect/timeout failures only; a non-2xx status is not an error here.
        let backoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::from_secs(3)))
            .build();
        let response = retry(backoff, || async {
            self.client.get(url).send().await.map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
        .map_err(|e| FingerprintError::NetworkFailure { url: url.to_string(), source: e })?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = MultiMap::new();
        for (name, value) in response.headers().iter() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str(), v);
            }
        }
        let cookies = parse_cookies(&headers);

        let body = response
            .text()
            .await
            .map_err(|e| FingerprintError::NetworkFailure { url: url.to_string(), source: e })?;

        let doc = Html::parse_document(&body);
        let title = extract_title(&doc);
        let scripts = extract_scripts(&doc);
        let meta = extract_meta(&doc);

        let (favicon, favicon_hash) = match fetch_favicon(&self.client, &final_url, &body).await {
            Some((b64, hash)) => (Some(b64), Some(hash)),
            None => (None, None),
        };
        let dns = dns_lookup(&final_url).await;

        let observation = Observation {
            url: final_url,
            status_code,
            title,
            html: body,
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
        Ok((observation, PageHandle::None))
    }

    fn can_render_page(&self) -> bool {
        false
    }

    async fn eval_js(&self, _page: &PageHandle, _expr: &str) -> Option<String> {
        None
    }

    fn set_depth(&self, depth: u8) {
        self.depth.store(depth, Ordering::Relaxed);
    }

    /// Nothing to return — this scraper never hands out a live page handle.
    async fn release(&self, _page: PageHandle) {}

    async fn close(&self) {}
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

fn parse_cookies(headers: &MultiMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(values) = headers.get("set-cookie") {
        for raw in values {
            if let Some((pair, _attrs)) = raw.split_once(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    out.insert(name.trim().to_string(), value.trim().to_string());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_scripts_and_meta() {
        let html = r#"<html><head><title>Hi</title>
            <meta name="generator" content="WordPress 6.4">
            <script src="/app.js"></script></head><body></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_title(&doc), "Hi");
        assert_eq!(extract_scripts(&doc), vec!["/app.js".to_string()]);
        assert_eq!(extract_meta(&doc).get("generator"), Some(&["WordPress 6.4".to_string()][..]));
    }

    #[test]
    fn parses_name_value_out_of_set_cookie() {
        let mut headers = MultiMap::new();
        headers.insert("Set-Cookie", "sessionid=abc123; Path=/; HttpOnly");
        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("sessionid"), Some(&"abc123".to_string()));
    }
}
