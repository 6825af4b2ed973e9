//! Bounded-depth same-host crawl driver (spec §4.5, C7). Expands outgoing
//! links from the seed URL up to `max_depth`, staying on the seed's host,
//! deduplicating against a global visited set, and pacing requests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;

use crate::config::FingerprintConfig;
use crate::error::Result;
use crate::observation::Observation;
use crate::scraping::{PageHandle, Scraper};

/// Tracks which URLs have already been visited across an entire crawl,
/// so redirects and repeated links are only fetched once (spec §4.5:
/// "a redirected final URL counts as visited under its final form").
pub struct VisitedSet {
    seen: Mutex<HashSet<String>>,
    max: usize,
}

impl VisitedSet {
    pub fn new(max: usize) -> Self {
        VisitedSet { seen: Mutex::new(HashSet::new()), max }
    }

    /// Attempt to claim `url` for visiting. Returns `false` if already
    /// visited or if `max_visited_links` has been reached.
    fn try_claim(&self, url: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        if seen.len() >= self.max || seen.contains(url) {
            return false;
        }
        seen.insert(url.to_string());
        true
    }
}

/// Crawl `seed_url` up to `config.resolve_max_depth()` levels deep on the
/// same host, invoking `on_page` once per successfully scraped page while
/// its page handle is still live, then releasing the handle back to the
/// scraper (spec §4.5; spec §9 "do not leak page handles across workers" —
/// each handle is used and released within this single crawl, never
/// passed to another task). A scrape failure on one link is logged and
/// skipped; it never aborts the rest of the crawl (spec §7).
pub async fn crawl<F>(
    scraper: &dyn Scraper,
    seed_url: &str,
    config: &FingerprintConfig,
    visited: &VisitedSet,
    mut on_page: F,
) -> Result<()>
where
    F: for<'p> FnMut(u8, Observation, &'p PageHandle) -> futures::future::BoxFuture<'p, ()>,
{
    let max_depth = config.resolve_max_depth();
    let delay = Duration::from_millis(config.resolve_delay_ms());
    let seed = Url::parse(seed_url).map_err(|e| crate::error::FingerprintError::invalid_input(e.to_string()))?;
    let host = seed.host_str().map(|h| h.to_string());

    let mut frontier = vec![seed_url.to_string()];

    for depth in 0..=max_depth {
        scraper.set_depth(depth);
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();

        for url in frontier.drain(..) {
            if !visited.try_claim(&url) {
                continue;
            }
            match scraper.scrape(&url).await {
                Ok((observation, page_handle)) => {
                    // A redirect can land on a page already reached (and claimed)
                    // via a different frontier link; count it visited under its
                    // final form and skip re-processing (spec §4.5).
                    let redirected_to_seen =
                        observation.url != url && !visited.try_claim(&observation.url);
                    if redirected_to_seen {
                        scraper.release(page_handle).await;
                    } else {
                        if depth < max_depth {
                            next_frontier.extend(same_host_links(&observation, &host));
                        }
                        on_page(depth, observation, &page_handle).await;
                        scraper.release(page_handle).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("crawl: skipping {url}: {e}");
                }
            }
            tokio::time::sleep(delay).await;
        }

        frontier = next_frontier;
    }

    Ok(())
}

/// Every `<a href>` in the page that resolves to the seed's host,
/// deduplicated, as absolute URLs.
fn same_host_links(observation: &Observation, host: &Option<String>) -> Vec<String> {
    static LINK: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    let selector = LINK.get_or_init(|| Selector::parse("a[href]").unwrap());

    let Some(host) = host else {
        return Vec::new();
    };
    let Ok(base) = Url::parse(&observation.url) else {
        return Vec::new();
    };

    let doc = Html::parse_document(&observation.html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for el in doc.select(selector) {
        let Some(href) = el.value().attr("href") else { continue };
        let Ok(absolute) = base.join(href) else { continue };
        if absolute.host_str() != Some(host.as_str()) {
            continue;
        }
        let normalized = absolute.to_string();
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{CertificateInfo, MultiMap};

    fn obs(url: &str, html: &str) -> Observation {
        Observation {
            url: url.to_string(),
            status_code: 200,
            title: String::new(),
            html: html.to_string(),
            headers: MultiMap::new(),
            scripts: vec![],
            cookies: Default::default(),
            meta: MultiMap::new(),
            dns: Default::default(),
            cert_issuer: vec![],
            favicon: None,
            favicon_hash: None,
            certificate: CertificateInfo::default(),
        }
    }

    #[test]
    fn same_host_links_filters_external_hosts() {
        let html = r#"<a href="/about">About</a><a href="https://other.example.com/x">Other</a>"#;
        let observation = obs("https://example.com/", html);
        let host = Some("example.com".to_string());
        let links = same_host_links(&observation, &host);
        assert_eq!(links, vec!["https://example.com/about".to_string()]);
    }

    #[test]
    fn visited_set_rejects_duplicates_and_caps() {
        let visited = VisitedSet::new(2);
        assert!(visited.try_claim("https://example.com/a"));
        assert!(!visited.try_claim("https://example.com/a"));
        assert!(visited.try_claim("https://example.com/b"));
        assert!(!visited.try_claim("https://example.com/c"));
    }

    /// Scraper stub that serves a fixed page per URL and records every
    /// `release` call, so `crawl` can be exercised without any network.
    struct StubScraper {
        pages: std::collections::HashMap<String, String>,
        released: std::sync::Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl Scraper for StubScraper {
        async fn scrape(&self, url: &str) -> Result<(Observation, PageHandle)> {
            let html = self.pages.get(url).cloned().unwrap_or_default();
            Ok((obs(url, &html), PageHandle::None))
        }

        fn can_render_page(&self) -> bool {
            false
        }

        async fn eval_js(&self, _page: &PageHandle, _expr: &str) -> Option<String> {
            None
        }

        fn set_depth(&self, _depth: u8) {}

        async fn release(&self, _page: PageHandle) {
            *self.released.lock().unwrap() += 1;
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn crawl_invokes_callback_and_releases_every_page() {
        let mut pages = std::collections::HashMap::new();
        pages.insert(
            "https://example.com/".to_string(),
            r#"<a href="https://example.com/about">About</a>"#.to_string(),
        );
        pages.insert("https://example.com/about".to_string(), "<p>about</p>".to_string());
        let scraper = StubScraper { pages, released: std::sync::Mutex::new(0) };

        let mut config = FingerprintConfig::default();
        config.max_depth = Some(1);
        config.ms_delay_between_requests = Some(0);
        let visited = VisitedSet::new(10);

        let visited_urls = std::sync::Mutex::new(Vec::new());
        crawl(&scraper, "https://example.com/", &config, &visited, |_depth, observation, _page| {
            visited_urls.lock().unwrap().push(observation.url.clone());
            let fut: futures::future::BoxFuture<'_, ()> = Box::pin(async {});
            fut
        })
        .await
        .unwrap();

        let mut got = visited_urls.into_inner().unwrap();
        got.sort();
        assert_eq!(got, vec!["https://example.com/".to_string(), "https://example.com/about".to_string()]);
        assert_eq!(*scraper.released.lock().unwrap(), 2);
    }
}
