//! Worker pool (spec §4.7, C9): fans a list of input URLs across N
//! bounded-concurrency in-flight fetches, each running the full pipeline —
//! crawl, pattern engine, rule engine, fusion — once per URL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::catalog::Catalog;
use crate::config::FingerprintConfig;
use crate::crawl::{self, VisitedSet};
use crate::error::{FingerprintError, Result};
use crate::fusion;
use crate::pattern_engine;
use crate::result::{self, FingerResult};
use crate::rules::RuleDocument;
use crate::scraping::{PageHandle, Scraper, ScraperJsEvaluator};

/// Cooperative cancellation flag shared across every worker. Checked
/// before blocking on the next task and before emitting a result (spec
/// §4.7).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Emitted once per completed URL. `percent` is `100 / |urls|` per the
/// spec's declared `onePercent` formula, rounded to the nearest integer.
#[derive(Debug, Clone)]
pub struct Progress {
    pub url: String,
    pub percent: u32,
}

pub struct WorkerPool<'a> {
    catalog: &'a Catalog,
    rules: &'a [RuleDocument],
    config: &'a FingerprintConfig,
}

impl<'a> WorkerPool<'a> {
    pub fn new(catalog: &'a Catalog, rules: &'a [RuleDocument], config: &'a FingerprintConfig) -> Self {
        WorkerPool { catalog, rules, config }
    }

    /// Run the full pipeline for every URL in `urls`, fanning across
    /// `config.resolve_workers()` concurrent in-flight fetches that share
    /// one scraper instance. Returns whatever URLs completed before
    /// cancellation or exhaustion; per-URL failures are logged and simply
    /// omitted (spec §7). `on_progress` fires once per URL actually
    /// attempted, at `100 / |urls|` per completion (spec §4.7), rounded to
    /// the nearest integer — a URL skipped because cancellation already
    /// fired before it started does not advance progress.
    pub async fn run(
        &self,
        urls: Vec<String>,
        scraper: Arc<dyn Scraper>,
        cancel: CancellationToken,
        mut on_progress: impl FnMut(Progress) + Send,
    ) -> Result<Vec<FingerResult>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let total = urls.len();
        let one_percent = 100.0 / total as f64;
        let worker_count = self.config.resolve_workers().max(1);

        let catalog = self.catalog;
        let rules = self.rules;
        let config = self.config;

        let mut fetches = stream::iter(urls)
            .map(|url| {
                let scraper = scraper.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (url, None);
                    }
                    let outcome = process_url(&url, scraper.as_ref(), catalog, rules, config).await;
                    (url, Some(outcome))
                }
            })
            .buffer_unordered(worker_count);

        let mut results = Vec::new();
        let mut completed = 0u32;
        while let Some((url, outcome)) = fetches.next().await {
            match outcome {
                Some(Ok(fetched)) => {
                    results.extend(fetched);
                    completed += 1;
                    on_progress(Progress { url, percent: (one_percent * completed as f64).round() as u32 });
                }
                Some(Err(e)) => {
                    tracing::error!("worker: giving up on {url}: {e}");
                    completed += 1;
                    on_progress(Progress { url, percent: (one_percent * completed as f64).round() as u32 });
                }
                None => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(FingerprintError::Cancelled);
        }

        Ok(results)
    }
}

async fn process_url(
    url: &str,
    scraper: &dyn Scraper,
    catalog: &Catalog,
    rules: &[RuleDocument],
    config: &FingerprintConfig,
) -> Result<Vec<FingerResult>> {
    let deadline = Duration::from_secs(config.resolve_per_url_deadline_seconds());
    let visited = VisitedSet::new(config.resolve_max_visited_links());
    let out = Mutex::new(Vec::new());

    crawl::crawl(scraper, url, config, &visited, |_depth, observation, page_handle| {
        let out = &out;
        let fut: futures::future::BoxFuture<'_, ()> = Box::pin(async move {
            let evaluator = matches!(page_handle, PageHandle::Browser(_))
                .then(|| ScraperJsEvaluator { scraper, page: page_handle });
            let pattern_fut = pattern_engine::run(catalog, &observation, evaluator.as_ref().map(|e| e as _));
            let pattern_detected = match tokio::time::timeout(deadline, pattern_fut).await {
                Ok(detected) => detected,
                Err(_) => {
                    tracing::warn!("pattern engine timed out for {}", observation.url);
                    pattern_engine::Detected::new()
                }
            };

            let mut rule_detected = Vec::new();
            for doc in rules {
                if let Some(detection) = crate::rules::evaluate(doc, &observation) {
                    rule_detected.push(detection);
                }
            }

            let fusion_result = fusion::merge(catalog, &pattern_detected, &rule_detected);
            out.lock().await.push(result::build(observation, fusion_result));
        });
        fut
    })
    .await?;

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::observation::Observation;

    /// Scraper stub serving a blank page per URL — exercises the pool's
    /// cancellation and progress bookkeeping without any network.
    struct StubScraper {
        pages: std::collections::HashSet<String>,
    }

    #[async_trait::async_trait]
    impl Scraper for StubScraper {
        async fn scrape(&self, url: &str) -> Result<(Observation, PageHandle)> {
            if !self.pages.contains(url) {
                return Err(FingerprintError::scrape_failure(url, "unknown url"));
            }
            Ok((
                Observation {
                    url: url.to_string(),
                    status_code: 200,
                    title: String::new(),
                    html: String::new(),
                    headers: Default::default(),
                    scripts: vec![],
                    cookies: Default::default(),
                    meta: Default::default(),
                    dns: Default::default(),
                    cert_issuer: vec![],
                    favicon: None,
                    favicon_hash: None,
                    certificate: Default::default(),
                },
                PageHandle::None,
            ))
        }

        fn can_render_page(&self) -> bool {
            false
        }

        async fn eval_js(&self, _page: &PageHandle, _expr: &str) -> Option<String> {
            None
        }

        fn set_depth(&self, _depth: u8) {}

        async fn release(&self, _page: PageHandle) {}

        async fn close(&self) {}
    }

    fn test_config() -> FingerprintConfig {
        let mut config = FingerprintConfig::default();
        config.workers = Some(1);
        config.max_depth = Some(0);
        config.ms_delay_between_requests = Some(0);
        config
    }

    fn stub_pool_urls(n: usize) -> (Arc<dyn Scraper>, Vec<String>) {
        let urls: Vec<String> = (0..n).map(|i| format!("https://example.com/{i}")).collect();
        let scraper: Arc<dyn Scraper> = Arc::new(StubScraper { pages: urls.iter().cloned().collect() });
        (scraper, urls)
    }

    #[tokio::test]
    async fn cancelling_mid_run_stops_remaining_urls_and_errors() {
        let catalog = Catalog::parse("{}").unwrap();
        let rules: Vec<RuleDocument> = Vec::new();
        let config = test_config();
        let (scraper, urls) = stub_pool_urls(3);

        let pool = WorkerPool::new(&catalog, &rules, &config);
        let cancel = CancellationToken::new();
        let cancel_inner = cancel.clone();
        let mut seen = Vec::new();

        let result = pool
            .run(urls, scraper, cancel, |progress| {
                seen.push(progress.url.clone());
                cancel_inner.cancel();
            })
            .await;

        assert!(matches!(result, Err(FingerprintError::Cancelled)));
        assert_eq!(seen.len(), 1, "cancellation set during the first callback must stop the rest");
    }

    #[tokio::test]
    async fn progress_percent_is_rounded_fraction_of_total() {
        let catalog = Catalog::parse("{}").unwrap();
        let rules: Vec<RuleDocument> = Vec::new();
        let config = test_config();
        let (scraper, urls) = stub_pool_urls(4);

        let pool = WorkerPool::new(&catalog, &rules, &config);
        let mut percents = Vec::new();

        let results = pool
            .run(urls, scraper, CancellationToken::new(), |progress| percents.push(progress.percent))
            .await
            .unwrap();

        assert_eq!(percents, vec![25, 50, 75, 100]);
        assert_eq!(results.len(), 4);
    }
}
