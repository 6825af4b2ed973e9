//! Scraper abstraction (spec §4.1, C2): two interchangeable
//! implementations producing [`Observation`]s — a static HTTP fetcher and
//! a headless-browser renderer — behind one [`Scraper`] trait.

pub mod browser_manager;
pub mod common;
pub mod headless;
pub mod robots;
pub mod static_fetch;

pub use common::{dns_lookup, fetch_favicon};
pub use headless::HeadlessScraper;
pub use static_fetch::StaticScraper;

use crate::error::Result;
use crate::observation::Observation;
use crate::pattern_engine::JsEvaluator;

/// An opaque handle to whatever live resource a scraper used to produce
/// an Observation — a chromiumoxide page, for the headless scraper; unit
/// for the static scraper, which has nothing to hand back (spec §4.1
/// Contract). Holding onto it lets the pattern engine run `js`/`dom`
/// signals against the *same* navigated page instead of re-fetching.
pub enum PageHandle {
    None,
    Browser(headless::BrowserPage),
}

/// Contract every scraper implementation satisfies (spec §4.1).
#[async_trait::async_trait]
pub trait Scraper: Send + Sync {
    /// Scrape one URL, returning its Observation and an optional page
    /// handle for further JS evaluation.
    async fn scrape(&self, url: &str) -> Result<(Observation, PageHandle)>;

    /// Whether `js`/`dom` catalog signals (spec §4.2) may run against
    /// pages this scraper produces.
    fn can_render_page(&self) -> bool;

    /// Evaluate a JS expression against a held page handle. Returns the
    /// stringified result if its JS type is `string` or `number` (spec
    /// §4.1), `None` otherwise — including when the scraper doesn't
    /// support rendering at all.
    async fn eval_js(&self, page: &PageHandle, expr: &str) -> Option<String>;

    /// The crawl driver (C7) calls this once per depth level so
    /// robots.txt gating (spec §4.1: "Honors robots.txt once depth > 0")
    /// only kicks in past the seed URL.
    fn set_depth(&self, depth: u8);

    /// Return a page handle produced by [`Scraper::scrape`] once the
    /// caller is done evaluating JS against it (spec §4.1: `put_page`
    /// resets navigation to blank and returns it to the pool). Must be
    /// called exactly once per handle returned by `scrape`, from the same
    /// worker that received it (spec §9: "do not leak page handles across
    /// workers"). No-op for scrapers that never hand out a live handle.
    async fn release(&self, page: PageHandle);

    /// Release any scraper-held resources (browser process, connection
    /// pools). Idempotent.
    async fn close(&self);
}

/// Adapts a [`Scraper`] + held [`PageHandle`] pair into the
/// [`JsEvaluator`] the pattern engine expects, without the pattern engine
/// needing to know about scrapers at all.
pub struct ScraperJsEvaluator<'a> {
    pub scraper: &'a dyn Scraper,
    pub page: &'a PageHandle,
}

#[async_trait::async_trait]
impl<'a> JsEvaluator for ScraperJsEvaluator<'a> {
    async fn eval_js(&self, expr: &str) -> Option<String> {
        self.scraper.eval_js(self.page, expr).await
    }
}
