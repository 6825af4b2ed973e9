//! The pattern engine (spec §4.2, C4): matches one [`Observation`] against
//! every technology in a [`Catalog`], then resolves implies/excludes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use scraper::{Html, Selector};

use crate::catalog::{Catalog, CompiledDomSignal, Technology};
use crate::observation::Observation;

/// One technology's accumulated state across every signal that matched it
/// (spec §3 Detected). `confidence` is the max observed; `version` is the
/// first non-empty observed.
#[derive(Debug, Clone, Default)]
pub struct DetectedEntry {
    pub confidence: u32,
    pub version: Option<String>,
}

impl DetectedEntry {
    fn record(&mut self, confidence: u32, version: Option<String>) {
        self.confidence = self.confidence.max(confidence);
        if self.version.is_none() {
            if let Some(v) = version {
                if !v.is_empty() {
                    self.version = Some(v);
                }
            }
        }
    }
}

/// The accumulator a pipeline run produces: technology name → entry. Kept
/// as a plain map rather than a concurrent structure — all mutation during
/// matching happens behind a single mutex (spec §4.2 Concurrency) and the
/// map becomes read-only once matching finishes.
pub type Detected = BTreeMap<String, DetectedEntry>;

/// Evaluates a JS expression on the page behind one Observation. Only
/// implemented by the headless scraper; `can_render_page() == false`
/// implementations of [`crate::scraping::Scraper`] never construct one.
#[async_trait::async_trait]
pub trait JsEvaluator: Send + Sync {
    async fn eval_js(&self, expr: &str) -> Option<String>;
}

struct Shared<'a> {
    detected: Mutex<Detected>,
    obs: &'a Observation,
    html_doc: Html,
}

impl<'a> Shared<'a> {
    fn record(&self, name: &str, confidence: u32, version: Option<String>) {
        let mut guard = self.detected.lock().expect("detected mutex poisoned");
        guard.entry(name.to_string()).or_default().record(confidence, version);
    }
}

/// Run the full pattern-matching pass for one Observation against one
/// Catalog, then resolve implies/excludes to the fixed point spec §4.2
/// requires ("run implies-closure to fixpoint, then run excludes once").
///
/// `js` is `None` when the scraper producing `obs` cannot render pages
/// (spec §4.2 "js ... only if scraper can render").
pub async fn run(catalog: &Catalog, obs: &Observation, js: Option<&dyn JsEvaluator>) -> Detected {
    let shared = Shared {
        detected: Mutex::new(Detected::new()),
        obs,
        html_doc: Html::parse_document(&obs.html),
    };

    // Catalog iterated in parallel across technologies (spec §4.2
    // Concurrency); non-JS signals are pure CPU work and fan out over the
    // blocking thread pool, one task per technology.
    let mut set = tokio::task::JoinSet::new();
    for tech in &catalog.technologies {
        // SAFETY-free approach: clone what the sync task needs instead of
        // sharing raw references across the spawned task boundary.
        let tech = tech.clone();
        let obs_clone = obs.clone();
        let html = shared.html_doc.html();
        set.spawn_blocking(move || {
            let doc = Html::parse_document(&html);
            match_technology_sync(&tech, &obs_clone, &doc)
        });
    }
    while let Some(joined) = set.join_next().await {
        if let Ok(Some((name, confidence, version))) = joined {
            shared.record(&name, confidence, version);
        }
    }

    // JS-dependent signals run after, sequentially, sharing the one page
    // handle behind `js` (spec §4.1: one page per URL in the headless
    // scraper; true concurrency here would require one page per
    // technology, which the bounded page pool does not provide).
    if let Some(evaluator) = js {
        for tech in &catalog.technologies {
            if let Some((name, confidence, version)) = match_technology_js(tech, evaluator).await {
                shared.record(&name, confidence, version);
            }
        }
    }

    let mut detected = shared.detected.into_inner().expect("detected mutex poisoned");
    resolve_implies(catalog, &mut detected);
    resolve_excludes(catalog, &mut detected);
    detected
}

/// Every non-JS signal for one technology: url, html, headers, cookies,
/// scripts, meta, dns, certIssuer, dom. Returns the strongest
/// (confidence, version) pair observed across every pattern that matched,
/// or `None` if nothing matched at all.
fn match_technology_sync(
    tech: &Technology,
    obs: &Observation,
    html_doc: &Html,
) -> Option<(String, u32, Option<String>)> {
    let mut best: Option<(u32, Option<String>)> = None;
    let mut record = |confidence: u32, version: Option<String>| {
        let entry = best.get_or_insert((0, None));
        entry.0 = entry.0.max(confidence);
        if entry.1.is_none() {
            if let Some(v) = version {
                if !v.is_empty() {
                    entry.1 = Some(v);
                }
            }
        }
    };

    for pattern in &tech.url {
        if let Some(caps) = pattern.regex.captures(&obs.url) {
            record(pattern.confidence, pattern.extract_version(&caps));
        }
    }
    for pattern in &tech.html {
        if let Some(caps) = pattern.regex.captures(&obs.html) {
            record(pattern.confidence, pattern.extract_version(&caps));
        }
    }
    for (key, patterns) in &tech.headers {
        if let Some(values) = obs.headers.get(key) {
            for value in values {
                for pattern in patterns {
                    if let Some(caps) = pattern.regex.captures(value) {
                        record(pattern.confidence, pattern.extract_version(&caps));
                    }
                }
            }
        }
    }
    for (key, patterns) in &tech.cookies {
        if let Some(value) = obs.cookies.get(key) {
            for pattern in patterns {
                if let Some(caps) = pattern.regex.captures(value) {
                    record(pattern.confidence, pattern.extract_version(&caps));
                }
            }
        }
    }
    for script in &obs.scripts {
        for pattern in &tech.scripts {
            if let Some(caps) = pattern.regex.captures(script) {
                record(pattern.confidence, pattern.extract_version(&caps));
            }
        }
    }
    for (key, patterns) in &tech.meta {
        if let Some(values) = obs.meta.get(key) {
            for value in values {
                for pattern in patterns {
                    if let Some(caps) = pattern.regex.captures(value) {
                        record(pattern.confidence, pattern.extract_version(&caps));
                    }
                }
            }
        }
    }
    for values in obs.dns.values() {
        for value in values {
            for pattern in &tech.dns {
                if let Some(caps) = pattern.regex.captures(value) {
                    record(pattern.confidence, pattern.extract_version(&caps));
                }
            }
        }
    }
    for issuer in &obs.cert_issuer {
        for pattern in &tech.cert_issuer {
            if let Some(caps) = pattern.regex.captures(issuer) {
                record(pattern.confidence, pattern.extract_version(&caps));
            }
        }
    }

    for (selector_src, sig) in &tech.dom {
        match_dom_signal(selector_src, sig, html_doc, &mut record);
    }

    best.map(|(confidence, version)| (tech.name.clone(), confidence, version))
}

fn match_dom_signal(
    selector_src: &str,
    sig: &CompiledDomSignal,
    html_doc: &Html,
    record: &mut impl FnMut(u32, Option<String>),
) {
    let Ok(selector) = Selector::parse(selector_src) else {
        tracing::warn!("dom pattern: invalid css selector {selector_src:?}");
        return;
    };
    for el in html_doc.select(&selector) {
        if !sig.exists.is_empty() {
            for pattern in &sig.exists {
                // Empty pattern string means "any value satisfies" (spec §4.2).
                if pattern.source.is_empty() {
                    record(pattern.confidence, None);
                } else if let Some(caps) = pattern.regex.captures(&el.text().collect::<String>()) {
                    record(pattern.confidence, pattern.extract_version(&caps));
                }
            }
        }
        if !sig.text.is_empty() {
            let text: String = el.text().collect();
            for pattern in &sig.text {
                if let Some(caps) = pattern.regex.captures(&text) {
                    record(pattern.confidence, pattern.extract_version(&caps));
                }
            }
        }
        for (attr, patterns) in &sig.attributes {
            if let Some(value) = el.value().attr(attr) {
                for pattern in patterns {
                    if pattern.source.is_empty() {
                        record(pattern.confidence, None);
                    } else if let Some(caps) = pattern.regex.captures(value) {
                        record(pattern.confidence, pattern.extract_version(&caps));
                    }
                }
            }
        }
        // `properties` is rarely reachable against static HTML (it needs a
        // live DOM); this engine treats it like `attributes` since both
        // this crate's scrapers only ever hand the pattern engine parsed
        // HTML, never a live page object (spec §3 Technology entry).
        for (attr, patterns) in &sig.properties {
            if let Some(value) = el.value().attr(attr) {
                for pattern in patterns {
                    if pattern.source.is_empty() {
                        record(pattern.confidence, None);
                    } else if let Some(caps) = pattern.regex.captures(value) {
                        record(pattern.confidence, pattern.extract_version(&caps));
                    }
                }
            }
        }
    }
}

async fn match_technology_js(
    tech: &Technology,
    evaluator: &dyn JsEvaluator,
) -> Option<(String, u32, Option<String>)> {
    let mut best: Option<(u32, Option<String>)> = None;
    for (js_prop, patterns) in &tech.js {
        let Some(value) = evaluator.eval_js(js_prop).await else {
            continue;
        };
        for pattern in patterns {
            // Empty pattern string means "any value satisfies" (spec §4.2).
            let hit = if pattern.source.is_empty() {
                Some(None)
            } else {
                pattern.regex.captures(&value).map(|caps| pattern.extract_version(&caps))
            };
            if let Some(version) = hit {
                let entry = best.get_or_insert((0, None));
                entry.0 = entry.0.max(pattern.confidence);
                if entry.1.is_none() {
                    if let Some(v) = version.filter(|v| !v.is_empty()) {
                        entry.1 = Some(v);
                    }
                }
            }
        }
    }
    best.map(|(confidence, version)| (tech.name.clone(), confidence, version))
}

/// Propagate `implies` to a fixpoint: repeatedly scan every currently
/// detected technology's `implies` list and add any not-yet-detected name,
/// at the confidence/version its own `implies` template states — falling
/// back to the detecting technology's confidence/version only when that
/// template left one unspecified (spec §4.2: "add I with its template's
/// stated confidence/version"). Recursion happens naturally because a
/// newly-added name is itself scanned on the next pass; termination
/// follows from the "not-yet-detected" guard (spec §9: never a
/// visit-count scheme).
fn resolve_implies(catalog: &Catalog, detected: &mut Detected) {
    let by_name: BTreeMap<&str, &Technology> =
        catalog.technologies.iter().map(|t| (t.name.as_str(), t)).collect();

    loop {
        let mut to_add: Vec<(String, u32, Option<String>)> = Vec::new();
        for (name, entry) in detected.iter() {
            let Some(tech) = by_name.get(name.as_str()) else {
                continue;
            };
            for implied in &tech.implies {
                let implied_name = &implied.value;
                if !detected.contains_key(implied_name) && !to_add.iter().any(|(n, _, _)| n == implied_name) {
                    let confidence = implied.confidence_explicit.unwrap_or(entry.confidence);
                    let version = implied.version_template.clone().or_else(|| entry.version.clone());
                    to_add.push((implied_name.clone(), confidence, version));
                }
            }
        }
        if to_add.is_empty() {
            break;
        }
        for (name, confidence, version) in to_add {
            detected.entry(name).or_default().record(confidence, version);
        }
    }
}

/// Delete every name excluded by a currently detected technology. Runs
/// exactly once, after implies has reached its fixpoint (spec §4.2).
fn resolve_excludes(catalog: &Catalog, detected: &mut Detected) {
    let by_name: BTreeMap<&str, &Technology> =
        catalog.technologies.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut to_remove: BTreeSet<String> = BTreeSet::new();
    for name in detected.keys() {
        if let Some(tech) = by_name.get(name.as_str()) {
            for excluded in &tech.excludes {
                to_remove.insert(excluded.value.clone());
            }
        }
    }
    for name in to_remove {
        detected.remove(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn obs_with_header(name: &str, value: &str) -> Observation {
        let mut obs = blank_observation();
        obs.headers.insert(name, value);
        obs
    }

    fn blank_observation() -> Observation {
        Observation {
            url: "https://example.com".to_string(),
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
        }
    }

    #[tokio::test]
    async fn scenario_nginx_header_version_and_confidence() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "Nginx": {"headers": {"server": "nginx(?:/([\\d.]+))?\\;version:\\1"}}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let obs = obs_with_header("server", "nginx/1.19.0");
        let detected = run(&catalog, &obs, None).await;
        let nginx = detected.get("Nginx").unwrap();
        assert_eq!(nginx.version.as_deref(), Some("1.19.0"));
        assert_eq!(nginx.confidence, 100);
    }

    #[tokio::test]
    async fn scenario_implies_adds_undetected_dependency() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "jQuery UI": {"scripts": "jquery-ui(?:\\.min)?\\.js", "implies": "jQuery"},
                "jQuery": {}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let mut obs = blank_observation();
        obs.scripts.push("/assets/jquery-ui.min.js".to_string());
        let detected = run(&catalog, &obs, None).await;
        assert!(detected.contains_key("jQuery UI"));
        assert!(detected.contains_key("jQuery"));
    }

    #[tokio::test]
    async fn scenario_implies_uses_its_own_template_confidence_and_version() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "WordPress VIP": {
                    "html": "marker-vip",
                    "implies": "WordPress\\;confidence:50\\;version:6.4"
                },
                "WordPress": {}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let mut obs = blank_observation();
        obs.html = "marker-vip".to_string();
        let detected = run(&catalog, &obs, None).await;
        let vip = detected.get("WordPress VIP").unwrap();
        assert_eq!(vip.confidence, 100);
        let wp = detected.get("WordPress").unwrap();
        assert_eq!(wp.confidence, 50);
        assert_eq!(wp.version.as_deref(), Some("6.4"));
    }

    #[tokio::test]
    async fn scenario_implies_without_a_template_falls_back_to_detector() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "jQuery UI": {"scripts": "jquery-ui(?:\\.min)?\\.js\\;version:\\1\\;confidence:80", "implies": "jQuery"},
                "jQuery": {}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let mut obs = blank_observation();
        obs.scripts.push("/assets/jquery-ui.min.js".to_string());
        let detected = run(&catalog, &obs, None).await;
        let jquery = detected.get("jQuery").unwrap();
        assert_eq!(jquery.confidence, 80);
    }

    #[tokio::test]
    async fn scenario_excludes_removes_the_excluded_name() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "A": {"html": "marker-a", "excludes": "B"},
                "B": {"html": "marker-b"}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let mut obs = blank_observation();
        obs.html = "marker-a marker-b".to_string();
        let detected = run(&catalog, &obs, None).await;
        assert!(detected.contains_key("A"));
        assert!(!detected.contains_key("B"));
    }

    #[tokio::test]
    async fn dom_shorthand_matches_on_element_existence() {
        let json = r#"{
            "categories": {},
            "technologies": {"ReactApp": {"dom": {"#root": ""}}}
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let mut obs = blank_observation();
        obs.html = "<html><body><div id=\"root\"></div></body></html>".to_string();
        let detected = run(&catalog, &obs, None).await;
        assert!(detected.contains_key("ReactApp"));
    }
}
