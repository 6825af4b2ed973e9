use std::path::PathBuf;

// ---------------------------------------------------------------------------
// FingerprintConfig — file-based config loader (stackscout.json) with env-var
// fallback, mirroring the donor's `ShadowConfig` / `load_shadow_config` pattern.
// ---------------------------------------------------------------------------

/// Top-level config loaded from `stackscout.json`, with every field also
/// resolvable from an individual environment variable via its `resolve_*`
/// method. JSON field present → use it; otherwise fall back to env var;
/// otherwise fall back to the built-in default.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FingerprintConfig {
    pub scraper: Option<String>,
    pub max_depth: Option<u8>,
    pub timeout_seconds: Option<u64>,
    pub eval_js_timeout_seconds: Option<u64>,
    pub favicon_timeout_seconds: Option<u64>,
    pub per_url_deadline_seconds: Option<u64>,
    pub page_pool_size: Option<usize>,
    pub max_visited_links: Option<usize>,
    pub ms_delay_between_requests: Option<u64>,
    pub workers: Option<usize>,
    pub user_agent: Option<String>,
}

pub const ENV_MAX_DEPTH: &str = "STACKSCOUT_MAX_DEPTH";
pub const ENV_TIMEOUT_SECONDS: &str = "STACKSCOUT_TIMEOUT_SECONDS";
pub const ENV_PAGE_POOL_SIZE: &str = "STACKSCOUT_PAGE_POOL_SIZE";
pub const ENV_MAX_VISITED_LINKS: &str = "STACKSCOUT_MAX_VISITED_LINKS";
pub const ENV_DELAY_MS: &str = "STACKSCOUT_DELAY_MS";
pub const ENV_WORKERS: &str = "STACKSCOUT_WORKERS";
pub const ENV_USER_AGENT: &str = "STACKSCOUT_USER_AGENT";
pub const ENV_SCRAPER: &str = "STACKSCOUT_SCRAPER";
pub const ENV_CONFIG_PATH: &str = "STACKSCOUT_CONFIG";

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; stackscout/0.1; +https://github.com/stackscout/stackscout)";

impl FingerprintConfig {
    /// `scraper`: JSON field → `STACKSCOUT_SCRAPER` env var → `"headless"`.
    pub fn resolve_scraper(&self) -> String {
        if let Some(s) = &self.scraper {
            if !s.trim().is_empty() {
                return s.clone();
            }
        }
        std::env::var(ENV_SCRAPER)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "headless".to_string())
    }

    /// `max_depth`: JSON field → `STACKSCOUT_MAX_DEPTH` env var → `0`, clamped to `[0,3]`.
    pub fn resolve_max_depth(&self) -> u8 {
        let raw = self.max_depth.or_else(|| {
            std::env::var(ENV_MAX_DEPTH)
                .ok()
                .and_then(|v| v.parse().ok())
        });
        raw.unwrap_or(0).min(3)
    }

    /// Per-scrape timeout: JSON field → `STACKSCOUT_TIMEOUT_SECONDS` env var → `5`.
    pub fn resolve_timeout_seconds(&self) -> u64 {
        self.timeout_seconds
            .or_else(|| {
                std::env::var(ENV_TIMEOUT_SECONDS)
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(5)
    }

    /// JS-eval timeout: fixed at 3s per spec, not independently configurable.
    pub fn resolve_eval_js_timeout_seconds(&self) -> u64 {
        self.eval_js_timeout_seconds.unwrap_or(3)
    }

    /// Favicon-fetch timeout: fixed at 8s per spec.
    pub fn resolve_favicon_timeout_seconds(&self) -> u64 {
        self.favicon_timeout_seconds.unwrap_or(8)
    }

    /// Per-URL deadline for the pattern engine alone: fixed at 60s per spec.
    pub fn resolve_per_url_deadline_seconds(&self) -> u64 {
        self.per_url_deadline_seconds.unwrap_or(60)
    }

    /// Headless browser page-pool size: JSON field → `STACKSCOUT_PAGE_POOL_SIZE` → `10`.
    pub fn resolve_page_pool_size(&self) -> usize {
        self.page_pool_size
            .or_else(|| {
                std::env::var(ENV_PAGE_POOL_SIZE)
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(10)
    }

    /// Crawl-wide visited cap: JSON field → `STACKSCOUT_MAX_VISITED_LINKS` → `10`.
    pub fn resolve_max_visited_links(&self) -> usize {
        self.max_visited_links
            .or_else(|| {
                std::env::var(ENV_MAX_VISITED_LINKS)
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(10)
    }

    /// Per-request crawl delay in ms: JSON field → `STACKSCOUT_DELAY_MS` → `100`.
    pub fn resolve_delay_ms(&self) -> u64 {
        self.ms_delay_between_requests
            .or_else(|| std::env::var(ENV_DELAY_MS).ok().and_then(|v| v.parse().ok()))
            .unwrap_or(100)
    }

    /// Worker pool concurrency: JSON field → `STACKSCOUT_WORKERS` → number of CPUs.
    pub fn resolve_workers(&self) -> usize {
        self.workers
            .or_else(|| std::env::var(ENV_WORKERS).ok().and_then(|v| v.parse().ok()))
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4))
    }

    /// User agent: JSON field → `STACKSCOUT_USER_AGENT` env var → built-in default.
    pub fn resolve_user_agent(&self) -> String {
        if let Some(u) = &self.user_agent {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var(ENV_USER_AGENT)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Load `stackscout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `STACKSCOUT_CONFIG` env var path
/// 2. `./stackscout.json` (process cwd)
/// 3. `../stackscout.json` (one level up)
///
/// Missing file → `FingerprintConfig::default()` (silent, all env-var
/// fallbacks still apply). Parse error → log a warning, return the default.
pub fn load_config() -> FingerprintConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("stackscout.json"),
            PathBuf::from("../stackscout.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<FingerprintConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("stackscout.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "stackscout.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return FingerprintConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    FingerprintConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let cfg = FingerprintConfig::default();
        assert_eq!(cfg.resolve_timeout_seconds(), 5);
        assert_eq!(cfg.resolve_eval_js_timeout_seconds(), 3);
        assert_eq!(cfg.resolve_favicon_timeout_seconds(), 8);
        assert_eq!(cfg.resolve_per_url_deadline_seconds(), 60);
        assert_eq!(cfg.resolve_page_pool_size(), 10);
        assert_eq!(cfg.resolve_max_visited_links(), 10);
        assert_eq!(cfg.resolve_delay_ms(), 100);
        assert_eq!(cfg.resolve_scraper(), "headless");
    }

    #[test]
    fn max_depth_is_clamped() {
        let cfg = FingerprintConfig {
            max_depth: Some(9),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_max_depth(), 3);
    }

    #[test]
    fn explicit_field_wins_over_default() {
        let cfg = FingerprintConfig {
            scraper: Some("static".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_scraper(), "static");
    }
}
