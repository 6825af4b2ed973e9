use std::sync::Arc;

use tracing::{info, warn};

use stackscout::rules::{FsRuleStore, RuleDocumentStore};
use stackscout::scraping::{HeadlessScraper, Scraper, StaticScraper};
use stackscout::{CancellationToken, Catalog, WorkerPool};

const FLAGS_WITH_VALUES: &[&str] = &["--catalog", "--rules", "--scraper", "--max-depth", "--workers"];

fn parse_flag(args: &[String], name: &str) -> Option<String> {
    let mut it = args.iter().peekable();
    while let Some(a) = it.next() {
        if a == name {
            return it.peek().map(|v| v.to_string());
        }
        if let Some(rest) = a.strip_prefix(&format!("{name}=")) {
            return Some(rest.to_string());
        }
    }
    None
}

/// Every positional (non-flag, non-flag-value) argument, taken as a target URL.
fn positional_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for (i, a) in args.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if a.starts_with("--") {
            if FLAGS_WITH_VALUES.contains(&a.as_str()) {
                skip_next = true;
            }
            continue;
        }
        let _ = i;
        out.push(a.clone());
    }
    out
}

fn usage() -> &'static str {
    "stackscout [--catalog <path>] [--rules <dir>] [--scraper static|headless] [--max-depth N] [--workers N] <url> [url...]"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", usage());
        return Ok(());
    }

    let mut config = stackscout::config::load_config();
    if let Some(scraper) = parse_flag(&args, "--scraper") {
        config.scraper = Some(scraper);
    }
    if let Some(depth) = parse_flag(&args, "--max-depth").and_then(|v| v.parse().ok()) {
        config.max_depth = Some(depth);
    }
    if let Some(workers) = parse_flag(&args, "--workers").and_then(|v| v.parse().ok()) {
        config.workers = Some(workers);
    }

    let catalog_path = parse_flag(&args, "--catalog").unwrap_or_else(|| "catalog.json".to_string());
    let rules_dir = parse_flag(&args, "--rules").unwrap_or_else(|| "rules".to_string());

    let catalog_json = std::fs::read_to_string(&catalog_path)
        .map_err(|e| anyhow::anyhow!("reading catalog {catalog_path}: {e}"))?;
    let catalog = Catalog::parse(&catalog_json).map_err(|e| anyhow::anyhow!("parsing catalog {catalog_path}: {e}"))?;
    info!(technologies = catalog.technologies.len(), "loaded technology catalog");

    let rules = match FsRuleStore::new(&rules_dir).load_all().await {
        Ok(docs) => docs,
        Err(e) => {
            warn!("loading rule documents from {rules_dir}: {e}; continuing with no rules");
            Vec::new()
        }
    };
    info!(rule_documents = rules.len(), "loaded rule documents");

    let urls = positional_args(&args);
    if urls.is_empty() {
        println!("{}", usage());
        return Ok(());
    }

    let user_agent = config.resolve_user_agent();
    let scraper: Arc<dyn Scraper> = match config.resolve_scraper().as_str() {
        "static" => Arc::new(
            StaticScraper::new(
                user_agent,
                std::time::Duration::from_secs(config.resolve_timeout_seconds()),
                std::time::Duration::from_secs(config.resolve_timeout_seconds()),
            )
            .map_err(|e| anyhow::anyhow!("building static scraper: {e}"))?,
        ),
        _ => Arc::new(
            HeadlessScraper::launch(user_agent, Some(config.resolve_page_pool_size()))
                .await
                .map_err(|e| anyhow::anyhow!("launching headless scraper: {e}"))?,
        ),
    };

    let pool = WorkerPool::new(&catalog, &rules, &config);
    let cancel = CancellationToken::new();
    let total = urls.len();
    let results = pool
        .run(urls, scraper.clone(), cancel, |progress| {
            info!(url = %progress.url, percent = progress.percent, "scanned");
        })
        .await;

    scraper.close().await;

    let results = results.map_err(|e| anyhow::anyhow!("worker pool: {e}"))?;
    info!(scanned = results.len(), requested = total, "scan complete");
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_args_skips_flags_and_their_values() {
        let args: Vec<String> = vec!["--scraper", "static", "--max-depth", "2", "https://example.com"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(positional_args(&args), vec!["https://example.com".to_string()]);
    }

    #[test]
    fn parse_flag_reads_both_space_and_equals_forms() {
        let args: Vec<String> = vec!["--catalog".to_string(), "c.json".to_string()];
        assert_eq!(parse_flag(&args, "--catalog"), Some("c.json".to_string()));

        let args: Vec<String> = vec!["--catalog=c.json".to_string()];
        assert_eq!(parse_flag(&args, "--catalog"), Some("c.json".to_string()));
    }
}
