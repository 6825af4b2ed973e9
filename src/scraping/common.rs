//! Favicon and DNS post-processing shared by both scraper implementations
//! (spec §4.1 Common post-processing). Neither step is scraper-specific —
//! they run once per Observation after the page body is in hand.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use url::Url;

const FAVICON_FETCH_TIMEOUT: Duration = Duration::from_secs(8);
const BASE64_LINE_WIDTH: usize = 76;

/// Find a `<link rel="...icon...">`-flavored href in an HTML document
/// (matched loosely per spec §4.1 via `href="...favicon...."`, which in
/// practice means "any href attribute whose value contains the substring
/// `icon`"), fetch it, and return `(base64, murmur3_32_as_i32)`.
///
/// Returns `None` if no favicon href is found or the fetch fails — a
/// missing favicon is not an error (spec §7: soft, per-Observation
/// failures never abort the scrape).
pub async fn fetch_favicon(client: &reqwest::Client, page_url: &str, html: &str) -> Option<(String, i32)> {
    let href = find_favicon_href(html)?;
    let absolute = resolve_against(page_url, &href)?;

    let bytes = tokio::time::timeout(FAVICON_FETCH_TIMEOUT, client.get(absolute).send())
        .await
        .ok()?
        .ok()?
        .bytes()
        .await
        .ok()?;

    let encoded = wrap_base64(&base64::engine::general_purpose::STANDARD.encode(&bytes));
    let hash = murmurhash32::murmurhash3(encoded.as_bytes()) as i32;
    Some((encoded, hash))
}

fn find_favicon_href(html: &str) -> Option<String> {
    static ICON_HREF: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = ICON_HREF.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']*icon[^"']*)["']"#).unwrap());
    re.captures(html).map(|c| c[1].to_string())
}

fn resolve_against(page_url: &str, href: &str) -> Option<Url> {
    let base = Url::parse(page_url).ok()?;
    base.join(href).ok()
}

/// Wrap base64 text at 76 columns (spec §4.1), matching the classic
/// PEM/MIME wrapping convention most favicon-hash tools follow.
fn wrap_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_WIDTH)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve NS/MX/TXT/CNAME records for a URL's registrable domain (last
/// two labels of the host, per spec §4.1) and return them keyed by record
/// type, matching [`Observation::dns`](crate::observation::Observation::dns).
pub async fn dns_lookup(page_url: &str) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    let Some(domain) = registrable_domain(page_url) else {
        return out;
    };
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    if let Ok(ns) = resolver.ns_lookup(&domain).await {
        let values: Vec<String> = ns.iter().map(|r| r.to_string()).collect();
        if !values.is_empty() {
            out.insert("ns".to_string(), values);
        }
    }
    if let Ok(mx) = resolver.mx_lookup(&domain).await {
        let values: Vec<String> = mx.iter().map(|r| r.exchange().to_string()).collect();
        if !values.is_empty() {
            out.insert("mx".to_string(), values);
        }
    }
    if let Ok(txt) = resolver.txt_lookup(&domain).await {
        let values: Vec<String> = txt.iter().map(|r| r.to_string()).collect();
        if !values.is_empty() {
            out.insert("txt".to_string(), values);
        }
    }
    if let Ok(cname) = resolver
        .lookup(&domain, hickory_resolver::proto::rr::RecordType::CNAME)
        .await
    {
        let values: Vec<String> = cname.iter().map(|r| r.to_string()).collect();
        if !values.is_empty() {
            out.insert("cname".to_string(), values);
        }
    }
    out
}

fn registrable_domain(page_url: &str) -> Option<String> {
    let host = Url::parse(page_url).ok()?.host_str()?.to_string();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        Some(host)
    } else {
        Some(labels[labels.len() - 2..].join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_favicon_href_by_icon_substring() {
        let html = r#"<link rel="shortcut icon" href="/static/favicon.ico">"#;
        assert_eq!(find_favicon_href(html), Some("/static/favicon.ico".to_string()));
    }

    #[test]
    fn resolves_relative_href_against_page_url() {
        let resolved = resolve_against("https://example.com/blog/post", "/favicon.ico").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/favicon.ico");
    }

    #[test]
    fn registrable_domain_keeps_last_two_labels() {
        assert_eq!(
            registrable_domain("https://www.blog.example.com/x"),
            Some("example.com".to_string())
        );
        assert_eq!(registrable_domain("https://example.com"), Some("example.com".to_string()));
    }

    #[test]
    fn base64_wraps_at_76_columns() {
        let long = "A".repeat(200);
        let wrapped = wrap_base64(&long);
        for line in wrapped.lines() {
            assert!(line.len() <= BASE64_LINE_WIDTH);
        }
    }
}
