use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque certificate blob. The certificate-parsing helpers that would
/// populate this are external collaborators (see spec §1) — here it is
/// carried as data only, never parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Uppercase hex, colon-separated in 2-char groups (see spec §6).
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub issuer: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

/// Case-insensitive, multi-valued map. Keys are stored lowercased; lookups
/// lowercase the query key so callers never have to remember to normalize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiMap(BTreeMap<String, Vec<String>>);

impl MultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(&key.to_ascii_lowercase()).map(|v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Join every value for every key with ", " — used by the `FingerResult`
    /// output's flattened header representation (spec §6).
    pub fn joined(&self, key: &str) -> Option<String> {
        self.get(key).map(|vs| vs.join(", "))
    }
}

/// Normalized evidence collected from one successful page fetch.
///
/// Immutable after construction: every field is set once by the scraper
/// (or the shared favicon/DNS post-processing step) and never mutated
/// again for the lifetime of the pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub url: String,
    pub status_code: u16,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub headers: MultiMap,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: MultiMap,
    /// record type (ns/mx/txt/cname/...) → values.
    #[serde(default)]
    pub dns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub cert_issuer: Vec<String>,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub favicon_hash: Option<i32>,
    #[serde(default)]
    pub certificate: CertificateInfo,
}

impl Observation {
    /// Body text used by matchers whose `part` is `body` or `all`.
    pub fn body(&self) -> &str {
        &self.html
    }

    /// Flattened `header: value` lines, used by the `all` part (body+headers).
    pub fn headers_flat(&self) -> String {
        let mut out = String::new();
        for (k, values) in self.headers.iter() {
            for v in values {
                out.push_str(k);
                out.push_str(": ");
                out.push_str(v);
                out.push('\n');
            }
        }
        out
    }

    /// `all` part: body followed by headers, concatenated (spec §4.4).
    pub fn part_all(&self) -> String {
        format!("{}{}", self.body(), self.headers_flat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimap_lookup_is_case_insensitive() {
        let mut m = MultiMap::new();
        m.insert("Server", "nginx/1.19.0");
        assert_eq!(m.get("server"), Some(&["nginx/1.19.0".to_string()][..]));
        assert_eq!(m.get("SERVER"), Some(&["nginx/1.19.0".to_string()][..]));
    }

    #[test]
    fn part_all_concatenates_body_then_headers() {
        let mut obs = sample_observation();
        obs.html = "<html>hi</html>".to_string();
        obs.headers.insert("Server", "nginx");
        let all = obs.part_all();
        assert!(all.starts_with("<html>hi</html>"));
        assert!(all.contains("server: nginx"));
    }

    fn sample_observation() -> Observation {
        Observation {
            url: "https://example.com".to_string(),
            status_code: 200,
            title: String::new(),
            html: String::new(),
            headers: MultiMap::new(),
            scripts: vec![],
            cookies: BTreeMap::new(),
            meta: MultiMap::new(),
            dns: BTreeMap::new(),
            cert_issuer: vec![],
            favicon: None,
            favicon_hash: None,
            certificate: CertificateInfo::default(),
        }
    }
}
