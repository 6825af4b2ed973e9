//! The top-level per-URL output (spec §6 Outputs): one `FingerResult` per
//! scraped URL, combining its Observation with the fused technology
//! inventory.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::fusion::FusionResult;
use crate::observation::Observation;

#[derive(Debug, Clone, Serialize)]
pub struct TechnologyResult {
    pub name: String,
    pub version: String,
    pub categories: Vec<String>,
    /// Extractor output (spec §11.3), empty for pattern-engine-only hits.
    pub metadata: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FingerResult {
    pub url: String,
    pub status_code: u16,
    pub title: String,
    /// Every observed header name, joined comma-separated per name
    /// (spec §6).
    pub headers: BTreeMap<String, String>,
    pub html: String,
    pub technologies: Vec<TechnologyResult>,
    pub favicon: Option<String>,
    pub favicon_hash: Option<i32>,
    /// JSON-encoded `CertificateInfo` (spec §6: "certificate (JSON string)").
    pub certificate: String,

    pub product: Vec<String>,
    pub web_framework: Vec<String>,
    pub web_container: Vec<String>,
    pub programming_language: Vec<String>,
    pub framework: Vec<String>,
    pub component: Vec<String>,
}

pub fn build(observation: Observation, fusion: FusionResult) -> FingerResult {
    let mut headers = BTreeMap::new();
    for (name, _values) in observation.headers.iter() {
        if let Some(joined) = observation.headers.joined(name) {
            headers.insert(name.clone(), joined);
        }
    }

    let technologies = fusion
        .technologies
        .into_iter()
        .map(|t| TechnologyResult { name: t.name, version: t.version, categories: t.categories, metadata: t.metadata })
        .collect();

    let certificate = serde_json::to_string(&observation.certificate).unwrap_or_else(|_| "{}".to_string());

    FingerResult {
        url: observation.url,
        status_code: observation.status_code,
        title: observation.title,
        headers,
        html: observation.html,
        technologies,
        favicon: observation.favicon,
        favicon_hash: observation.favicon_hash,
        certificate,
        product: fusion.buckets.product,
        web_framework: fusion.buckets.web_framework,
        web_container: fusion.buckets.web_container,
        programming_language: fusion.buckets.programming_language,
        framework: fusion.buckets.framework,
        component: fusion.buckets.component,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{Buckets, FusedTechnology};
    use crate::observation::{CertificateInfo, MultiMap};

    #[test]
    fn headers_are_joined_comma_separated_per_name() {
        let mut headers = MultiMap::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        let observation = Observation {
            url: "https://example.com".to_string(),
            status_code: 200,
            title: "Example".to_string(),
            html: "<html></html>".to_string(),
            headers,
            scripts: vec![],
            cookies: Default::default(),
            meta: MultiMap::new(),
            dns: Default::default(),
            cert_issuer: vec![],
            favicon: None,
            favicon_hash: None,
            certificate: CertificateInfo::default(),
        };
        let fusion = FusionResult {
            technologies: vec![FusedTechnology {
                name: "Nginx".to_string(),
                version: "1.19.0".to_string(),
                confidence: 100,
                categories: vec!["Web servers".to_string()],
                metadata: Default::default(),
            }],
            buckets: Buckets { web_container: vec!["Nginx".to_string()], ..Default::default() },
        };
        let result = build(observation, fusion);
        assert_eq!(result.headers.get("set-cookie"), Some(&"a=1, b=2".to_string()));
        assert_eq!(result.web_container, vec!["Nginx".to_string()]);
        assert_eq!(result.technologies[0].version, "1.19.0");
    }
}
