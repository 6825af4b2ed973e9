//! Fusion (spec §4.6, C8): merges the pattern engine's and rule engine's
//! per-URL findings into one deduplicated inventory, then buckets every
//! detected technology into the six category groups spec §6 names.

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::pattern_engine::Detected;
use crate::rules::RuleDetection;

/// One fused technology entry (spec §6 Outputs: `technologies[]`).
#[derive(Debug, Clone)]
pub struct FusedTechnology {
    pub name: String,
    pub version: String,
    pub confidence: u32,
    pub categories: Vec<String>,
    /// Extractor output carried through from the rule engine (spec §11.3);
    /// always empty for pattern-engine-only detections.
    pub metadata: BTreeMap<String, Vec<String>>,
}

/// The six category buckets spec §4.6 derives every detected technology
/// into, via [`CategoryMap`].
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub product: Vec<String>,
    pub web_framework: Vec<String>,
    pub web_container: Vec<String>,
    pub programming_language: Vec<String>,
    pub framework: Vec<String>,
    pub component: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FusionResult {
    pub technologies: Vec<FusedTechnology>,
    pub buckets: Buckets,
}

/// Maps an extended category name (pattern-catalog category name or
/// rule-document `info.categories` entry) onto one of the six output
/// buckets. Implementation-provided per spec §4.6; this is a small,
/// case-insensitive substring classifier over the common Wappalyzer/nuclei
/// category vocabulary rather than an exhaustive lookup table, since the
/// source catalogs do not ship a canonical bucket mapping themselves.
pub struct CategoryMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bucket {
    Product,
    WebFramework,
    WebContainer,
    ProgrammingLanguage,
    Framework,
    Component,
}

impl CategoryMap {
    /// Every bucket a category name maps to — a category can legitimately
    /// land in more than one bucket (spec §4.6: "each detected technology
    /// appears in every bucket whose category maps to it").
    pub fn buckets_for(category_name: &str) -> Vec<Bucket> {
        let lower = category_name.to_ascii_lowercase();
        let mut out = Vec::new();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if contains_any(&["cms", "ecommerce", "blog", "wiki", "marketplace"]) {
            out.push(Bucket::Product);
        }
        if contains_any(&["web framework", "javascript framework", "frontend framework", "ui framework"]) {
            out.push(Bucket::WebFramework);
        }
        if contains_any(&["web server", "web container", "reverse proxy", "load balancer"]) {
            out.push(Bucket::WebContainer);
        }
        if contains_any(&["programming language", "language"]) {
            out.push(Bucket::ProgrammingLanguage);
        }
        if contains_any(&["framework"]) && !out.contains(&Bucket::WebFramework) {
            out.push(Bucket::Framework);
        }
        if out.is_empty() {
            out.push(Bucket::Component);
        }
        out
    }
}

/// Merge the pattern engine's `Detected` map and the rule engine's
/// `Vec<RuleDetection>` by case-insensitive name. First occurrence wins
/// for `version` and `categories` (spec §4.6); detected entries are
/// sorted by name before merging so fusion is deterministic regardless of
/// scan ordering (spec §5 Ordering guarantees).
pub fn merge(catalog: &Catalog, pattern_detected: &Detected, rule_detected: &[RuleDetection]) -> FusionResult {
    let category_name = |id: &i64| -> Option<String> { catalog.categories.get(id).map(|c| c.name.clone()) };
    let tech_categories: BTreeMap<&str, Vec<i64>> = catalog
        .technologies
        .iter()
        .map(|t| (t.name.as_str(), t.categories.clone()))
        .collect();

    // first-occurrence-wins keyed by lowercased name; pattern engine
    // entries are inserted first (sorted by name per spec §5), then rule
    // engine entries fill in anything new.
    let mut by_lower_name: BTreeMap<String, FusedTechnology> = BTreeMap::new();

    let mut pattern_names: Vec<&String> = pattern_detected.keys().collect();
    pattern_names.sort();
    for name in pattern_names {
        let entry = &pattern_detected[name];
        let categories = tech_categories
            .get(name.as_str())
            .map(|ids| ids.iter().filter_map(category_name).collect())
            .unwrap_or_default();
        by_lower_name.entry(name.to_ascii_lowercase()).or_insert(FusedTechnology {
            name: name.clone(),
            version: entry.version.clone().unwrap_or_default(),
            confidence: entry.confidence,
            categories,
            metadata: BTreeMap::new(),
        });
    }

    let mut rule_sorted: Vec<&RuleDetection> = rule_detected.iter().collect();
    rule_sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for detection in rule_sorted {
        by_lower_name
            .entry(detection.name.to_ascii_lowercase())
            .or_insert_with(|| FusedTechnology {
                name: detection.name.clone(),
                version: detection.version.clone(),
                confidence: detection.confidence,
                categories: detection.categories.clone(),
                metadata: detection.metadata.clone(),
            });
    }

    let technologies: Vec<FusedTechnology> = by_lower_name.into_values().collect();

    let mut buckets = Buckets::default();
    for tech in &technologies {
        let mut seen = std::collections::BTreeSet::new();
        for category in &tech.categories {
            for bucket in CategoryMap::buckets_for(category) {
                if seen.insert(bucket) {
                    match bucket {
                        Bucket::Product => buckets.product.push(tech.name.clone()),
                        Bucket::WebFramework => buckets.web_framework.push(tech.name.clone()),
                        Bucket::WebContainer => buckets.web_container.push(tech.name.clone()),
                        Bucket::ProgrammingLanguage => buckets.programming_language.push(tech.name.clone()),
                        Bucket::Framework => buckets.framework.push(tech.name.clone()),
                        Bucket::Component => buckets.component.push(tech.name.clone()),
                    }
                }
            }
        }
    }

    FusionResult { technologies, buckets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::pattern_engine::DetectedEntry;

    #[test]
    fn first_occurrence_wins_for_version_and_categories() {
        let json = r#"{
            "categories": {"1": {"name": "Web servers", "priority": 1}},
            "technologies": {"Nginx": {"cats": [1]}}
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let mut pattern_detected = Detected::new();
        pattern_detected.insert(
            "Nginx".to_string(),
            DetectedEntry { confidence: 90, version: Some("1.19.0".to_string()) },
        );
        let rule_detected = vec![RuleDetection {
            name: "nginx".to_string(),
            version: "9.9.9".to_string(),
            confidence: 100,
            categories: vec!["Other".to_string()],
            metadata: BTreeMap::new(),
        }];
        let result = merge(&catalog, &pattern_detected, &rule_detected);
        assert_eq!(result.technologies.len(), 1);
        assert_eq!(result.technologies[0].version, "1.19.0");
        assert_eq!(result.technologies[0].categories, vec!["Web servers".to_string()]);
    }

    #[test]
    fn buckets_are_deduplicated_per_technology() {
        assert_eq!(CategoryMap::buckets_for("Web servers"), vec![Bucket::WebContainer]);
        assert_eq!(CategoryMap::buckets_for("CMS"), vec![Bucket::Product]);
        assert_eq!(CategoryMap::buckets_for("Unknown thing"), vec![Bucket::Component]);
    }
}
