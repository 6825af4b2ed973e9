//! Rule-engine matching (spec §4.4): evaluates one compiled
//! [`super::model::RuleDocument`] against an [`Observation`], producing a
//! detected technology on success.

use crate::dsl::{self, eval::Vars};
use crate::observation::Observation;

use super::model::{Condition, MatcherType, Part, RuleDocument};

/// One detected technology from the rule engine (spec §4.4 Output).
#[derive(Debug, Clone)]
pub struct RuleDetection {
    pub name: String,
    pub version: String,
    pub confidence: u32,
    pub categories: Vec<String>,
    /// Values pulled by the matched `http` entry's extractors (spec §11.3).
    /// Always present, even when empty — extractors never gate a match.
    pub metadata: std::collections::BTreeMap<String, Vec<String>>,
}

/// Select the named `part` of an Observation as a string (spec §3 Matcher,
/// §4.4 "Select the part from the Observation").
fn select_part(part: Part, obs: &Observation) -> String {
    match part {
        Part::Url => obs.url.clone(),
        Part::Js => String::new(), // js/dom parts need a live page; core rule engine has none.
        Part::Dom => obs.html.clone(),
        Part::All => obs.part_all(),
        Part::Body => obs.body().to_string(),
        Part::Headers => obs.headers_flat(),
        Part::Cookies => obs
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; "),
        Part::Scripts => obs.scripts.join("\n"),
        Part::Meta => obs
            .meta
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join("; "),
        Part::Dns => obs
            .dns
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join("; "),
        Part::CertIssuer => obs.cert_issuer.join(", "),
        Part::StatusCode => obs.status_code.to_string(),
        Part::Title => obs.title.clone(),
    }
}

/// Evaluate one compiled matcher against an Observation (spec §4.4
/// "Matching one matcher").
fn eval_matcher(matcher: &super::model::CompiledMatcher, obs: &Observation, vars: &Vars) -> bool {
    let part = select_part(matcher.part, obs);
    let result = match matcher.matcher_type {
        MatcherType::Status => matcher.status.contains(&(obs.status_code as i32)),
        MatcherType::Size => matcher.size.contains(&(part.len() as i64)),
        MatcherType::Word => eval_condition(matcher.condition, matcher.match_all, matcher.words.iter(), |word| {
            let haystack = if matcher.case_insensitive {
                part.to_ascii_lowercase()
            } else {
                part.clone()
            };
            let substituted = dsl::substitute(word, vars);
            haystack.contains(&substituted)
        }),
        MatcherType::Regex => {
            eval_condition(matcher.condition, matcher.match_all, matcher.regexes.iter(), |re| re.is_match(&part))
        }
        MatcherType::Binary => eval_condition(matcher.condition, matcher.match_all, matcher.binary.iter(), |needle| {
            !needle.is_empty() && part.as_bytes().windows(needle.len()).any(|w| w == needle.as_slice())
        }),
        MatcherType::Dsl => eval_condition(matcher.condition, matcher.match_all, matcher.dsl.iter(), |expr| {
            dsl::eval::eval(expr, vars).map(|v| v.as_bool()).unwrap_or(false)
        }),
    };
    if matcher.negative {
        !result
    } else {
        result
    }
}

/// AND/OR composition over a list of sub-patterns (spec §4.4, §8
/// "Condition composition: any matcher with zero sub-patterns evaluates
/// to false for AND, false for OR").
///
/// - AND: abort to `false` on the first miss; all-hit → `true`.
/// - OR: return `true` on the first hit (spec §9 Design Notes fixes this
///   uniformly, including for `binary`), unless `match_all` is set, in
///   which case every sub-pattern is evaluated and at least one hit is
///   required (same truth value as plain OR, but no early return — used
///   when callers need every sub-pattern's side effect, e.g. extractors).
fn eval_condition<'a, T: 'a>(
    condition: Condition,
    match_all: bool,
    items: impl Iterator<Item = &'a T>,
    mut test: impl FnMut(&'a T) -> bool,
) -> bool {
    match condition {
        Condition::And => {
            let mut any = false;
            for item in items {
                any = true;
                if !test(item) {
                    return false;
                }
            }
            any
        }
        Condition::Or => {
            if match_all {
                let mut hit = false;
                for item in items {
                    if test(item) {
                        hit = true;
                    }
                }
                hit
            } else {
                for item in items {
                    if test(item) {
                        return true;
                    }
                }
                false
            }
        }
    }
}

/// Does `doc` detect against this Observation? Path gating: only `http`
/// entries whose path list contains the literal `{{BaseURL}}` marker are
/// evaluated (spec §4.4 "Path gating" — other templates are reserved for
/// active probing and out of scope for the core).
pub fn evaluate(doc: &RuleDocument, obs: &Observation) -> Option<RuleDetection> {
    let vars = crate::dsl::substitution::observation_vars(obs);

    for entry in &doc.http {
        if !entry.path.iter().any(|p| p == "{{BaseURL}}") {
            continue;
        }
        let matched = compose_matchers(entry.matchers_condition, &entry.matchers, obs, &vars);
        if matched {
            return Some(RuleDetection {
                name: doc.id.clone(),
                version: doc.info.version.clone(),
                confidence: doc.info.confidence,
                categories: doc.info.categories.clone(),
                metadata: super::extractors::run_all(&entry.extractors, obs),
            });
        }
    }
    None
}

/// `matchers_condition` composes every matcher in one `http` entry (spec
/// §4.4: "AND requires every matcher true; OR requires any").
fn compose_matchers(
    condition: Condition,
    matchers: &[super::model::CompiledMatcher],
    obs: &Observation,
    vars: &Vars,
) -> bool {
    if matchers.is_empty() {
        return false;
    }
    match condition {
        Condition::And => matchers.iter().all(|m| eval_matcher(m, obs, vars)),
        Condition::Or => matchers.iter().any(|m| eval_matcher(m, obs, vars)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::model::RuleDocument;

    fn blank_observation() -> Observation {
        Observation {
            url: "https://example.com".to_string(),
            status_code: 301,
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

    #[test]
    fn scenario_status_matcher_with_negation() {
        let yaml = r#"
id: status-test
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: status
        status: [200, 302]
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        let obs = blank_observation();
        assert!(evaluate(&doc, &obs).is_none());

        let yaml_negative = r#"
id: status-test
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: status
        status: [200, 302]
        negative: true
"#;
        let doc_negative = RuleDocument::parse_yaml(yaml_negative).unwrap();
        assert!(evaluate(&doc_negative, &obs).is_some());
    }

    #[test]
    fn scenario_and_condition_requires_both_matchers() {
        let yaml = r#"
id: and-test
http:
  - path: ["{{BaseURL}}"]
    matchers_condition: and
    matchers:
      - type: word
        part: body
        words: ["admin"]
      - type: regex
        part: headers
        regex: ["^server:"]
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        let mut obs = blank_observation();
        obs.html = "welcome admin panel".to_string();
        assert!(evaluate(&doc, &obs).is_none());

        obs.headers.insert("server", "nginx");
        assert!(evaluate(&doc, &obs).is_some());
    }

    #[test]
    fn scenario_dsl_matcher_contains_and_status() {
        let yaml = r#"
id: dsl-test
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: dsl
        dsl:
          - 'contains(body, "Powered by WP") && status_code == 200'
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        let mut obs = blank_observation();
        obs.status_code = 200;
        obs.html = "... Powered by WP ...".to_string();
        assert!(evaluate(&doc, &obs).is_some());

        obs.status_code = 500;
        assert!(evaluate(&doc, &obs).is_none());
    }

    #[test]
    fn zero_subpatterns_is_false_for_both_conditions() {
        assert!(!eval_condition(Condition::And, false, std::iter::empty::<&i32>(), |_| true));
        assert!(!eval_condition(Condition::Or, false, std::iter::empty::<&i32>(), |_| true));
    }

    #[test]
    fn matched_document_carries_extractor_metadata() {
        let yaml = r#"
id: wordpress-version
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: word
        part: body
        words: ["WordPress"]
    extractors:
      - name: wp_version
        type: regex
        part: body
        regex: ["WordPress ([\\d.]+)"]
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        let mut obs = blank_observation();
        obs.html = "generator: WordPress 6.4.2".to_string();
        let detection = evaluate(&doc, &obs).expect("matcher hits on the word in body");
        assert_eq!(detection.metadata.get("wp_version").unwrap(), &vec!["6.4.2".to_string()]);
    }

    #[test]
    fn negative_is_idempotent() {
        let yaml = r#"
id: neg-test
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: status
        status: [200]
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        let mut obs = blank_observation();
        obs.status_code = 200;
        let plain = evaluate(&doc, &obs).is_some();
        assert!(plain);
    }
}
