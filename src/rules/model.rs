//! Rule-document data model (spec §3 Rule document / Matcher) and the
//! compilation step described in spec §4.4.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::dsl::expr::Expr;
use crate::error::{FingerprintError, Result};

fn default_condition() -> Condition {
    Condition::Or
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherType {
    Status,
    Size,
    Word,
    Regex,
    Binary,
    Dsl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Url,
    Js,
    Dom,
    All,
    Body,
    Headers,
    Cookies,
    Scripts,
    Meta,
    Dns,
    CertIssuer,
    StatusCode,
    Title,
}

impl Default for Part {
    fn default() -> Self {
        Part::All
    }
}

/// As it appears in rule-document YAML, before compilation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMatcher {
    #[serde(rename = "type")]
    pub matcher_type: MatcherType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub part: Part,
    #[serde(default = "default_condition")]
    pub condition: Condition,
    #[serde(default)]
    pub negative: bool,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub status: Vec<i32>,
    #[serde(default)]
    pub size: Vec<i64>,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
    #[serde(default)]
    pub binary: Vec<String>,
    #[serde(default)]
    pub dsl: Vec<String>,
}

/// A matcher after compilation (spec §4.4 Compilation): regexes compiled,
/// `words`/`binary` decoded, `dsl` expressions parsed and cached.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    pub matcher_type: MatcherType,
    pub name: Option<String>,
    pub part: Part,
    pub condition: Condition,
    pub negative: bool,
    pub match_all: bool,
    pub case_insensitive: bool,
    pub status: Vec<i32>,
    pub size: Vec<i64>,
    pub words: Vec<String>,
    pub regexes: Vec<regex::Regex>,
    pub binary: Vec<Vec<u8>>,
    pub dsl: Vec<Arc<Expr>>,
}

/// Strip a leading `(` and trailing `)` and escape the remainder as a
/// literal (spec §4.4's documented idiosyncrasy: "treat parenthesized
/// patterns as literal").
fn quote_meta_parenthesized(pattern: &str) -> String {
    if let Some(stripped) = pattern.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        regex::escape(stripped)
    } else {
        pattern.to_string()
    }
}

impl RawMatcher {
    pub fn validate(&self) -> Result<()> {
        match self.matcher_type {
            MatcherType::Status if self.status.is_empty() => {
                return Err(FingerprintError::invalid_input("status matcher requires `status`"))
            }
            MatcherType::Size if self.size.is_empty() => {
                return Err(FingerprintError::invalid_input("size matcher requires `size`"))
            }
            MatcherType::Word if self.words.is_empty() => {
                return Err(FingerprintError::invalid_input("word matcher requires `words`"))
            }
            MatcherType::Regex if self.regex.is_empty() => {
                return Err(FingerprintError::invalid_input("regex matcher requires `regex`"))
            }
            MatcherType::Binary if self.binary.is_empty() => {
                return Err(FingerprintError::invalid_input("binary matcher requires `binary`"))
            }
            MatcherType::Dsl if self.dsl.is_empty() => {
                return Err(FingerprintError::invalid_input("dsl matcher requires `dsl`"))
            }
            _ => {}
        }
        if self.case_insensitive && self.matcher_type != MatcherType::Word {
            return Err(FingerprintError::invalid_input(
                "case_insensitive is only valid on word matchers",
            ));
        }
        if !matches!(self.encoding.as_str(), "" | "hex") {
            return Err(FingerprintError::invalid_input(format!(
                "unknown encoding {:?}",
                self.encoding
            )));
        }
        Ok(())
    }

    pub fn compile(&self) -> Result<CompiledMatcher> {
        self.validate()?;

        let mut words = self.words.clone();
        if self.encoding == "hex" {
            words = words
                .iter()
                .map(|w| {
                    hex::decode(w)
                        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                        .map_err(|e| {
                            FingerprintError::compilation_failure(
                                format!("word {w:?}"),
                                e.to_string(),
                            )
                        })
                })
                .collect::<Result<_>>()?;
        }
        if self.case_insensitive {
            words = words.iter().map(|w| w.to_ascii_lowercase()).collect();
        }

        let regexes = self
            .regex
            .iter()
            .map(|pattern| {
                let literal = quote_meta_parenthesized(pattern);
                regex::Regex::new(&literal).map_err(|e| {
                    FingerprintError::compilation_failure(format!("regex {pattern:?}"), e.to_string())
                })
            })
            .collect::<Result<_>>()?;

        let binary = self
            .binary
            .iter()
            .map(|raw| {
                hex::decode(raw).map_err(|e| {
                    FingerprintError::compilation_failure(format!("binary {raw:?}"), e.to_string())
                })
            })
            .collect::<Result<_>>()?;

        let dsl = self
            .dsl
            .iter()
            .map(|src| {
                crate::dsl::eval::compile(src)
                    .map(Arc::new)
                    .map_err(|e| FingerprintError::compilation_failure(format!("dsl {src:?}"), e.to_string()))
            })
            .collect::<Result<_>>()?;

        Ok(CompiledMatcher {
            matcher_type: self.matcher_type,
            name: self.name.clone(),
            part: self.part,
            condition: self.condition,
            negative: self.negative,
            match_all: self.match_all,
            case_insensitive: self.case_insensitive,
            status: self.status.clone(),
            size: self.size.clone(),
            words,
            regexes,
            binary,
            dsl,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtractor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub extractor_type: Option<String>,
    #[serde(default)]
    pub part: Part,
    #[serde(default)]
    pub regex: Vec<String>,
    #[serde(default)]
    pub kval: Vec<String>,
    #[serde(default)]
    pub json: Vec<String>,
    #[serde(default)]
    pub dsl: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_confidence")]
    pub confidence: u32,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub implies: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub cpe: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub classification: Option<serde_json::Value>,
}

fn default_confidence() -> u32 {
    100
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHttpEntry {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: Vec<String>,
    #[serde(default = "default_condition")]
    pub matchers_condition: Condition,
    #[serde(default)]
    pub matchers: Vec<RawMatcher>,
    #[serde(default)]
    pub extractors: Vec<RawExtractor>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRuleDocument {
    pub id: String,
    #[serde(default)]
    pub info: RuleInfo,
    #[serde(default)]
    pub http: Vec<RawHttpEntry>,
}

/// A compiled HTTP entry. Only the `{{BaseURL}}` path template gates
/// matcher evaluation in this crate's core (spec §4.4 "Path gating");
/// other path templates are reserved for active probing and carried here
/// only for round-tripping, never evaluated.
#[derive(Debug, Clone)]
pub struct CompiledHttpEntry {
    pub method: String,
    pub path: Vec<String>,
    pub matchers_condition: Condition,
    pub matchers: Vec<CompiledMatcher>,
    pub extractors: Vec<RawExtractor>,
}

#[derive(Debug, Clone)]
pub struct RuleDocument {
    pub id: String,
    pub info: RuleInfo,
    pub http: Vec<CompiledHttpEntry>,
}

impl RuleDocument {
    pub fn compile(raw: RawRuleDocument) -> Result<RuleDocument> {
        let http = raw
            .http
            .into_iter()
            .map(|entry| {
                let matchers = entry
                    .matchers
                    .iter()
                    .map(|m| m.compile())
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledHttpEntry {
                    method: entry.method,
                    path: entry.path,
                    matchers_condition: entry.matchers_condition,
                    matchers,
                    extractors: entry.extractors,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RuleDocument {
            id: raw.id,
            info: raw.info,
            http,
        })
    }

    pub fn parse_yaml(yaml: &str) -> Result<RuleDocument> {
        let raw: RawRuleDocument = serde_yaml::from_str(yaml)
            .map_err(|e| FingerprintError::invalid_input(format!("bad rule document YAML: {e}")))?;
        RuleDocument::compile(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_compiles_minimal_rule() {
        let yaml = r#"
id: wordpress-detect
info:
  name: WordPress
  version: "1.0"
  confidence: 90
http:
  - method: GET
    path:
      - "{{BaseURL}}"
    matchers_condition: and
    matchers:
      - type: word
        part: body
        words:
          - "wp-content"
      - type: status
        status:
          - 200
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        assert_eq!(doc.id, "wordpress-detect");
        assert_eq!(doc.info.confidence, 90);
        assert_eq!(doc.http[0].matchers.len(), 2);
        assert_eq!(doc.http[0].matchers_condition, Condition::And);
    }

    #[test]
    fn hex_encoded_words_are_decoded_at_compile_time() {
        let yaml = r#"
id: hex-words
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: word
        encoding: hex
        words:
          - "61646d696e"
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        assert_eq!(doc.http[0].matchers[0].words, vec!["admin".to_string()]);
    }

    #[test]
    fn parenthesized_regex_is_treated_as_literal() {
        let yaml = r#"
id: literal-regex
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: regex
        regex:
          - "(1.2.3)"
"#;
        let doc = RuleDocument::parse_yaml(yaml).unwrap();
        assert!(doc.http[0].matchers[0].regexes[0].is_match("version 1.2.3 here"));
        assert!(!doc.http[0].matchers[0].regexes[0].is_match("version 1x2x3 here"));
    }

    #[test]
    fn case_insensitive_on_non_word_matcher_is_rejected() {
        let raw = RawMatcher {
            matcher_type: MatcherType::Regex,
            name: None,
            part: Part::default(),
            condition: Condition::Or,
            negative: false,
            match_all: false,
            encoding: String::new(),
            case_insensitive: true,
            status: vec![],
            size: vec![],
            words: vec![],
            regex: vec!["x".to_string()],
            binary: vec![],
            dsl: vec![],
        };
        assert!(raw.compile().is_err());
    }
}
