use regex::Regex;

use crate::error::{FingerprintError, Result};

/// A single compiled pattern: `value\;key:val\;key:val`.
///
/// `value` becomes a case-insensitive regex (escaping `\/` → `/` and
/// `\\` → `\` first, as the source catalog format requires). The
/// remaining `\;`-separated segments are `key:val` pairs; the only keys
/// this engine understands are `version` (a template over capture
/// groups) and `confidence` (an integer, default 100).
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub value: String,
    pub regex: Regex,
    pub version_template: Option<String>,
    pub confidence: u32,
    /// `Some` only when the raw string carried an explicit `\;confidence:N`
    /// segment — distinct from `confidence`, which always holds a usable
    /// value (100 by default). Implies/excludes resolution needs to tell
    /// "unspecified" apart from "explicitly 100".
    pub confidence_explicit: Option<u32>,
}

/// Matches a version-template placeholder: `\N` or `\N?a:b`.
fn version_placeholder_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\(\d+)(?:\?([^:\\]*):([^\\]*))?").unwrap())
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Pattern> {
        let mut parts = raw.split(r"\;");
        let value = parts.next().unwrap_or_default();

        let escaped = value.replace(r"\/", "/").replace(r"\\", "\\");
        let regex = Regex::new(&format!("(?i){escaped}")).map_err(|e| {
            FingerprintError::compilation_failure(format!("pattern {raw:?}"), e.to_string())
        })?;

        let mut version_template = None;
        let mut confidence = 100u32;
        let mut confidence_explicit = None;
        for kv in parts {
            if let Some((key, val)) = kv.split_once(':') {
                match key {
                    "version" => version_template = Some(val.to_string()),
                    "confidence" => {
                        if let Ok(v) = val.parse() {
                            confidence = v;
                            confidence_explicit = Some(v);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Pattern {
            source: raw.to_string(),
            value: value.to_string(),
            regex,
            version_template,
            confidence,
            confidence_explicit,
        })
    }

    /// Apply this pattern's version template to a successful match's capture
    /// groups. `\N` substitutes capture group N's text (empty if unmatched);
    /// `\N?a:b` substitutes `a` if group N matched, else `b`.
    pub fn extract_version(&self, caps: &regex::Captures) -> Option<String> {
        let template = self.version_template.as_ref()?;
        let mut out = String::new();
        let mut last_end = 0;
        for m in version_placeholder_re().find_iter(template) {
            out.push_str(&template[last_end..m.start()]);
            last_end = m.end();
            let full = version_placeholder_re().captures(m.as_str()).unwrap();
            let idx: usize = full[1].parse().unwrap_or(0);
            let group = caps.get(idx);
            if let (Some(a), Some(b)) = (full.get(2), full.get(3)) {
                out.push_str(if group.is_some() { a.as_str() } else { b.as_str() });
            } else if let Some(g) = group {
                out.push_str(g.as_str());
            }
        }
        out.push_str(&template[last_end..]);
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_and_confidence() {
        let p = Pattern::parse(r"nginx(?:/([\d.]+))?\;version:\1\;confidence:90").unwrap();
        assert_eq!(p.confidence, 90);
        assert_eq!(p.version_template.as_deref(), Some(r"\1"));
        let caps = p.regex.captures("nginx/1.19.0").unwrap();
        assert_eq!(p.extract_version(&caps).as_deref(), Some("1.19.0"));
    }

    #[test]
    fn ternary_template_picks_branch_by_group_presence() {
        let p = Pattern::parse(r"foo(bar)?\;version:\1?yes:no").unwrap();
        let caps_with = p.regex.captures("foobar").unwrap();
        assert_eq!(p.extract_version(&caps_with).as_deref(), Some("yes"));
        let caps_without = p.regex.captures("foo").unwrap();
        assert_eq!(p.extract_version(&caps_without).as_deref(), Some("no"));
    }

    #[test]
    fn defaults_confidence_to_100_and_is_case_insensitive() {
        let p = Pattern::parse("WordPress").unwrap();
        assert_eq!(p.confidence, 100);
        assert!(p.regex.is_match("this site runs wordpress"));
    }

    #[test]
    fn slash_and_backslash_escapes_are_unescaped_before_compiling() {
        let p = Pattern::parse(r"^/wp-content\/themes\\.*$").unwrap();
        assert!(p.regex.is_match("/wp-content/themes\\foo"));
    }
}
