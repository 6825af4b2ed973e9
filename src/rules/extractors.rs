//! Extractors (spec §11.3): a soft-failing, post-match step that pulls
//! values out of a matched Observation into a detected technology's
//! metadata map. They never gate a match — a failing extractor just
//! contributes nothing.

use std::collections::BTreeMap;

use super::model::{Part, RawExtractor};
use crate::dsl::{self, substitution::observation_vars};
use crate::observation::Observation;

/// Run every extractor attached to an `http` entry against an Observation,
/// returning a name→values map. Failures are logged and skipped, never
/// propagated (spec §4.4 "their failure is always soft").
pub fn run_all(extractors: &[RawExtractor], obs: &Observation) -> BTreeMap<String, Vec<String>> {
    let vars = observation_vars(obs);
    let mut out = BTreeMap::new();
    for (idx, extractor) in extractors.iter().enumerate() {
        let name = extractor
            .name
            .clone()
            .unwrap_or_else(|| format!("extractor_{idx}"));
        match run_one(extractor, obs, &vars) {
            Ok(values) if !values.is_empty() => {
                out.insert(name, values);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("extractor {name:?} failed softly: {e}"),
        }
    }
    out
}

fn select_part(part: Part, obs: &Observation) -> String {
    match part {
        Part::Url => obs.url.clone(),
        Part::Js | Part::Dom => obs.html.clone(),
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

fn run_one(extractor: &RawExtractor, obs: &Observation, vars: &dsl::eval::Vars) -> Result<Vec<String>, String> {
    let part = select_part(extractor.part, obs);
    match extractor.extractor_type.as_deref().unwrap_or("regex") {
        "regex" => {
            let mut out = Vec::new();
            for pattern in &extractor.regex {
                let re = regex::Regex::new(pattern).map_err(|e| e.to_string())?;
                for caps in re.captures_iter(&part) {
                    let text = caps.get(caps.len().saturating_sub(1)).map(|m| m.as_str().to_string());
                    if let Some(t) = text {
                        out.push(t);
                    }
                }
            }
            Ok(out)
        }
        "kval" => {
            let mut out = Vec::new();
            for key in &extractor.kval {
                if let Some(values) = obs.headers.get(key) {
                    out.extend(values.iter().cloned());
                }
            }
            Ok(out)
        }
        "json" => {
            let mut out = Vec::new();
            let value: serde_json::Value = serde_json::from_str(&part).map_err(|e| e.to_string())?;
            for path in &extractor.json {
                if let Some(found) = json_path_lookup(&value, path) {
                    out.push(found);
                }
            }
            Ok(out)
        }
        "dsl" => {
            let mut out = Vec::new();
            for src in &extractor.dsl {
                let expr = dsl::eval::compile(src).map_err(|e| e.to_string())?;
                let value = dsl::eval::eval(&expr, vars).map_err(|e| e.to_string())?;
                out.push(value.as_str_lossy());
            }
            Ok(out)
        }
        other => Err(format!("unknown extractor type {other:?}")),
    }
}

/// A minimal dotted-path JSON lookup (`a.b.0.c`) — enough for extractor
/// use; not a general JSONPath implementation.
fn json_path_lookup(value: &serde_json::Value, path: &str) -> Option<String> {
    let mut cur = value;
    for segment in path.split('.') {
        cur = if let Ok(idx) = segment.parse::<usize>() {
            cur.get(idx)?
        } else {
            cur.get(segment)?
        };
    }
    Some(match cur {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn regex_extractor_pulls_capture_group() {
        let mut obs = blank_observation();
        obs.html = "generator: WordPress 6.4.2".to_string();
        let extractor = RawExtractor {
            name: Some("wp_version".to_string()),
            extractor_type: Some("regex".to_string()),
            part: Part::Body,
            regex: vec![r"WordPress ([\d.]+)".to_string()],
            kval: vec![],
            json: vec![],
            dsl: vec![],
        };
        let out = run_all(&[extractor], &obs);
        assert_eq!(out.get("wp_version").unwrap(), &vec!["6.4.2".to_string()]);
    }

    #[test]
    fn failing_extractor_is_soft() {
        let obs = blank_observation();
        let extractor = RawExtractor {
            name: Some("bad".to_string()),
            extractor_type: Some("regex".to_string()),
            part: Part::Body,
            regex: vec!["(unterminated".to_string()],
            kval: vec![],
            json: vec![],
            dsl: vec![],
        };
        let out = run_all(&[extractor], &obs);
        assert!(out.is_empty());
    }
}
