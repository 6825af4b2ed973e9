//! The `{{ ... }}` / `§...§` splice pipeline (spec §4.3).
//!
//! Two passes:
//! 1. Plain placeholders — `{{key}}` and `§key§` — are replaced with the
//!    stringified value straight from the variable map. This pass runs
//!    outside-in so a literal `{{` that is itself part of a variable's
//!    value is never re-scanned.
//! 2. Anything still shaped like `{{ expr }}` is tried as a DSL expression:
//!    it must either parse as an arithmetic expression referencing a known
//!    variable, or parse with the helper-function set bound. Anything that
//!    parses is compiled (cached by source text), evaluated, and spliced
//!    back in as its stringified result. Anything that fails to parse is
//!    left verbatim — it was never meant to be an expression.

use std::sync::Arc;

use moka::sync::Cache;

use super::eval::{self, DslRuntimeError, Vars};
use super::expr::Expr;

/// Process-wide cache of compiled expressions, keyed by source text, shared
/// across every matcher (spec §9: "cache on the owning matcher" generalizes
/// to a shared cache here since the substitution pipeline runs ad hoc over
/// arbitrary rule-doc and catalog strings, not just matcher-owned ones).
static EXPR_CACHE: std::sync::OnceLock<Cache<String, Arc<Expr>>> = std::sync::OnceLock::new();

fn expr_cache() -> &'static Cache<String, Arc<Expr>> {
    EXPR_CACHE.get_or_init(|| Cache::new(4096))
}

fn compile_cached(src: &str) -> Result<Arc<Expr>, DslRuntimeError> {
    if let Some(hit) = expr_cache().get(src) {
        return Ok(hit);
    }
    let compiled = Arc::new(eval::compile(src)?);
    expr_cache().insert(src.to_string(), compiled.clone());
    Ok(compiled)
}

/// Replace every `{{key}}` / `§key§` plain-placeholder occurrence with the
/// variable map's stringified value for `key`. Unknown keys are left
/// untouched (they may turn out to be expressions, handled in pass two).
fn substitute_plain_placeholders(input: &str, vars: &Vars) -> String {
    let mut out = input.to_string();
    for (key, value) in vars.iter() {
        let rendered = value.as_str_lossy();
        out = out.replace(&format!("{{{{{key}}}}}"), &rendered);
        out = out.replace(&format!("§{key}§"), &rendered);
    }
    out
}

/// Find every `{{ ... }}` span (non-nested, leftmost-longest within its
/// braces) in `input`.
fn find_expr_spans(input: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find("}}") {
                let close = i + 2 + end;
                spans.push((i, close + 2));
                i = close + 2;
                continue;
            }
        }
        i += 1;
    }
    spans
}

fn looks_like_expression(src: &str, vars: &Vars) -> bool {
    match eval::compile(src) {
        Ok(expr) => expr_references_known_symbol(&expr, vars),
        Err(_) => false,
    }
}

/// An expression only counts as "real" (spec §4.3 (a)/(b)) if it names at
/// least one known variable or calls at least one helper function —
/// otherwise a literal `{{ "just text" }}`-shaped span would be treated as
/// code instead of being left alone.
fn expr_references_known_symbol(expr: &Expr, vars: &Vars) -> bool {
    match expr {
        Expr::Literal(_) => false,
        Expr::Var(name) => vars.contains_key(name),
        Expr::Call(name, args) => {
            super::functions::FUNCTION_NAMES.contains(&name.as_str())
                || args.iter().any(|a| expr_references_known_symbol(a, vars))
        }
        Expr::Unary(_, inner) => expr_references_known_symbol(inner, vars),
        Expr::Binary(_, l, r) => {
            expr_references_known_symbol(l, vars) || expr_references_known_symbol(r, vars)
        }
    }
}

/// Run the full substitution pipeline against `input` and the given
/// variable map.
pub fn substitute(input: &str, vars: &Vars) -> String {
    let after_plain = substitute_plain_placeholders(input, vars);

    let spans = find_expr_spans(&after_plain);
    if spans.is_empty() {
        return after_plain;
    }

    let mut out = String::with_capacity(after_plain.len());
    let mut last_end = 0;
    for (start, end) in spans {
        let inner = after_plain[start + 2..end - 2].trim();
        out.push_str(&after_plain[last_end..start]);
        if looks_like_expression(inner, vars) {
            match compile_cached(inner).and_then(|e| eval::eval(&e, vars)) {
                Ok(value) => out.push_str(&value.as_str_lossy()),
                Err(e) => {
                    tracing::warn!("dsl substitution failed for {inner:?}: {e}");
                    out.push_str(&after_plain[start..end]);
                }
            }
        } else {
            out.push_str(&after_plain[start..end]);
        }
        last_end = end;
    }
    out.push_str(&after_plain[last_end..]);
    out
}

/// Build the standard variable map for one [`crate::observation::Observation`].
pub fn observation_vars(obs: &crate::observation::Observation) -> Vars {
    use super::value::Value;
    let mut vars = Vars::new();
    vars.insert("url".to_string(), Value::String(obs.url.clone()));
    vars.insert("status_code".to_string(), Value::Number(obs.status_code as f64));
    vars.insert("title".to_string(), Value::String(obs.title.clone()));
    vars.insert("body".to_string(), Value::String(obs.html.clone()));
    vars.insert("headers".to_string(), Value::String(obs.headers_flat()));
    vars.insert(
        "scripts".to_string(),
        Value::List(obs.scripts.iter().map(|s| Value::String(s.clone())).collect()),
    );
    vars.insert(
        "cookies".to_string(),
        Value::String(
            obs.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        ),
    );
    let meta_flat: String = obs
        .meta
        .iter()
        .flat_map(|(k, vs)| vs.iter().map(move |v| format!("{k}={v}")))
        .collect::<Vec<_>>()
        .join("; ");
    vars.insert("meta".to_string(), Value::String(meta_flat));
    vars.insert(
        "cert_issuer".to_string(),
        Value::String(obs.cert_issuer.join(", ")),
    );
    let dns_flat: String = obs
        .dns
        .iter()
        .flat_map(|(k, vs)| vs.iter().map(move |v| format!("{k}={v}")))
        .collect::<Vec<_>>()
        .join("; ");
    vars.insert("dns".to_string(), Value::String(dns_flat));
    vars.insert(
        "favicon".to_string(),
        Value::String(obs.favicon.clone().unwrap_or_default()),
    );
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::value::Value;

    fn vars() -> Vars {
        let mut v = Vars::new();
        v.insert("status_code".to_string(), Value::Number(200.0));
        v.insert("body".to_string(), Value::String("Powered by WP".to_string()));
        v
    }

    #[test]
    fn plain_placeholder_substitution() {
        let out = substitute("status is {{status_code}}", &vars());
        assert_eq!(out, "status is 200");
    }

    #[test]
    fn expression_span_is_evaluated() {
        let out = substitute("match={{ contains(body, \"WP\") }}", &vars());
        assert_eq!(out, "match=true");
    }

    #[test]
    fn non_expression_braces_are_left_alone() {
        let v = Vars::new();
        let out = substitute("{{ just some literal text }}", &v);
        assert_eq!(out, "{{ just some literal text }}");
    }

    #[test]
    fn nested_outer_wins_when_both_present() {
        let mut v = vars();
        v.insert("inner".to_string(), Value::String("{{status_code}}".to_string()));
        // Outer substitution runs on the raw input; {{inner}} is replaced
        // with the literal text "{{status_code}}" and is NOT re-scanned.
        let out = substitute("{{inner}}", &v);
        assert_eq!(out, "{{status_code}}");
    }
}
