//! Binds [`super::expr::Expr`] to [`super::value::Value`]: variable lookup
//! plus the helper-function library in [`super::functions`].

use std::collections::BTreeMap;
use std::fmt;

use super::expr::{self, Expr};
use super::functions::{self, DslError};
use super::value::Value;

/// The variable bindings an expression can reference — one entry per
/// Observation key named in spec §4.3 (`url`, `status_code`, `title`,
/// `body`, `headers`, `scripts`, `cookies`, `meta`, `cert_issuer`, `dns`,
/// `favicon`).
pub type Vars = BTreeMap<String, Value>;

#[derive(Debug)]
pub enum DslRuntimeError {
    Parse(String),
    Eval(String),
}

impl fmt::Display for DslRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DslRuntimeError::Parse(e) => write!(f, "dsl parse error: {e}"),
            DslRuntimeError::Eval(e) => write!(f, "dsl eval error: {e}"),
        }
    }
}
impl std::error::Error for DslRuntimeError {}

impl From<DslError> for DslRuntimeError {
    fn from(e: DslError) -> Self {
        DslRuntimeError::Eval(e.0)
    }
}

/// Compile an expression source string once. Callers (matchers) own the
/// resulting `Expr` and re-evaluate it against different `Vars` maps —
/// "compile-once, evaluate-many" per spec §9 Design Notes.
pub fn compile(src: &str) -> Result<Expr, DslRuntimeError> {
    expr::parse(src).map_err(|e| DslRuntimeError::Parse(e.0))
}

/// Evaluate a compiled expression against a variable map.
pub fn eval(expr: &Expr, vars: &Vars) -> Result<Value, DslRuntimeError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => Ok(vars.get(name).cloned().unwrap_or(Value::String(String::new()))),
        Expr::Call(name, args) => {
            let evaluated: Vec<Value> = args
                .iter()
                .map(|a| eval(a, vars))
                .collect::<Result<_, _>>()?;
            Ok(functions::call(name, &evaluated)?)
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, vars)?;
            Ok(match *op {
                "!" => Value::Bool(!v.as_bool()),
                "-" => Value::Number(-v.as_f64().unwrap_or(0.0)),
                other => return Err(DslRuntimeError::Eval(format!("unknown unary operator {other}"))),
            })
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(op, lhs, rhs, vars),
    }
}

fn eval_binary(op: &str, lhs: &Expr, rhs: &Expr, vars: &Vars) -> Result<Value, DslRuntimeError> {
    // Short-circuit boolean operators evaluate their rhs lazily.
    match op {
        "&&" => {
            let l = eval(lhs, vars)?;
            if !l.as_bool() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(eval(rhs, vars)?.as_bool()));
        }
        "||" => {
            let l = eval(lhs, vars)?;
            if l.as_bool() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(eval(rhs, vars)?.as_bool()));
        }
        _ => {}
    }

    let l = eval(lhs, vars)?;
    let r = eval(rhs, vars)?;

    match op {
        "==" => Ok(Value::Bool(values_equal(&l, &r))),
        "!=" => Ok(Value::Bool(!values_equal(&l, &r))),
        "<" | ">" | "<=" | ">=" => {
            let (a, b) = numeric_or_lexical(&l, &r);
            Ok(Value::Bool(match op {
                "<" => a < b,
                ">" => a > b,
                "<=" => a <= b,
                ">=" => a >= b,
                _ => unreachable!(),
            }))
        }
        "+" | "-" | "*" | "/" | "%" => {
            let a = l
                .as_f64()
                .ok_or_else(|| DslRuntimeError::Eval(format!("{l:?} is not numeric")))?;
            let b = r
                .as_f64()
                .ok_or_else(|| DslRuntimeError::Eval(format!("{r:?} is not numeric")))?;
            Ok(Value::Number(match op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "/" => {
                    if b == 0.0 {
                        return Err(DslRuntimeError::Eval("division by zero".to_string()));
                    }
                    a / b
                }
                "%" => a % b,
                _ => unreachable!(),
            }))
        }
        other => Err(DslRuntimeError::Eval(format!("unknown operator {other}"))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if matches!(a, Value::Number(_)) || matches!(b, Value::Number(_)) => x == y,
        _ => a.as_str_lossy() == b.as_str_lossy(),
    }
}

/// Numeric comparison when both sides are genuinely numeric; otherwise
/// falls back to lexical string ordering, encoded as -1/0/1 so the caller's
/// `<`/`>`/`<=`/`>=` match arms work unchanged.
fn numeric_or_lexical(a: &Value, b: &Value) -> (f64, f64) {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return (*x, *y);
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if !matches!(a, Value::String(_)) && !matches!(b, Value::String(_)) => (x, y),
        _ => match a.as_str_lossy().cmp(&b.as_str_lossy()) {
            std::cmp::Ordering::Less => (0.0, 1.0),
            std::cmp::Ordering::Greater => (1.0, 0.0),
            std::cmp::Ordering::Equal => (0.0, 0.0),
        },
    }
}

/// Parse and evaluate a boolean expression in one call, for matchers that
/// only ever need the final truthiness (rule-doc `dsl` matcher entries).
pub fn eval_bool(src: &str, vars: &Vars) -> Result<bool, DslRuntimeError> {
    let expr = compile(src)?;
    Ok(eval(&expr, vars)?.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vars {
        let mut v = Vars::new();
        v.insert("status_code".to_string(), Value::Number(200.0));
        v.insert(
            "body".to_string(),
            Value::String("... Powered by WP ...".to_string()),
        );
        v
    }

    #[test]
    fn scenario_contains_and_status() {
        let vars = vars();
        assert!(eval_bool(r#"contains(body, "Powered by WP") && status_code == 200"#, &vars).unwrap());
    }

    #[test]
    fn scenario_status_mismatch_is_false() {
        let mut vars = vars();
        vars.insert("status_code".to_string(), Value::Number(500.0));
        assert!(!eval_bool(r#"contains(body, "Powered by WP") && status_code == 200"#, &vars).unwrap());
    }

    #[test]
    fn arithmetic_and_comparison() {
        let vars = Vars::new();
        assert!(eval_bool("len(\"abcd\") == 4", &vars).unwrap());
        assert!(eval_bool("1 + 2 * 3 == 7", &vars).unwrap());
    }

    #[test]
    fn short_circuit_and_skips_rhs_errors() {
        let mut vars = Vars::new();
        vars.insert("x".to_string(), Value::Bool(false));
        // rhs would error (unknown function) if evaluated; && must short-circuit.
        assert!(!eval_bool("x && this_is_not_a_function()", &vars).unwrap());
    }
}
