use std::fmt;

/// A DSL runtime value. Mirrors the dynamic typing of the Go original's
/// `interface{}`-based expression engine: strings, numbers and bools flow
/// freely between variables and helper-function arguments/results.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    /// A handful of functions (`sort`, `uniq`, `split`) return/accept lists.
    List(Vec<Value>),
}

impl Value {
    pub fn as_str_lossy(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::List(items) => items
                .iter()
                .map(|v| v.as_str_lossy())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::List(_) => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }
}

/// Go's `%v`-ish number formatting: integral floats print without a
/// trailing `.0` (`ToString` in `utils.go` behaves the same way for the
/// numeric types it stringifies).
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_format_without_decimal() {
        assert_eq!(Value::Number(42.0).as_str_lossy(), "42");
        assert_eq!(Value::Number(42.5).as_str_lossy(), "42.5");
    }

    #[test]
    fn truthiness_matches_common_script_semantics() {
        assert!(Value::String("x".into()).as_bool());
        assert!(!Value::String("".into()).as_bool());
        assert!(Value::Number(1.0).as_bool());
        assert!(!Value::Number(0.0).as_bool());
    }
}
