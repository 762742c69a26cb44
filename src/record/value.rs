//! Cell values of a clinical-trial record

use serde::{Deserialize, Serialize};

/// A single cell: a scalar, or an ordered list of scalars.
///
/// Deserializes from plain JSON (`null`, `true`, `42`, `"text"`, `[...]`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// Missing means null, NaN, blank text or an empty list.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            Value::Text(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Bool(_) => false,
        }
    }

    /// Scalar text view. A one-element list is treated as its element.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) if !n.is_nan() => Some(format_number(*n)),
            Value::Bool(b) => Some(b.to_string()),
            Value::List(items) if items.len() == 1 => items[0].as_text(),
            _ => None,
        }
    }

    /// Scalar numeric view. Numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::List(items) if items.len() == 1 => items[0].as_f64(),
            _ => None,
        }
    }

    /// Elements of a list-valued cell as text, skipping missing elements.
    /// A non-missing scalar counts as a one-element list.
    pub fn texts(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.iter().filter_map(Value::as_text).collect(),
            other => other.as_text().into_iter().collect(),
        }
    }

    /// Elements of a list-valued cell as numbers, keeping positions.
    pub fn numbers(&self) -> Vec<Option<f64>> {
        match self {
            Value::List(items) => items.iter().map(Value::as_f64).collect(),
            Value::Null => Vec::new(),
            other => vec![other.as_f64()],
        }
    }

    /// Elements of a list-valued cell as text, keeping positions.
    pub fn text_elements(&self) -> Vec<Option<String>> {
        match self {
            Value::List(items) => items.iter().map(Value::as_text).collect(),
            other if other.is_missing() => Vec::new(),
            other => vec![other.as_text()],
        }
    }

    /// Element count of a list-valued cell (0 when missing, 1 for a scalar).
    pub fn list_len(&self) -> usize {
        match self {
            Value::List(items) => items.len(),
            other if other.is_missing() => 0,
            _ => 1,
        }
    }

    /// Wrap strings into a list value.
    pub fn text_list<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        Value::List(items.into_iter().map(|s| Value::Text(s.into())).collect())
    }

    /// Numeric value, `Null` when absent.
    pub fn number(value: Option<f64>) -> Self {
        value.map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Integral numbers print without a fractional part so that `2` and `2.0`
/// encode to the same category.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
