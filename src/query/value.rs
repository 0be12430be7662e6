//! A small dynamic value type used by the query evaluator and translator.
//!
//! Entities are opaque host types; [`Value`] is the currency queries speak
//! when comparing a field's runtime content against a filter's operand.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A dynamically-typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// An ordered list of values, used by `ARRAY_CONTAINS`/`ARRAY_CONTAINS_ANY`.
    List(Vec<Value>),
}

impl Value {
    /// Render the value the way the evaluator does when two operands are
    /// not directly comparable: a display-string coercion.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::display_string).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Whether two values are of the same "comparable kind" — both
    /// numeric, or both text, or both bool — such that natural ordering
    /// applies instead of falling back to string comparison.
    fn comparable_kind(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
                | (Value::Text(_), Value::Text(_))
                | (Value::Bool(_), Value::Bool(_))
        )
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering semantics: null sorts below any non-null value;
    /// comparable kinds use natural order; otherwise both sides are
    /// coerced to their display-string and compared lexicographically.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ if self.comparable_kind(other) => match (self, other) {
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                (Value::Text(a), Value::Text(b)) => a.cmp(b),
                _ => self
                    .as_f64()
                    .unwrap()
                    .partial_cmp(&other.as_f64().unwrap())
                    .unwrap_or(Ordering::Equal),
            },
            _ => self.display_string().cmp(&other.display_string()),
        }
    }

    /// Substring test used by `CONTAINS`.
    pub fn contains_substring(&self, needle: &Value) -> bool {
        self.display_string().contains(&needle.display_string())
    }

    /// Prefix test used by `STARTS_WITH`.
    pub fn starts_with(&self, needle: &Value) -> bool {
        self.display_string().starts_with(&needle.display_string())
    }

    /// Suffix test used by `ENDS_WITH`.
    pub fn ends_with(&self, needle: &Value) -> bool {
        self.display_string().ends_with(&needle.display_string())
    }

    /// Membership test for `ARRAY_CONTAINS`: is `needle` an element of this
    /// list-valued field?
    pub fn array_contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(items) => items.iter().any(|v| v == needle),
            _ => false,
        }
    }

    /// Non-empty intersection test for `ARRAY_CONTAINS_ANY`.
    pub fn array_contains_any(&self, candidates: &Value) -> bool {
        match (self, candidates) {
            (Value::List(items), Value::List(candidates)) => {
                items.iter().any(|v| candidates.contains(v))
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_less_than_anything() {
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(0).compare(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn numeric_kinds_compare_naturally() {
        assert_eq!(Value::Int(1).compare(&Value::Float(2.0)), Ordering::Less);
    }

    #[test]
    fn incomparable_kinds_fall_back_to_display_string() {
        // A text value and a bool value aren't the same "comparable kind",
        // so they're compared as strings: "true" < "zzz".
        assert_eq!(
            Value::Bool(true).compare(&Value::Text("zzz".into())),
            Ordering::Less
        );
    }

    #[test]
    fn substring_predicates() {
        let v = Value::Text("hello world".into());
        assert!(v.contains_substring(&Value::Text("lo wo".into())));
        assert!(v.starts_with(&Value::Text("hello".into())));
        assert!(v.ends_with(&Value::Text("world".into())));
    }

    #[test]
    fn array_predicates() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(list.array_contains(&Value::Int(2)));
        assert!(!list.array_contains(&Value::Int(9)));

        let candidates = Value::List(vec![Value::Int(9), Value::Int(3)]);
        assert!(list.array_contains_any(&candidates));
    }
}
