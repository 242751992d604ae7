//! Edge and branch predicates evaluated against a task's JSON output.
//!
//! Paths are dotted (`result.items.0.id`); numeric segments index arrays.
//! An empty path refers to the whole value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Truthy { path: String },
    Falsy { path: String },
    Exists { path: String },
    Equals { path: String, value: Value },
    NotEquals { path: String, value: Value },
    GreaterThan { path: String, value: f64 },
    LessThan { path: String, value: f64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn truthy(path: impl Into<String>) -> Self {
        Self::Truthy { path: path.into() }
    }

    pub fn equals(path: impl Into<String>, value: Value) -> Self {
        Self::Equals { path: path.into(), value }
    }

    /// Evaluate the predicate. A missing path is treated as `null`.
    pub fn evaluate(&self, data: &Value) -> bool {
        match self {
            Self::Truthy { path } => lookup(data, path).is_some_and(is_truthy),
            Self::Falsy { path } => !lookup(data, path).is_some_and(is_truthy),
            Self::Exists { path } => lookup(data, path).is_some_and(|v| !v.is_null()),
            Self::Equals { path, value } => lookup(data, path).unwrap_or(&Value::Null) == value,
            Self::NotEquals { path, value } => lookup(data, path).unwrap_or(&Value::Null) != value,
            Self::GreaterThan { path, value } => {
                lookup(data, path).and_then(Value::as_f64).is_some_and(|v| v > *value)
            }
            Self::LessThan { path, value } => {
                lookup(data, path).and_then(Value::as_f64).is_some_and(|v| v < *value)
            }
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(data)),
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(data)),
            Self::Not { condition } => !condition.evaluate(data),
        }
    }
}

/// Resolve a dotted path inside `data`.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim_start_matches('.');
    if path.is_empty() {
        return Some(data);
    }

    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let data = json!({ "result": { "items": [{ "id": 7 }] } });
        assert_eq!(lookup(&data, "result.items.0.id"), Some(&json!(7)));
        assert_eq!(lookup(&data, "result.missing"), None);
        assert_eq!(lookup(&data, ""), Some(&data));
    }

    #[test]
    fn truthiness_follows_json_emptiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!({ "a": 1 })));
        assert!(is_truthy(&json!(0.5)));
    }

    #[test]
    fn comparison_operators() {
        let data = json!({ "score": 0.8, "label": "cat" });
        assert!(Condition::GreaterThan { path: "score".into(), value: 0.5 }.evaluate(&data));
        assert!(!Condition::LessThan { path: "score".into(), value: 0.5 }.evaluate(&data));
        assert!(Condition::equals("label", json!("cat")).evaluate(&data));
        assert!(Condition::NotEquals { path: "label".into(), value: json!("dog") }.evaluate(&data));
        // Numeric comparison against a non-number never matches.
        assert!(!Condition::GreaterThan { path: "label".into(), value: 0.0 }.evaluate(&data));
    }

    #[test]
    fn missing_path_is_falsy_and_not_existing() {
        let data = json!({});
        assert!(Condition::Falsy { path: "ok".into() }.evaluate(&data));
        assert!(!Condition::truthy("ok").evaluate(&data));
        assert!(!Condition::Exists { path: "ok".into() }.evaluate(&data));
    }

    #[test]
    fn combinators() {
        let data = json!({ "a": true, "b": false });
        let all = Condition::All { conditions: vec![Condition::truthy("a"), Condition::truthy("b")] };
        let any = Condition::Any { conditions: vec![Condition::truthy("a"), Condition::truthy("b")] };
        assert!(!all.evaluate(&data));
        assert!(any.evaluate(&data));
        assert!(Condition::Not { condition: Box::new(all) }.evaluate(&data));
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let cond: Condition =
            serde_json::from_value(json!({ "op": "equals", "path": "status", "value": "ok" }))
                .unwrap();
        assert_eq!(cond, Condition::equals("status", json!("ok")));
    }
}
