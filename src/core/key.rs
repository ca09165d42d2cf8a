//! Entity identifiers and typed keys

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of a stored entity: either an integer or a string name.
///
/// Textual identifiers consisting only of ASCII digits (path segments,
/// query values, JSON strings) are read as integers, so `/widgets/7` and a
/// JSON reference `7` or `"7"` address the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Name(String),
}

impl EntityId {
    /// Parse an identifier from its textual form
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<i64>() {
                return Some(EntityId::Int(n));
            }
        }
        Some(EntityId::Name(raw.to_string()))
    }

    /// Build an identifier from an untrusted JSON value
    ///
    /// Only non-negative integers and non-empty strings are accepted.
    pub fn from_json(raw: &Value) -> Option<Self> {
        match raw {
            Value::Number(n) => n.as_i64().filter(|n| *n >= 0).map(EntityId::Int),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            EntityId::Int(n) => Value::from(*n),
            EntityId::Name(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(n) => write!(f, "{}", n),
            EntityId::Name(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Int(n)
    }
}

impl From<i32> for EntityId {
    fn from(n: i32) -> Self {
        EntityId::Int(i64::from(n))
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::parse(s).unwrap_or_else(|| EntityId::Name(String::new()))
    }
}

/// A typed pointer to an entity: the entity kind plus its identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: String,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_digits_as_integer() {
        assert_eq!(EntityId::parse("7"), Some(EntityId::Int(7)));
        assert_eq!(EntityId::parse("u1"), Some(EntityId::Name("u1".into())));
        assert_eq!(EntityId::parse("-3"), Some(EntityId::Name("-3".into())));
        assert_eq!(EntityId::parse(""), None);
    }

    #[test]
    fn test_parse_overflowing_digits_stays_a_name() {
        let raw = "99999999999999999999999";
        assert_eq!(EntityId::parse(raw), Some(EntityId::Name(raw.into())));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(EntityId::from_json(&json!(12)), Some(EntityId::Int(12)));
        assert_eq!(EntityId::from(12), EntityId::Int(12));
        assert_eq!(EntityId::from_json(&json!("12")), Some(EntityId::Int(12)));
        assert_eq!(EntityId::from_json(&json!("abc")), Some(EntityId::Name("abc".into())));
        assert_eq!(EntityId::from_json(&json!(1.5)), None);
        assert_eq!(EntityId::from_json(&json!(true)), None);
        assert_eq!(EntityId::from_json(&json!(null)), None);
        assert_eq!(EntityId::from_json(&json!(-1)), None);
    }

    #[test]
    fn test_json_form_matches_variant() {
        assert_eq!(EntityId::Int(3).to_json(), json!(3));
        assert_eq!(EntityId::Name("x".into()).to_json(), json!("x"));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(EntityKey::new("user", "u1").to_string(), "user/u1");
        assert_eq!(EntityKey::new("widget", 7).to_string(), "widget/7");
    }
}
