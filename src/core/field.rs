//! Field values, field kinds and wire conversions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::key::EntityKey;

/// A polymorphic field value held by an entity
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Arbitrary JSON stored as-is
    Json(Value),
    DateTime(DateTime<Utc>),
    Reference(EntityKey),
    List(Vec<FieldValue>),
    Null,
}

impl FieldValue {
    /// Get the value as a string if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&EntityKey> {
        match self {
            FieldValue::Reference(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render the value in its bare wire form.
    ///
    /// Timestamps become epoch milliseconds and references become the
    /// referenced identifier. Non-finite floats have no JSON form and render
    /// as null.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::from(s.as_str()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Json(v) => v.clone(),
            FieldValue::DateTime(dt) => Value::from(datetime_to_millis(dt)),
            FieldValue::Reference(key) => key.id.to_json(),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::Null => Value::Null,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Integer(i64::from(i))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FieldValue::DateTime(dt)
    }
}

impl From<EntityKey> for FieldValue {
    fn from(key: EntityKey) -> Self {
        FieldValue::Reference(key)
    }
}

/// Primitive type of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    Json,
}

impl ScalarType {
    /// Coerce an untrusted JSON value into this type.
    ///
    /// Textual forms are accepted for numbers and booleans since query-string
    /// parameters always arrive as strings. Null is accepted by every type.
    pub fn coerce(&self, raw: &Value) -> Option<FieldValue> {
        if raw.is_null() {
            return Some(FieldValue::Null);
        }
        match self {
            ScalarType::String => raw.as_str().map(FieldValue::from),
            ScalarType::Integer => match raw {
                Value::Number(n) => n.as_i64().map(FieldValue::Integer),
                Value::String(s) => s.trim().parse().ok().map(FieldValue::Integer),
                _ => None,
            },
            ScalarType::Float => match raw {
                Value::Number(n) => n.as_f64().map(FieldValue::Float),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(FieldValue::Float),
                _ => None,
            },
            ScalarType::Boolean => match raw {
                Value::Bool(b) => Some(FieldValue::Boolean(*b)),
                Value::String(s) if s == "true" => Some(FieldValue::Boolean(true)),
                Value::String(s) if s == "false" => Some(FieldValue::Boolean(false)),
                _ => None,
            },
            ScalarType::Json => Some(FieldValue::Json(raw.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::String => "a string",
            ScalarType::Integer => "an integer",
            ScalarType::Float => "a number",
            ScalarType::Boolean => "a boolean",
            ScalarType::Json => "any JSON value",
        }
    }
}

/// The kind of a declared field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Absolute time, epoch milliseconds on the wire
    Timestamp,
    /// Identifier of an entity of the `target` kind
    Reference { target: String },
}

/// Declaration of a single named field of an entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub repeated: bool,
    pub required: bool,
    /// Set to the current time on every persist (timestamps only)
    pub auto_now: bool,
    /// Set to the current time on persist when unset (timestamps only)
    pub auto_now_add: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            repeated: false,
            required: false,
            auto_now: false,
            auto_now_add: false,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarType::String))
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarType::Integer))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarType::Float))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarType::Boolean))
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarType::Json))
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                target: target.into(),
            },
        )
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }
}

/// Convert epoch milliseconds to an absolute time
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub fn datetime_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Interpret an untrusted JSON value as epoch milliseconds.
///
/// Integers, finite floats (truncated) and their textual forms are accepted.
pub fn parse_millis(raw: &Value) -> Option<DateTime<Utc>> {
    let ms = match raw {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => float_millis(n.as_f64()?)?,
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => i,
                Err(_) => float_millis(s.parse::<f64>().ok()?)?,
            }
        }
        _ => return None,
    };
    millis_to_datetime(ms)
}

fn float_millis(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value_accessors() {
        let value = FieldValue::String("test".to_string());
        assert_eq!(value.as_string(), Some("test"));
        assert_eq!(value.as_integer(), None);
        assert!(!value.is_null());

        assert_eq!(FieldValue::Integer(42).as_integer(), Some(42));
        assert!(FieldValue::Null.is_null());
    }

    #[test]
    fn test_to_json_timestamp_is_millis() {
        let dt = millis_to_datetime(1_700_000_000_123).unwrap();
        assert_eq!(FieldValue::DateTime(dt).to_json(), json!(1_700_000_000_123i64));
    }

    #[test]
    fn test_to_json_reference_is_bare_id() {
        let value = FieldValue::Reference(EntityKey::new("user", "u1"));
        assert_eq!(value.to_json(), json!("u1"));
    }

    #[test]
    fn test_to_json_non_finite_float_is_null() {
        assert_eq!(FieldValue::Float(f64::NAN).to_json(), Value::Null);
    }

    #[test]
    fn test_parse_millis_accepts_numbers_and_numeric_strings() {
        let expected = millis_to_datetime(12345).unwrap();
        assert_eq!(parse_millis(&json!(12345)), Some(expected));
        assert_eq!(parse_millis(&json!("12345")), Some(expected));
        assert_eq!(parse_millis(&json!(12345.9)), Some(expected));
    }

    #[test]
    fn test_parse_millis_rejects_garbage() {
        assert_eq!(parse_millis(&json!("yesterday")), None);
        assert_eq!(parse_millis(&json!(true)), None);
        assert_eq!(parse_millis(&json!([1])), None);
        assert_eq!(parse_millis(&json!(1e300)), None);
        assert_eq!(parse_millis(&json!(i64::MAX)), None);
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(
            ScalarType::Integer.coerce(&json!("42")),
            Some(FieldValue::Integer(42))
        );
        assert_eq!(ScalarType::Integer.coerce(&json!(4.2)), None);
        assert_eq!(
            ScalarType::Float.coerce(&json!(3)),
            Some(FieldValue::Float(3.0))
        );
        assert_eq!(
            ScalarType::Boolean.coerce(&json!("true")),
            Some(FieldValue::Boolean(true))
        );
        assert_eq!(ScalarType::Boolean.coerce(&json!(1)), None);
        assert_eq!(ScalarType::String.coerce(&json!(1)), None);
        assert_eq!(ScalarType::String.coerce(&json!(null)), Some(FieldValue::Null));
        assert_eq!(
            ScalarType::Json.coerce(&json!({"a": 1})),
            Some(FieldValue::Json(json!({"a": 1})))
        );
    }

    #[test]
    fn test_descriptor_builders() {
        let field = FieldDescriptor::timestamp("created_at").auto_now_add();
        assert_eq!(field.kind, FieldKind::Timestamp);
        assert!(field.auto_now_add);
        assert!(!field.repeated);

        let tags = FieldDescriptor::reference("tags", "tag").repeated().required();
        assert!(tags.is_reference());
        assert!(tags.repeated);
        assert!(tags.required);
    }
}
