//! Property-bag values and their wire codec.
//!
//! Property bags are order-preserving string-keyed mappings of tagged
//! values: scalars, sequences, nested mappings, resource references, the
//! "unknown" placeholder, and the "secret" wrapper. On the wire, scalars
//! map directly to JSON; the three markers serialize as sig-key objects.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::core::error::RuntimeError;
use crate::core::output::Output;

/// Order-preserving property bag, as sent to and received from the engine.
pub type PropertyBag = IndexMap<String, PropertyValue>;

/// Inputs handed to the gateway: each property is itself deferred.
pub type InputBag = IndexMap<String, Output<PropertyValue>>;

/// Reserved key marking an object as a wire sentinel rather than data.
pub const SIG_KEY: &str = "$sig";

const SIG_UNKNOWN: &str = "unknown";
const SIG_SECRET: &str = "secret";
const SIG_RESOURCE: &str = "resource";

/// A reference to a resource embedded in a property bag: enough to
/// rehydrate a live typed shape through the registration dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub token: String,
    pub urn: String,
}

/// A single tagged property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(PropertyBag),
    /// Sensitive value; stripped into the output's secret flag on receipt.
    Secret(Box<PropertyValue>),
    /// A resource embedded by reference.
    ResourceRef(ResourceRef),
    /// Not yet determined, e.g. during a preview.
    Unknown,
}

impl PropertyValue {
    /// Encode to the JSON wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(Value::Null, Value::Number),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_wire).collect()),
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_wire()))
                    .collect(),
            ),
            Self::Secret(inner) => json!({ SIG_KEY: SIG_SECRET, "value": inner.to_wire() }),
            Self::ResourceRef(reference) => json!({
                SIG_KEY: SIG_RESOURCE,
                "token": reference.token,
                "urn": reference.urn,
            }),
            Self::Unknown => json!({ SIG_KEY: SIG_UNKNOWN }),
        }
    }

    /// Decode from the JSON wire form. Malformed sentinel objects are
    /// decode errors, never silently degraded data.
    pub fn from_wire(value: &Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number).ok_or_else(|| {
                RuntimeError::Decode(format!("number out of range: {n}"))
            }),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_wire)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            Value::Object(map) => match map.get(SIG_KEY) {
                None => map
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Self::from_wire(value)?)))
                    .collect::<Result<PropertyBag, RuntimeError>>()
                    .map(Self::Object),
                Some(Value::String(sig)) if sig == SIG_UNKNOWN => Ok(Self::Unknown),
                Some(Value::String(sig)) if sig == SIG_SECRET => {
                    let inner = map.get("value").ok_or_else(|| {
                        RuntimeError::Decode("secret sentinel missing 'value'".to_string())
                    })?;
                    Ok(Self::Secret(Box::new(Self::from_wire(inner)?)))
                }
                Some(Value::String(sig)) if sig == SIG_RESOURCE => {
                    let token = map.get("token").and_then(Value::as_str).ok_or_else(|| {
                        RuntimeError::Decode("resource sentinel missing 'token'".to_string())
                    })?;
                    let urn = map.get("urn").and_then(Value::as_str).ok_or_else(|| {
                        RuntimeError::Decode("resource sentinel missing 'urn'".to_string())
                    })?;
                    Ok(Self::ResourceRef(ResourceRef {
                        token: token.to_string(),
                        urn: urn.to_string(),
                    }))
                }
                Some(other) => Err(RuntimeError::Decode(format!(
                    "unrecognized wire sentinel: {other}"
                ))),
            },
        }
    }

    /// Wrap in the secret marker unless already wrapped.
    pub fn make_secret(self) -> Self {
        match self {
            Self::Secret(_) => self,
            other => Self::Secret(Box::new(other)),
        }
    }

    /// Strip secret wrappers, reporting whether any were present.
    pub fn reveal(self) -> (Self, bool) {
        let mut value = self;
        let mut was_secret = false;
        while let Self::Secret(inner) = value {
            was_secret = true;
            value = *inner;
        }
        (value, was_secret)
    }

    /// True if this value or anything nested in it is unknown.
    pub fn contains_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::Secret(inner) => inner.contains_unknown(),
            Self::Array(items) => items.iter().any(Self::contains_unknown),
            Self::Object(entries) => entries.values().any(Self::contains_unknown),
            _ => false,
        }
    }

    /// True if this value or anything nested in it is marked secret.
    pub fn contains_secret(&self) -> bool {
        match self {
            Self::Secret(_) => true,
            Self::Array(items) => items.iter().any(Self::contains_secret),
            Self::Object(entries) => entries.values().any(Self::contains_secret),
            _ => false,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        Self::Array(items)
    }
}

impl From<PropertyBag> for PropertyValue {
    fn from(entries: PropertyBag) -> Self {
        Self::Object(entries)
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_scalar_roundtrip() {
        for value in [
            PropertyValue::Null,
            PropertyValue::Bool(true),
            PropertyValue::Number(8080.0),
            PropertyValue::from("vpc-1"),
        ] {
            let wire = value.to_wire();
            assert_eq!(PropertyValue::from_wire(&wire).unwrap(), value);
        }
    }

    #[test]
    fn test_property_secret_roundtrip() {
        let value = PropertyValue::from("s3cret").make_secret();
        let wire = value.to_wire();
        assert_eq!(wire[SIG_KEY], "secret");
        assert_eq!(PropertyValue::from_wire(&wire).unwrap(), value);
    }

    #[test]
    fn test_property_unknown_roundtrip() {
        let wire = PropertyValue::Unknown.to_wire();
        assert_eq!(wire[SIG_KEY], "unknown");
        assert_eq!(
            PropertyValue::from_wire(&wire).unwrap(),
            PropertyValue::Unknown
        );
    }

    #[test]
    fn test_property_resource_ref_roundtrip() {
        let value = PropertyValue::ResourceRef(ResourceRef {
            token: "pkg::Foo".to_string(),
            urn: "urn:trama:dev::app::pkg:Foo::f".to_string(),
        });
        let wire = value.to_wire();
        assert_eq!(PropertyValue::from_wire(&wire).unwrap(), value);
    }

    #[test]
    fn test_property_nested_bag_preserves_order() {
        let mut bag = PropertyBag::new();
        bag.insert("zebra".to_string(), PropertyValue::from(1i64));
        bag.insert("apple".to_string(), PropertyValue::from(2i64));
        let value = PropertyValue::Object(bag);
        let decoded = PropertyValue::from_wire(&value.to_wire()).unwrap();
        let PropertyValue::Object(entries) = decoded else {
            panic!("expected object");
        };
        let keys: Vec<_> = entries.keys().collect();
        assert_eq!(keys, vec!["zebra", "apple"]);
    }

    #[test]
    fn test_property_malformed_sentinel_is_error() {
        let wire = json!({ SIG_KEY: "secret" });
        let err = PropertyValue::from_wire(&wire).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode(_)));

        let wire = json!({ SIG_KEY: "no-such-sentinel" });
        assert!(PropertyValue::from_wire(&wire).is_err());
    }

    #[test]
    fn test_property_reveal_strips_nested_wrappers() {
        let value = PropertyValue::Secret(Box::new(PropertyValue::from("key").make_secret()));
        let (plain, was_secret) = value.reveal();
        assert_eq!(plain, PropertyValue::from("key"));
        assert!(was_secret);

        let (plain, was_secret) = PropertyValue::from("open").reveal();
        assert_eq!(plain, PropertyValue::from("open"));
        assert!(!was_secret);
    }

    #[test]
    fn test_property_contains_unknown_recurses() {
        let mut inner = PropertyBag::new();
        inner.insert("id".to_string(), PropertyValue::Unknown);
        let value = PropertyValue::Array(vec![PropertyValue::Object(inner)]);
        assert!(value.contains_unknown());
        assert!(!PropertyValue::from("known").contains_unknown());
    }

    #[test]
    fn test_property_contains_secret_recurses() {
        let value = PropertyValue::Array(vec![PropertyValue::from("k").make_secret()]);
        assert!(value.contains_secret());
        assert!(!PropertyValue::from("open").contains_secret());
    }

    #[test]
    fn test_property_serde_through_json_string() {
        let value = PropertyValue::from("conn").make_secret();
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: PropertyValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
