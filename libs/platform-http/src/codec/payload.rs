//! Structured request payloads.
//!
//! A [`Payload`] is a JSON-like tree that may also carry function values
//! ([`Payload::Code`]). How those are written depends on [`FunctionEncoding`].

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// JSON-like value with an extra variant for function-valued fields
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
    /// A function value, kept as its source text
    Code { source: String },
}

/// How [`Payload::Code`] values are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionEncoding {
    /// Drop from objects, write `null` in arrays and at the top level
    #[default]
    Omit,
    /// Write the source text as a JSON string
    Source,
}

impl Payload {
    /// Function value with the given source text
    pub fn code(source: impl Into<String>) -> Self {
        Self::Code {
            source: source.into(),
        }
    }

    /// Convert any serializable value into a payload
    ///
    /// # Errors
    /// Returns the `serde_json` error if `value` cannot be represented as JSON.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::from)
    }

    /// Encode to JSON bytes
    ///
    /// # Errors
    /// Fails only for values `serde_json` refuses, such as non-string map keys.
    pub fn to_json_vec(&self, functions: FunctionEncoding) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Encoded {
            payload: self,
            functions,
        })
    }

    /// Insert a field if this payload is an object; ignored otherwise
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        if let Self::Object(map) = &mut self {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Empty object
    #[must_use]
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Encoded {
            payload: self,
            functions: FunctionEncoding::Omit,
        }
        .serialize(serializer)
    }
}

struct Encoded<'a> {
    payload: &'a Payload,
    functions: FunctionEncoding,
}

impl Encoded<'_> {
    fn child<'b>(&self, payload: &'b Payload) -> Encoded<'b> {
        Encoded {
            payload,
            functions: self.functions,
        }
    }

    fn omitted(&self, payload: &Payload) -> bool {
        matches!(payload, Payload::Code { .. }) && self.functions == FunctionEncoding::Omit
    }
}

impl Serialize for Encoded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.payload {
            Payload::Null => serializer.serialize_unit(),
            Payload::Bool(b) => serializer.serialize_bool(*b),
            Payload::Number(n) => n.serialize(serializer),
            Payload::String(s) => serializer.serialize_str(s),
            Payload::Code { source } => match self.functions {
                FunctionEncoding::Omit => serializer.serialize_unit(),
                FunctionEncoding::Source => serializer.serialize_str(source),
            },
            Payload::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Payload::Object(fields) => {
                let kept = fields.values().filter(|v| !self.omitted(v)).count();
                let mut map = serializer.serialize_map(Some(kept))?;
                for (key, value) in fields {
                    if self.omitted(value) {
                        continue;
                    }
                    map.serialize_entry(key, &self.child(value))?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Payload {
        Payload::from(json!({
            "name": "crawler",
            "count": 3,
            "nested": { "flag": true, "tags": ["a", "b"] }
        }))
        .with_field("pageFunction", Payload::code("async function pageFunction(ctx) { return 1; }"))
    }

    #[test]
    fn test_default_encoding_drops_functions_in_objects() {
        let bytes = sample().to_json_vec(FunctionEncoding::Omit).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(value.get("pageFunction").is_none());
        assert_eq!(value["name"], "crawler");
        assert_eq!(value["nested"]["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_default_encoding_nulls_functions_in_arrays() {
        let payload = Payload::Array(vec![Payload::from(1_i64), Payload::code("() => 2")]);
        let bytes = payload.to_json_vec(FunctionEncoding::Omit).unwrap();
        assert_eq!(bytes, b"[1,null]");
    }

    #[test]
    fn test_source_encoding_keeps_other_fields_equal() {
        let payload = sample();
        let plain: Value =
            serde_json::from_slice(&payload.to_json_vec(FunctionEncoding::Omit).unwrap()).unwrap();
        let with_source: Value =
            serde_json::from_slice(&payload.to_json_vec(FunctionEncoding::Source).unwrap())
                .unwrap();

        for (key, value) in plain.as_object().unwrap() {
            assert_eq!(&with_source[key], value, "field {key} changed");
        }
        assert_eq!(
            with_source["pageFunction"],
            "async function pageFunction(ctx) { return 1; }"
        );
    }

    #[test]
    fn test_serialize_impl_uses_default_encoding() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("pageFunction").is_none());
    }

    #[test]
    fn test_from_serializable() {
        #[derive(serde::Serialize)]
        struct Input {
            url: &'static str,
        }
        let payload = Payload::from_serializable(&Input {
            url: "https://example.com",
        })
        .unwrap();
        assert_eq!(payload, Payload::from(json!({ "url": "https://example.com" })));
    }
}
