//! Opaque audit payload
//!
//! Raw source payloads and score breakdowns are persisted as JSON for audit
//! only. Downstream logic never reads fields out of a `Payload`; it is
//! written once and handed back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque string-keyed value bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Serialize for a TEXT column
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Deserialize from a TEXT column; non-object JSON is wrapped under `value`
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(Self::from(serde_json::from_str::<Value>(text)?))
    }

    /// Borrow as a JSON value for audit output
    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => Self::new().with("value", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_text_round_trip() {
        let payload = Payload::new().with("stars", 4.5).with("source", "zagat");
        let text = payload.to_json().unwrap();
        assert_eq!(Payload::from_json(&text).unwrap(), payload);
    }

    #[test]
    fn test_scalar_json_is_wrapped() {
        let payload = Payload::from_json("42").unwrap();
        assert_eq!(payload.as_value()["value"], 42);
    }
}
