//! Media event codec
//!
//! Every message exchanged with the engine is a JSON object
//! `{"type": <string>, "data": <object>}`. Negotiation related events are
//! wrapped once more in a `custom` envelope whose `data` is itself an
//! envelope.
//!
//! Decoding is total: a payload that is not valid JSON, has an unknown type or
//! malformed data yields a [`DecodeError`] instead of a panic.

pub mod incoming;
pub mod outgoing;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

pub use incoming::ReceivableEvent;
pub use outgoing::SendableEvent;

/// Type tag of the wrapper envelope.
pub const CUSTOM: &str = "custom";

/// A decoded but not yet interpreted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(kind: &str, data: Option<Value>) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }

    /// Wrap `inner` into a `custom` envelope.
    pub fn custom(inner: Envelope) -> Self {
        Self {
            kind: CUSTOM.to_string(),
            data: Some(inner.into_value()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Interpret `data` as `T`, failing when it is missing.
    pub fn data<T: DeserializeOwned>(self) -> Result<T, DecodeError> {
        match self.data {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => Err(DecodeError::MissingData(self.kind)),
        }
    }

    pub fn into_value(self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("type".to_string(), Value::String(self.kind));
        if let Some(data) = self.data {
            object.insert("data".to_string(), data);
        }
        Value::Object(object)
    }

    pub fn to_json(&self) -> String {
        // An envelope only holds strings and JSON values, serializing cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
