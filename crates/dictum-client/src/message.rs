//! Wire messages
//!
//! Every frame carries exactly one JSON object with a mandatory string
//! `type` field used for dispatch. All other fields are payload.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single typed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Parse one inbound frame
    pub fn decode(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    _kind: String,
}

/// Serialize any value into a frame, requiring a string `type` field
pub(crate) fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Bytes> {
    let frame = serde_json::to_vec(message)?;
    serde_json::from_slice::<TypeTag>(&frame).map_err(|_| {
        Error::Serialization("message must be a JSON object with a string \"type\" field".into())
    })?;
    Ok(Bytes::from(frame))
}
