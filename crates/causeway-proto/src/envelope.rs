//! Provenance envelope wrapped around every relayed payload.
//!
//! The wire form is a two-field JSON object and is a compatibility surface:
//! both buses carry it, and any peer implementation must produce the exact
//! same bytes for the same payload.
//!
//! ```json
//! {"data": "aGVsbG8=", "__from__": "local"}
//! ```
//!
//! `data` holds the payload in standard (padded) base64; `__from__` names
//! the bus the payload entered the system from. A byte string that does not
//! parse to this shape is *untagged*: its origin is unknown, and the pumps
//! treat it as a plain payload published by an envelope-unaware client.

use serde::{Deserialize, Serialize};

/// The bus a message entered the system from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// First published on the local bus.
    Local,
    /// First published on the cloud bus.
    Cloud,
}

/// A relayed payload tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The original message bytes, exactly as first published.
    #[serde(rename = "data", with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// The bus the payload entered the system from.
    #[serde(rename = "__from__")]
    pub origin: Origin,
}

impl Envelope {
    /// Wrap a payload entering from `origin`'s bus.
    #[must_use]
    pub fn new(payload: Vec<u8>, origin: Origin) -> Self {
        Self { payload, origin }
    }

    /// Wrap a payload that entered from the local bus.
    #[must_use]
    pub fn from_local(payload: Vec<u8>) -> Self {
        Self::new(payload, Origin::Local)
    }

    /// Wrap a payload that entered from the cloud bus.
    #[must_use]
    pub fn from_cloud(payload: Vec<u8>) -> Self {
        Self::new(payload, Origin::Cloud)
    }

    /// Serialize to the wire form.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialize(e.to_string()))
    }

    /// Deserialize from the wire form.
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is not a well-formed envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Deserialize(e.to_string()))
    }

    /// Probe the origin tag of a raw byte string.
    ///
    /// Returns `None` for anything that is not a well-formed envelope,
    /// including an unknown `__from__` value. Unwrapped publishers are
    /// normal on the local bus, so this never errors; it only declines to
    /// answer.
    #[must_use]
    pub fn origin_of(bytes: &[u8]) -> Option<Origin> {
        Self::from_bytes(bytes).ok().map(|e| e.origin)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Errors for envelope serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
    /// Serialization failed
    #[error("envelope encode failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("envelope decode failed: {0}")]
    Deserialize(String),
}
