//! # Causeway Protocol
//!
//! Wire contract shared by both sides of the relay.
//!
//! ## Envelope
//!
//! Every relayed payload travels inside a JSON envelope that records which
//! bus it entered the system from (`"local"` or `"cloud"`). The relay pumps
//! read the tag to drop messages that would otherwise echo back to the bus
//! they came from.
//!
//! ## Topic ids
//!
//! Local topic names are free-form and routinely contain `/`; cloud
//! resource ids are not allowed to. [`topics`] maps names to
//! percent-encoded wire ids and back, losslessly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod topics;

pub use envelope::{Envelope, EnvelopeError, Origin};
pub use topics::{decode_topic_id, encode_topic_id, TopicIdError};
