//! Topic name ↔ wire topic id codec.
//!
//! Local topic names are free-form UTF-8 and routinely contain `/`
//! (`orders/created`); cloud resource ids must fit in a single URL path
//! segment. The mapping percent-encodes every byte outside the RFC 3986
//! unreserved set, so each name has exactly one id and the id always
//! decodes back to the same name.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Bytes that must be percent-encoded in a wire topic id: everything except
/// alphanumerics and the RFC 3986 unreserved `-`, `_`, `.`, `~`.
/// Non-ASCII bytes are always encoded.
const TOPIC_ID_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a topic name as a wire topic id.
///
/// Deterministic and injective: distinct names never collide, and
/// [`decode_topic_id`] restores the original name exactly.
///
/// # Examples
///
/// ```
/// use causeway_proto::encode_topic_id;
///
/// assert_eq!(encode_topic_id("orders/created"), "orders%2Fcreated");
/// assert_eq!(encode_topic_id("orders-v2"), "orders-v2");
/// ```
#[must_use]
pub fn encode_topic_id(name: &str) -> String {
    utf8_percent_encode(name, TOPIC_ID_ESCAPE).to_string()
}

/// Decode a wire topic id back to the topic name.
///
/// # Errors
///
/// Returns an error for a `%` not followed by two hex digits, or if the
/// unescaped bytes are not valid UTF-8.
///
/// # Examples
///
/// ```
/// use causeway_proto::decode_topic_id;
///
/// assert_eq!(decode_topic_id("orders%2Fcreated").unwrap(), "orders/created");
/// assert!(decode_topic_id("orders%2").is_err());
/// ```
pub fn decode_topic_id(id: &str) -> Result<String, TopicIdError> {
    // percent_decode_str passes malformed escapes through untouched, so
    // reject them up front.
    let bytes = id.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%'
            && !(bytes.len() >= i + 3
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit())
        {
            return Err(TopicIdError::InvalidEscape(id.to_string()));
        }
    }

    percent_decode_str(id)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| TopicIdError::Utf8Decode(e.to_string()))
}

/// Errors that can occur while decoding a wire topic id.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TopicIdError {
    /// A `%` escape without two hex digits
    #[error("invalid percent escape in topic id: {0}")]
    InvalidEscape(String),
    /// UTF-8 decoding failed
    #[error("UTF-8 decode error: {0}")]
    Utf8Decode(String),
}
