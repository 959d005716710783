//! Wire format for published payloads.
//!
//! Messages travel as UTF-8 bytes. Structured payloads are JSON-encoded;
//! plain strings are sent as-is. The subscriber side attempts a JSON parse
//! and falls back to the raw string, so a bare-string publish round-trips
//! unchanged. Only a payload that is not valid UTF-8 is a decode error.

use bytes::Bytes;
use thiserror::Error;

/// A payload as seen by publishers and subscriber callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
	/// A structured value, JSON-encoded on the wire.
	Json(serde_json::Value),
	/// A plain string, sent as raw UTF-8 bytes.
	Text(String),
}

impl Payload {
	/// The contained string, for `Text` payloads and JSON strings.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			| Payload::Text(s) => Some(s),
			| Payload::Json(serde_json::Value::String(s)) => Some(s),
			| Payload::Json(_) => None,
		}
	}
}

impl From<&str> for Payload {
	fn from(s: &str) -> Self {
		Payload::Text(s.to_owned())
	}
}

impl From<String> for Payload {
	fn from(s: String) -> Self {
		Payload::Text(s)
	}
}

impl From<serde_json::Value> for Payload {
	fn from(value: serde_json::Value) -> Self {
		Payload::Json(value)
	}
}

/// A delivered message that could not be decoded.
///
/// Reported to the owning subscriber's callback; a decode failure is a data
/// problem, not a transport problem, and never affects other subscribers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayloadDecodeError {
	/// The message body is not valid UTF-8.
	#[error("payload is not valid UTF-8: {0}")]
	InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Encodes a payload into its wire bytes.
pub fn encode_payload(payload: &Payload) -> Result<Bytes, serde_json::Error> {
	match payload {
		| Payload::Json(value) => {
			serde_json::to_vec(value).map(Bytes::from)
		}
		| Payload::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
	}
}

/// Decodes wire bytes into a payload.
///
/// JSON parse failure is not an error: the original was a bare string and
/// is returned verbatim.
pub fn decode_payload(bytes: &[u8]) -> Result<Payload, PayloadDecodeError> {
	let text = std::str::from_utf8(bytes)?;
	match serde_json::from_str(text) {
		| Ok(value) => Ok(Payload::Json(value)),
		| Err(_) => Ok(Payload::Text(text.to_owned())),
	}
}
