//! Versioned payload codec.
//!
//! Queue payloads are stored as a UTF-8 JSON envelope that names the payload
//! format and its version next to the message itself:
//!
//! ```json
//! {"format":"mail-queue/message","version":1,"message":{...}}
//! ```
//!
//! Decoding never panics. Every way a stored blob can be unusable (truncated
//! data, an unknown embedded format, a newer version, invalid UTF-8, a message
//! that fails validation) maps to a [`DecodeError`] variant so a round can count
//! the failure and move on to the next item.

use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use thiserror::Error;

use crate::mail::{MailMessage, MessageError};

/// Format identifier written into every envelope
pub const PAYLOAD_FORMAT: &str = "mail-queue/message";

/// Envelope version produced by [`MessageCodec::encode`]
pub const CURRENT_VERSION: u32 = 1;

/// Errors raised while turning a message into a blob or back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload is empty")]
    Empty,

    #[error("Payload is not valid UTF-8: {0}")]
    InvalidEncoding(String),

    #[error("Payload is truncated: {0}")]
    Truncated(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Payload does not match the message schema: {0}")]
    Schema(String),

    #[error("Unknown payload format \"{0}\"")]
    UnknownFormat(String),

    #[error("Unsupported payload version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] MessageError),
}

impl DecodeError {
    fn from_json(error: serde_json::Error) -> Self {
        match error.classify() {
            Category::Eof => DecodeError::Truncated(error.to_string()),
            Category::Syntax | Category::Io => DecodeError::Malformed(error.to_string()),
            Category::Data => DecodeError::Schema(error.to_string()),
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    message: &'a MailMessage,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    format: String,
    version: u32,
    message: serde_json::Value,
}

/// Converts [`MailMessage`] values to and from stored payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode a message into a deterministic payload.
    ///
    /// The message is validated first so nothing undeliverable is ever queued.
    pub fn encode(&self, message: &MailMessage) -> Result<Vec<u8>, DecodeError> {
        message.validate()?;

        let envelope = EnvelopeRef {
            format: PAYLOAD_FORMAT,
            version: CURRENT_VERSION,
            message,
        };

        serde_json::to_vec(&envelope).map_err(DecodeError::from_json)
    }

    /// Decode a stored payload back into a validated message.
    pub fn decode(&self, blob: &[u8]) -> Result<MailMessage, DecodeError> {
        if blob.is_empty() {
            return Err(DecodeError::Empty);
        }

        let text =
            std::str::from_utf8(blob).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::from_json)?;

        if envelope.format != PAYLOAD_FORMAT {
            return Err(DecodeError::UnknownFormat(envelope.format));
        }

        let message: MailMessage = match envelope.version {
            1 => serde_json::from_value(envelope.message).map_err(DecodeError::from_json)?,
            other => return Err(DecodeError::UnsupportedVersion(other)),
        };

        message.validate()?;
        Ok(message)
    }
}
