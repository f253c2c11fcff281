//! Payload codecs.
//!
//! The server stores message text and file chunks as ASCII-safe strings.
//! A [`PayloadCodec`] converts between raw bytes and that form. It is an
//! encoding, not encryption: anything on the wire is readable by the server.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::ProtocolError;

/// Converts raw payload bytes to and from their wire string.
///
/// Object safe so a chatroom can hold a `Box<dyn PayloadCodec>` chosen at
/// runtime.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Encodes raw bytes.
    fn encode(&self, bytes: &[u8]) -> String;

    /// Decodes an encoded string.
    ///
    /// # Errors
    /// [`ProtocolError::CorruptPayload`] if `encoded` is not valid for this
    /// codec. No partial output is returned.
    fn decode(&self, encoded: &str) -> Result<Vec<u8>, ProtocolError>;

    fn encode_text(&self, text: &str) -> String {
        self.encode(text.as_bytes())
    }

    /// Decodes an encoded string into UTF-8 text.
    fn decode_text(&self, encoded: &str) -> Result<String, ProtocolError> {
        String::from_utf8(self.decode(encoded)?)
            .map_err(|e| ProtocolError::CorruptPayload(format!("payload is not UTF-8: {e}")))
    }

    /// Largest raw chunk whose encoding fits in `encoded_cap` bytes.
    ///
    /// The default assumes base64 expansion (4 output bytes per 3 input
    /// bytes) and leaves one byte of slack. Never returns zero.
    fn raw_chunk_size(&self, encoded_cap: usize) -> usize {
        (encoded_cap.saturating_mul(3) / 4).saturating_sub(1).max(1)
    }
}

/// Standard base64 with padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Base64Codec;

impl PayloadCodec for Base64Codec {
    fn encode(&self, bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn decode(&self, encoded: &str) -> Result<Vec<u8>, ProtocolError> {
        STANDARD
            .decode(encoded)
            .map_err(|e| ProtocolError::CorruptPayload(e.to_string()))
    }
}
