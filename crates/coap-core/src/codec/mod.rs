//! Pure encode/decode, no I/O, behind the
//! `DataSerializer`/`DataParser` traits. One variant per transport: [`udp`] for
//! RFC 7252 datagram framing, [`tcp`] for RFC 8323 stream framing.
mod options_codec;
pub mod tcp;
pub mod udp;

use thiserror::Error;

use crate::message::Message;

/// Decode/encode failure below the message layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated: need at least {needed} byte(s), have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unsupported CoAP version {0}")]
    UnsupportedVersion(u8),
    #[error("token length {0} exceeds the 8-byte limit")]
    TokenTooLong(u8),
    #[error("reserved option delta/length nibble value 15 used outside the payload marker")]
    ReservedOptionNibble,
    #[error("payload marker (0xFF) present with no payload bytes following")]
    EmptyPayloadAfterMarker,
    #[error("frame length {0} exceeds the configured maximum message size")]
    MessageTooLarge(usize),
}

/// Serializes [`Message`] into the wire bytes for one transport variant.
pub trait DataSerializer: Send + Sync {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, CodecError>;
}

/// Parses wire bytes into a [`Message`] for one transport variant. A
/// successful parse does not imply the message is semantically valid (e.g.
/// code class) — only that framing/options decoded cleanly.
pub trait DataParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}
