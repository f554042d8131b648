//! Crate-wide error taxonomy.
//!
//! Every failure mode surfaces through one enum so reliability/matcher
//! code can branch on [`ErrorCategory`] instead of matching variants by
//! hand everywhere a decision ("retry? log and drop? propagate to the
//! deliverer?") has to be made: a `thiserror` enum with per-variant context
//! fields and a stable mapping into a coarser category.
use std::net::SocketAddr;

use thiserror::Error;

use crate::message::{Mid, Token};

/// Coarse disposition for a [`CoapError`], used by callers that need to
/// decide policy (retry, drop, surface to the application) without matching
/// on every variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The operation can be retried as-is (e.g. after a reliability timeout
    /// the exchange itself is done, but the *caller* may reissue).
    Retryable,
    /// Retrying with the same inputs will not help (programming error,
    /// malformed message, rejected duplicate token).
    NonRetryable,
    /// A CoAP-level protocol violation that has a defined wire response
    /// (RST, 4.13, 4.08) rather than a local failure.
    Protocol,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum CoapError {
    /// §7.1 — programming errors: null destination, double start, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Endpoint lifecycle misuse, e.g. replacing the executor while started.
    #[error("invalid endpoint state: {0}")]
    InvalidState(String),

    /// §7.2 — transport I/O failure surfaced from `Connector::start`.
    #[error("transport I/O failure during {context}: {source}")]
    TransportIo {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// §7.3 — malformed inbound message that carried a recoverable MID on a
    /// CON; the caller should emit an RST rather than propagate further.
    #[error("malformed CON from {peer} (mid={mid:?}): {detail}")]
    MalformedConfirmable {
        peer: SocketAddr,
        mid: Mid,
        detail: String,
    },

    /// §7.4 — a response arrived for a token with no live exchange.
    #[error("unmatched response for token {token:?} from {peer}")]
    UnmatchedResponse { token: Token, peer: SocketAddr },

    /// §7.5 — CON exhausted MAX_RETRANSMIT without an ACK/RST.
    #[error("exchange {mid:?} timed out after {attempts} attempt(s)")]
    Timeout { mid: Mid, attempts: u8 },

    /// §7.6 — blockwise size overflow (maps to 4.13 on the wire).
    #[error("resource body exceeds max_resource_body_size ({size} > {limit})")]
    RequestEntityTooLarge { size: usize, limit: usize },

    /// §7.6 — inconsistent block sequence (maps to 4.08 on the wire).
    #[error("inconsistent block sequence for token {token:?}: {detail}")]
    RequestEntityIncomplete { token: Token, detail: String },

    /// §7.7 — response arrived over a different correlation context than
    /// the one the request was sent under; treated as unmatched.
    #[error("response for token {token:?} arrived under a different correlation context")]
    CrossContextResponse { token: Token },

    /// Matcher rejected a caller-supplied token already in use by another
    /// live exchange (§4.3 "Lifetime / eviction").
    #[error("token {token:?} is already in use by another outstanding exchange")]
    DuplicateToken { token: Token },

    /// Wire decode failure below the message layer (codec boundary).
    #[error("codec error: {0}")]
    Codec(#[from] crate::codec::CodecError),
}

impl CoapError {
    /// Stable classification used by reliability/matcher decision points.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoapError::InvalidArgument(_)
            | CoapError::InvalidState(_)
            | CoapError::DuplicateToken { .. } => ErrorCategory::NonRetryable,
            CoapError::TransportIo { .. } => ErrorCategory::NonRetryable,
            CoapError::Timeout { .. } => ErrorCategory::Retryable,
            CoapError::MalformedConfirmable { .. }
            | CoapError::UnmatchedResponse { .. }
            | CoapError::RequestEntityTooLarge { .. }
            | CoapError::RequestEntityIncomplete { .. }
            | CoapError::CrossContextResponse { .. } => ErrorCategory::Protocol,
            CoapError::Codec(_) => ErrorCategory::Protocol,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoapError>;
