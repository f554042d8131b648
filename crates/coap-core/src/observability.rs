//! Protocol-stage logging helpers.
//!
//! A `Logger`/`MetricsProvider` facade behind a trait object would buy
//! `no_std + alloc` portability this crate doesn't need (see DESIGN.md, Open
//! Question 3), so call sites use `tracing`'s macros directly. This module
//! only centralizes the span naming convention so every Exchange-scoped log
//! line carries the same fields.
use tracing::Span;

use crate::message::{Mid, Token};

/// Create the span an [`crate::exchange::Exchange`] is created under, so
/// every subsequent log line for that correlation carries `mid`/`token`/
/// `peer` fields without the caller repeating them.
pub fn exchange_span(mid: Option<Mid>, token: &Token, peer: std::net::SocketAddr) -> Span {
    tracing::info_span!(
        "coap_exchange",
        mid = tracing::field::debug(mid),
        token = tracing::field::debug(token),
        peer = tracing::field::display(peer),
    )
}
