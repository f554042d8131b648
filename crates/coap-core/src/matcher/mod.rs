//! Request/response correlation. A tagged enum rather than
//! a trait object since exactly two variants
//! exist and the choice is fixed for the endpoint's lifetime at
//! construction from the connector's scheme.
pub mod tcp;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{CoapError, Result};
use crate::exchange::store::ExchangeStore;
use crate::message::{EmptyMessage, Request, Response, Token};
use crate::exchange::Exchange;

pub use tcp::TcpMatcher;
pub use udp::UdpMatcher;

/// Outcome of matching an inbound request: either a fresh exchange or one
/// that already exists for this MID, in which case the stack must re-emit
/// the cached response rather than calling the deliverer again.
pub struct RequestMatch {
    pub exchange: Arc<Exchange>,
    pub duplicate: bool,
}

/// The two wire-protocol variants of the matcher, selected once from the
/// connector's scheme.
pub enum Matcher {
    Udp(UdpMatcher),
    Tcp(TcpMatcher),
}

impl Matcher {
    pub fn udp(store: Arc<ExchangeStore>, token_size_limit: usize) -> Self {
        Self::Udp(UdpMatcher::new(store, token_size_limit))
    }

    pub fn tcp(store: Arc<ExchangeStore>, token_size_limit: usize) -> Self {
        Self::Tcp(TcpMatcher::new(store, token_size_limit))
    }

    pub fn send_request(&self, exchange: &Arc<Exchange>, request: &mut Request) -> Result<()> {
        match self {
            Self::Udp(m) => m.send_request(exchange, request),
            Self::Tcp(m) => m.send_request(exchange, request),
        }
    }

    /// Creates the bare, not-yet-registered exchange a send-side call needs
    /// before it traverses the stack (exchange identity exists
    /// before the Outbox registers it with the matcher).
    pub fn create_local_exchange(&self, destination: SocketAddr) -> Arc<Exchange> {
        match self {
            Self::Udp(m) => m.store.create(crate::exchange::Origin::Local, destination),
            Self::Tcp(m) => m.store.create(crate::exchange::Origin::Local, destination),
        }
    }

    pub fn send_response(&self, exchange: &Arc<Exchange>, response: &Response) -> Result<()> {
        match self {
            Self::Udp(m) => m.send_response(exchange, response),
            Self::Tcp(m) => m.send_response(exchange, response),
        }
    }

    pub fn send_empty(&self, exchange: &Arc<Exchange>, message: &EmptyMessage) -> Result<()> {
        match self {
            Self::Udp(m) => m.send_empty(exchange, message),
            Self::Tcp(m) => m.send_empty(exchange, message),
        }
    }

    pub fn receive_request(&self, request: &Request, peer: SocketAddr) -> RequestMatch {
        match self {
            Self::Udp(m) => m.receive_request(request, peer),
            Self::Tcp(m) => m.receive_request(request, peer),
        }
    }

    pub fn receive_response(&self, response: &Response, peer: SocketAddr, context: Option<&[u8]>) -> Option<Arc<Exchange>> {
        match self {
            Self::Udp(m) => m.receive_response(response, peer, context),
            Self::Tcp(m) => m.receive_response(response, peer, context),
        }
    }

    pub fn receive_empty(&self, message: &EmptyMessage, peer: SocketAddr) -> Option<Arc<Exchange>> {
        match self {
            Self::Udp(m) => m.receive_empty(message, peer),
            Self::Tcp(_) => None,
        }
    }

    pub fn cancel_observation(&self, token: &Token, peer: SocketAddr) {
        let store = match self {
            Self::Udp(m) => &m.store,
            Self::Tcp(m) => &m.store,
        };
        if let Some(exchange) = store.lookup_token(token, peer) {
            exchange.clear_observe_relation();
            exchange.cancel();
            store.remove_exchange(&exchange);
        }
    }
}

/// Shared by both matcher variants: allocate a token the caller did not
/// supply. Length grows with the process-local generator's entropy rather
/// than being fixed, mirroring the common real-world choice of a short
/// token unless collisions force growth (kept simple here: fixed 4 bytes).
pub(crate) fn generate_token(limit: usize) -> Token {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let len = limit.min(8).max(1);
    let mut bytes = Vec::with_capacity(len);
    while bytes.len() < len {
        let hash = RandomState::new().build_hasher().finish();
        bytes.extend_from_slice(&hash.to_ne_bytes());
    }
    bytes.truncate(len);
    Token(bytes)
}

pub(crate) fn reject_if_collision<T>(result: std::result::Result<T, crate::exchange::store::KeyCollision>, token: &Token) -> Result<T> {
    result.map_err(|_| CoapError::DuplicateToken { token: token.clone() })
}
