//! UDP matcher variant. Owns MID assignment, dedup, and
//! RST-on-unmatched semantics; none of which apply to the TCP variant.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::exchange::store::ExchangeStore;
use crate::exchange::{Exchange, Origin};
use crate::message::{EmptyMessage, MessageType, Request, Response, Token};

use super::{generate_token, reject_if_collision, RequestMatch};

pub struct UdpMatcher {
    pub(super) store: Arc<ExchangeStore>,
    token_size_limit: usize,
    next_mid: AtomicU16,
}

impl UdpMatcher {
    pub fn new(store: Arc<ExchangeStore>, token_size_limit: usize) -> Self {
        Self {
            store,
            token_size_limit,
            next_mid: AtomicU16::new(0),
        }
    }

    fn next_mid(&self) -> crate::message::Mid {
        crate::message::Mid(self.next_mid.fetch_add(1, Ordering::Relaxed))
    }

    /// Assigns a MID if unset, allocates a token if the caller did not
    /// supply one, registers `KeyToken` always and `KeyMID` for CON. The
    /// exchange itself was already created by the caller before the request
    /// traversed the stack.
    pub fn send_request(&self, exchange: &Arc<Exchange>, request: &mut Request) -> Result<()> {
        let peer = request
            .destination
            .expect("Outbox asserts destination is set before the matcher runs");

        if request.message.token.is_empty() {
            request.message.token = generate_token(self.token_size_limit);
        }
        request.message.mid = self.next_mid();
        exchange.set_request(request.clone());

        reject_if_collision(
            self.store.register_token(request.message.token.clone(), peer, exchange),
            &request.message.token,
        )?;
        if request.is_confirmable() {
            reject_if_collision(
                self.store.register_mid(request.message.mid, peer, exchange),
                &request.message.token,
            )?;
        }

        Ok(())
    }

    /// Records the (MID, peer) → response association so a duplicate
    /// inbound CON yields a re-send rather than a second deliver call.
    pub fn send_response(&self, exchange: &Arc<Exchange>, response: &Response) -> Result<()> {
        exchange.set_response(response.clone());
        if matches!(response.message.mtype, MessageType::Acknowledgement | MessageType::Reset) {
            self.store
                .register_mid(response.message.mid, exchange.remote_addr, exchange)
                .ok();
        }
        Ok(())
    }

    pub fn send_empty(&self, exchange: &Arc<Exchange>, message: &EmptyMessage) -> Result<()> {
        self.store
            .register_mid(message.mid(), exchange.remote_addr, exchange)
            .ok();
        Ok(())
    }

    /// Looks up by `KeyMID`; an existing exchange means this is a duplicate
    /// CON/NON and the stack should re-emit the cached response rather than
    /// deliver again.
    pub fn receive_request(&self, request: &Request, peer: SocketAddr) -> RequestMatch {
        if let Some(exchange) = self.store.lookup_mid(request.message.mid, peer) {
            return RequestMatch {
                exchange,
                duplicate: true,
            };
        }

        let exchange = self.store.create(Origin::Remote, peer);
        exchange.set_request(request.clone());
        let _ = self.store.register_mid(request.message.mid, peer, &exchange);
        RequestMatch {
            exchange,
            duplicate: false,
        }
    }

    /// Looks up by `KeyToken`; validates the correlation context to defeat
    /// cross-session injection.
    pub fn receive_response(&self, response: &Response, peer: SocketAddr, context: Option<&[u8]>) -> Option<Arc<Exchange>> {
        let exchange = self.store.lookup_token(&response.message.token, peer)?;

        if let (Some(expected), Some(observed)) = (exchange.correlation_context(), context) {
            if expected.0 != observed {
                return None;
            }
        }

        Some(exchange)
    }

    /// ACK/RST only match exchanges whose outstanding request used that MID.
    pub fn receive_empty(&self, message: &EmptyMessage, peer: SocketAddr) -> Option<Arc<Exchange>> {
        self.store.lookup_mid(message.mid(), peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoapConfig;
    use crate::message::{Code, Scheme};
    use crate::time::SystemClock;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    fn matcher() -> UdpMatcher {
        let store = Arc::new(ExchangeStore::new(Arc::new(SystemClock), &CoapConfig::default()));
        UdpMatcher::new(store, 8)
    }

    #[test]
    fn send_request_assigns_mid_and_token() {
        let matcher = matcher();
        let exchange = matcher.store.create(Origin::Local, peer());
        let mut request = Request::new(Code::GET, Scheme::Coap).with_destination(peer());
        matcher.send_request(&exchange, &mut request).unwrap();
        assert_eq!(exchange.origin, Origin::Local);
        assert!(!request.message.token.is_empty());
    }

    #[test]
    fn duplicate_inbound_con_returns_existing_exchange() {
        let matcher = matcher();
        let mut request = Request::new(Code::GET, Scheme::Coap);
        request.message.mid = crate::message::Mid(7);
        let first = matcher.receive_request(&request, peer());
        assert!(!first.duplicate);
        let second = matcher.receive_request(&request, peer());
        assert!(second.duplicate);
        assert_eq!(first.exchange.id, second.exchange.id);
    }
}
