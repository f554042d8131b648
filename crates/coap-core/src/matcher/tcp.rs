//! TCP matcher variant. No MIDs in the reliability sense,
//! no dedup by MID, no RST-on-unmatched-response — the stream itself
//! supplies ordering and delivery guarantees that UDP needs a MID for.
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::exchange::store::ExchangeStore;
use crate::exchange::{Exchange, Origin};
use crate::message::{EmptyMessage, Request, Response};

use super::{generate_token, reject_if_collision, RequestMatch};

pub struct TcpMatcher {
    pub(super) store: Arc<ExchangeStore>,
    token_size_limit: usize,
}

impl TcpMatcher {
    pub fn new(store: Arc<ExchangeStore>, token_size_limit: usize) -> Self {
        Self {
            store,
            token_size_limit,
        }
    }

    pub fn send_request(&self, exchange: &Arc<Exchange>, request: &mut Request) -> Result<()> {
        let peer = request
            .destination
            .expect("Outbox asserts destination is set before the matcher runs");

        if request.message.token.is_empty() {
            request.message.token = generate_token(self.token_size_limit);
        }
        exchange.set_request(request.clone());

        reject_if_collision(
            self.store.register_token(request.message.token.clone(), peer, exchange),
            &request.message.token,
        )?;

        Ok(())
    }

    pub fn send_response(&self, exchange: &Arc<Exchange>, response: &Response) -> Result<()> {
        exchange.set_response(response.clone());
        Ok(())
    }

    /// No dedup registration exists for TCP; the stream guarantees each
    /// frame is delivered once.
    pub fn send_empty(&self, _exchange: &Arc<Exchange>, _message: &EmptyMessage) -> Result<()> {
        Ok(())
    }

    /// TCP has no MID-based dedup table; every inbound request opens a
    /// fresh exchange.
    pub fn receive_request(&self, request: &Request, peer: SocketAddr) -> RequestMatch {
        let exchange = self.store.create(Origin::Remote, peer);
        exchange.set_request(request.clone());
        RequestMatch {
            exchange,
            duplicate: false,
        }
    }

    pub fn receive_response(&self, response: &Response, peer: SocketAddr, context: Option<&[u8]>) -> Option<Arc<Exchange>> {
        let exchange = self.store.lookup_token(&response.message.token, peer)?;

        if let (Some(expected), Some(observed)) = (exchange.correlation_context(), context) {
            if expected.0 != observed {
                return None;
            }
        }

        Some(exchange)
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

    #[test]
    fn every_inbound_request_opens_a_fresh_exchange() {
        let store = Arc::new(ExchangeStore::new(Arc::new(SystemClock), &CoapConfig::default()));
        let matcher = TcpMatcher::new(store, 8);
        let request = Request::new(Code::GET, Scheme::CoapTcp);
        let a = matcher.receive_request(&request, peer());
        let b = matcher.receive_request(&request, peer());
        assert_ne!(a.exchange.id, b.exchange.id);
        assert!(!a.duplicate && !b.duplicate);
    }

    #[test]
    fn send_request_allocates_a_token_when_absent() {
        let store = Arc::new(ExchangeStore::new(Arc::new(SystemClock), &CoapConfig::default()));
        let matcher = TcpMatcher::new(store, 8);
        let exchange = matcher.store.create(Origin::Local, peer());
        let mut request = Request::new(Code::GET, Scheme::CoapTcp).with_destination(peer());
        matcher.send_request(&exchange, &mut request).unwrap();
        assert!(!request.message.token.is_empty());
    }
}
