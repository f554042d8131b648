//! `MessageDeliverer`: the application-facing sink for
//! inbound requests and responses. The resource tree itself is out of
//! scope; this module only defines the trait plus the
//! default client-side deliverer installed when the caller supplies none.
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::CoapError;
use crate::exchange::Exchange;
use crate::message::{Request, Response, Token};

/// Injected at `Endpoint::start`. If none is set, a default client-side
/// deliverer is installed: it forwards responses to the
/// request's pending-response callback and drops inbound requests, since a
/// pure client never serves a resource tree.
pub trait MessageDeliverer: Send + Sync {
    fn deliver_request(&self, exchange: &Arc<Exchange>, request: Request);
    fn deliver_response(&self, exchange: &Arc<Exchange>, response: Response);

    /// Called instead of `deliver_response` when an exchange resolves
    /// without one, e.g. a CON exhausting its retransmissions. Default is a
    /// no-op so existing deliverers that only care about real responses
    /// don't need changing.
    fn deliver_failure(&self, _exchange: &Arc<Exchange>, _error: CoapError) {}
}

/// A one-shot slot a caller of `send_request` can poll or block on for the
/// matching response. `ClientDeliverer` fills it in; nothing reads it if
/// the caller isn't interested (fire-and-observe via `NotificationListener`
/// instead, for observe relations).
pub struct PendingResponse {
    slot: parking_lot::Mutex<Option<Result<Response, CoapError>>>,
    condvar: parking_lot::Condvar,
}

impl PendingResponse {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: parking_lot::Mutex::new(None),
            condvar: parking_lot::Condvar::new(),
        })
    }

    pub fn fulfill(&self, response: Response) {
        let mut slot = self.slot.lock();
        *slot = Some(Ok(response));
        self.condvar.notify_all();
    }

    /// Unblocks `wait()` with a synthetic failure instead of a response,
    /// e.g. when the exchange times out without ever being answered.
    pub fn fail(&self, error: CoapError) {
        let mut slot = self.slot.lock();
        *slot = Some(Err(error));
        self.condvar.notify_all();
    }

    /// Blocks the caller's thread until a response or failure arrives. Used
    /// by tests and by synchronous client call sites; the protocol stage
    /// itself never calls this.
    pub fn wait(&self) -> Result<Response, CoapError> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.condvar.wait(&mut slot);
        }
    }
}

impl Default for PendingResponse {
    fn default() -> Self {
        Self {
            slot: parking_lot::Mutex::new(None),
            condvar: parking_lot::Condvar::new(),
        }
    }
}

/// Default deliverer installed when no application deliverer is supplied.
/// Drops inbound requests (no resource tree to serve them); forwards each
/// response to the pending-response slot registered for its token, if any.
#[derive(Default)]
pub struct ClientDeliverer {
    pending: DashMap<Token, Arc<PendingResponse>>,
}

impl ClientDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slot to be fulfilled the next time a response for
    /// `token` is delivered. Call before `send_request` returns to avoid
    /// racing a fast reply.
    pub fn register(&self, token: Token) -> Arc<PendingResponse> {
        let slot = PendingResponse::new();
        self.pending.insert(token, slot.clone());
        slot
    }
}

impl MessageDeliverer for ClientDeliverer {
    fn deliver_request(&self, _exchange: &Arc<Exchange>, _request: Request) {
        tracing::debug!("client deliverer dropping inbound request: no resource tree installed");
    }

    fn deliver_response(&self, _exchange: &Arc<Exchange>, response: Response) {
        if let Some((_, slot)) = self.pending.remove(&response.message.token) {
            slot.fulfill(response);
        }
    }

    fn deliver_failure(&self, exchange: &Arc<Exchange>, error: CoapError) {
        let Some(request) = exchange.request() else {
            return;
        };
        if let Some((_, slot)) = self.pending.remove(&request.message.token) {
            slot.fail(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Origin;
    use crate::message::{Code, Mid, MessageType, Scheme};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Instant;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    #[test]
    fn registered_pending_response_is_fulfilled_by_matching_token() {
        let deliverer = ClientDeliverer::new();
        let token = Token(vec![0xAB]);
        let slot = deliverer.register(token.clone());

        let exchange = Arc::new(Exchange::new(1, Origin::Local, peer(), Instant::now()));
        let response = Response::new(MessageType::Acknowledgement, Code::CONTENT, Mid(1), token);
        deliverer.deliver_response(&exchange, response.clone());

        assert_eq!(slot.wait().unwrap().message, response.message);
    }

    #[test]
    fn registered_pending_response_fails_when_the_exchange_times_out() {
        let deliverer = ClientDeliverer::new();
        let token = Token(vec![0xCD]);
        let slot = deliverer.register(token.clone());

        let exchange = Arc::new(Exchange::new(1, Origin::Local, peer(), Instant::now()));
        let request = Request::new(Code::GET, Scheme::Coap).with_token(token);
        exchange.set_request(request);
        deliverer.deliver_failure(&exchange, CoapError::Timeout { mid: Mid(1), attempts: 4 });

        assert!(matches!(slot.wait(), Err(CoapError::Timeout { attempts: 4, .. })));
    }

    #[test]
    fn request_without_scheme_uri_still_drops_cleanly() {
        let deliverer = ClientDeliverer::new();
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), Instant::now()));
        let request = Request::new(Code::GET, Scheme::Coap);
        deliverer.deliver_request(&exchange, request);
    }
}
