//! `Exchange`: correlation state for one logical request/response
//! interaction. Mutated only inside the protocol stage;
//! interior mutability here exists so the matcher and the stack layers can
//! each hold an `Arc<Exchange>` without re-acquiring it through a store
//! lookup on every hook call.
pub mod store;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::message::{Mid, Request, Response, Token};

/// Did this side originate the request?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Why an exchange stopped being live. Carried to completion callbacks and
/// to the deliverer for synthetic failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionReason {
    Answered,
    Canceled,
    Timeout,
    Evicted,
}

/// Per-layer retransmission bookkeeping (`stack::reliability`). Only
/// present on the UDP matcher variant and only while a CON is outstanding.
#[derive(Clone, Debug)]
pub struct ReliabilityState {
    pub retransmit_count: u8,
    pub next_timeout: Duration,
    pub last_sent_bytes: Vec<u8>,
}

/// One direction's block-transfer progress (`stack::blockwise`). `token`
/// identifies which logical transfer `assembled` belongs to, so a new
/// transfer starting under a different token is detected instead of having
/// its first block appended to a stale buffer.
#[derive(Clone, Debug, Default)]
pub struct BlockProgress {
    pub token: Token,
    pub next_num: u32,
    pub szx: u8,
    pub assembled: Vec<u8>,
}

/// Per-exchange block1/block2 sub-state. A struct field per direction
/// rather than an ad-hoc attribute map.
#[derive(Clone, Debug, Default)]
pub struct BlockTransferState {
    pub block1: Option<BlockProgress>,
    pub block2: Option<BlockProgress>,
    /// Set by the blockwise layer when it absorbs a non-final block1
    /// chunk; drained by the inbox to emit the matching 2.31 Continue.
    pub block1_continue_pending: bool,
}

/// Observe sub-state attached to an exchange that registered or is serving
/// an observation (`stack::observe`).
#[derive(Clone, Debug)]
pub struct ObserveRelation {
    pub last_sequence: Option<u32>,
    pub last_notification_at: Option<Instant>,
}

/// A registration the matcher made on this exchange's behalf, recorded so
/// cancellation/eviction can remove exactly the keys that were added
/// ("Cancelling an Exchange ... removes all matcher keys").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisteredKey {
    Mid(Mid, SocketAddr),
    Token(Token, SocketAddr),
    Uri(String, Token),
}

/// Opaque session identity surfaced by the transport (e.g. a DTLS epoch),
/// used to reject responses that arrive over a different session than the
/// one the request was sent on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationContext(pub Vec<u8>);

#[derive(Debug)]
struct ExchangeInner {
    current_request: Option<Request>,
    current_response: Option<Response>,
    correlation_context: Option<CorrelationContext>,
    observe_relation: Option<ObserveRelation>,
    reliability_state: Option<ReliabilityState>,
    block_state: BlockTransferState,
    registered_keys: Vec<RegisteredKey>,
    canceled: bool,
    completed: Option<CompletionReason>,
}

/// Correlation state shared between the matcher and the protocol stack for
/// one request/response interaction. Created by the matcher on first send
/// (local) or first CON/NON received (remote); destroyed when completed,
/// canceled, or evicted after `exchange_lifetime`.
#[derive(Debug)]
pub struct Exchange {
    pub id: u64,
    pub origin: Origin,
    pub remote_addr: SocketAddr,
    pub created_at: Instant,
    /// Set by `Endpoint::send_response` when the handler supplied its own
    /// executor binding; changes whether the response is posted to the
    /// protocol stage or run on the caller's thread.
    pub custom_executor: bool,
    inner: Mutex<ExchangeInner>,
}

impl Exchange {
    pub fn new(id: u64, origin: Origin, remote_addr: SocketAddr, created_at: Instant) -> Self {
        Self {
            id,
            origin,
            remote_addr,
            created_at,
            custom_executor: false,
            inner: Mutex::new(ExchangeInner {
                current_request: None,
                current_response: None,
                correlation_context: None,
                observe_relation: None,
                reliability_state: None,
                block_state: BlockTransferState::default(),
                registered_keys: Vec::new(),
                canceled: false,
                completed: None,
            }),
        }
    }

    pub fn set_request(&self, request: Request) {
        self.inner.lock().current_request = Some(request);
    }

    pub fn request(&self) -> Option<Request> {
        self.inner.lock().current_request.clone()
    }

    pub fn set_response(&self, response: Response) {
        self.inner.lock().current_response = Some(response);
    }

    pub fn response(&self) -> Option<Response> {
        self.inner.lock().current_response.clone()
    }

    pub fn set_correlation_context(&self, context: CorrelationContext) {
        self.inner.lock().correlation_context = Some(context);
    }

    pub fn correlation_context(&self) -> Option<CorrelationContext> {
        self.inner.lock().correlation_context.clone()
    }

    pub fn record_key(&self, key: RegisteredKey) {
        self.inner.lock().registered_keys.push(key);
    }

    /// Drains the recorded keys so the caller (store) can remove each one.
    /// Leaves nothing behind — a second call returns an empty vec.
    pub fn take_registered_keys(&self) -> Vec<RegisteredKey> {
        std::mem::take(&mut self.inner.lock().registered_keys)
    }

    pub fn observe_relation(&self) -> Option<ObserveRelation> {
        self.inner.lock().observe_relation.clone()
    }

    pub fn set_observe_relation(&self, relation: ObserveRelation) {
        self.inner.lock().observe_relation = Some(relation);
    }

    pub fn clear_observe_relation(&self) {
        self.inner.lock().observe_relation = None;
    }

    pub fn is_observing(&self) -> bool {
        self.inner.lock().observe_relation.is_some()
    }

    pub fn with_reliability_state<R>(&self, f: impl FnOnce(&mut Option<ReliabilityState>) -> R) -> R {
        f(&mut self.inner.lock().reliability_state)
    }

    pub fn with_block_state<R>(&self, f: impl FnOnce(&mut BlockTransferState) -> R) -> R {
        f(&mut self.inner.lock().block_state)
    }

    /// Drains the block1-continue flag so a second call sees it cleared,
    /// mirroring `take_registered_keys`.
    pub fn take_block1_continue_pending(&self) -> bool {
        std::mem::take(&mut self.inner.lock().block_state.block1_continue_pending)
    }

    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.canceled = true;
        if inner.completed.is_none() {
            inner.completed = Some(CompletionReason::Canceled);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    pub fn complete(&self, reason: CompletionReason) {
        let mut inner = self.inner.lock();
        if inner.completed.is_none() {
            inner.completed = Some(reason);
        }
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.inner.lock().completed
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed.is_some()
    }
}

impl ObserveRelation {
    pub fn new() -> Self {
        Self {
            last_sequence: None,
            last_notification_at: None,
        }
    }
}

impl Default for ObserveRelation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    #[test]
    fn cancel_sets_completion_reason_once() {
        let exchange = Exchange::new(1, Origin::Local, addr(), Instant::now());
        exchange.complete(CompletionReason::Answered);
        exchange.cancel();
        assert_eq!(exchange.completion_reason(), Some(CompletionReason::Answered));
        assert!(exchange.is_canceled());
    }

    #[test]
    fn registered_keys_drain_exactly_once() {
        let exchange = Exchange::new(1, Origin::Remote, addr(), Instant::now());
        exchange.record_key(RegisteredKey::Mid(Mid(1), addr()));
        exchange.record_key(RegisteredKey::Token(Token::empty(), addr()));
        assert_eq!(exchange.take_registered_keys().len(), 2);
        assert!(exchange.take_registered_keys().is_empty());
    }
}
