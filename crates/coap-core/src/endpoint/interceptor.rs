//! Snapshot-readable interceptor/observer lists.
//! Backed by `arc-swap` so a message flowing through fan-out sees a
//! consistent snapshot even if another thread adds/removes a listener
//! concurrently.
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::exchange::{CompletionReason, Exchange};
use crate::message::{EmptyMessage, Request, Response};

/// Observes every inbound/outbound message before codec (send) or before
/// matching (receive). May cancel a message by setting it as canceled; the
/// core checks that flag after every fan-out.
pub trait MessageInterceptor: Send + Sync {
    fn send_request(&self, _exchange: &Arc<Exchange>, _request: &Request) {}
    fn send_response(&self, _exchange: &Arc<Exchange>, _response: &Response) {}
    fn send_empty(&self, _exchange: &Arc<Exchange>, _message: &EmptyMessage) {}
    fn receive_request(&self, _exchange: &Arc<Exchange>, _request: &Request) {}
    fn receive_response(&self, _exchange: &Arc<Exchange>, _response: &Response) {}
    fn receive_empty(&self, _exchange: &Arc<Exchange>, _message: &EmptyMessage) {}
}

/// Lifecycle callbacks fired from `Endpoint::start`/`stop`/`destroy`
///.
pub trait EndpointObserver: Send + Sync {
    fn started(&self) {}
    fn stopped(&self) {}
    fn destroyed(&self) {}

    /// An exchange resolved without ever being answered, e.g. a CON that
    /// exhausted its retransmissions. Default is a no-op so observers that
    /// only care about lifecycle events don't need changing.
    fn exchange_failed(&self, _exchange: &Arc<Exchange>, _reason: CompletionReason) {}
}

/// A copy-on-write list: writers clone-and-replace, readers get a stable
/// `Arc` snapshot with no lock held during iteration.
pub struct SnapshotList<T: ?Sized> {
    entries: ArcSwap<Vec<Arc<T>>>,
}

impl<T: ?Sized> SnapshotList<T> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add(&self, entry: Arc<T>) {
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            next.push(entry.clone());
            next
        });
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.entries.load_full()
    }
}

impl<T: ?Sized> Default for SnapshotList<T> {
    fn default() -> Self {
        Self::new()
    }
}
