//! `ObserveLayer` (top, RFC 7641): registers/deregisters
//! observations on outbound requests, and on inbound notifications enforces
//! the monotonic-sequence/freshness-window rule before fanning out to the
//! deliverer and to [`NotificationListener`]s.
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::error::Result;
use crate::exchange::{Exchange, ObserveRelation};
use crate::message::Request;
use crate::message::Response;
use crate::observation::{Observation, ObservationStore};
use crate::time::Clock;

use super::{Layer, Next};

/// RFC 7641 §3.4: a notification is stale if it arrives within this window
/// of the last one and its sequence number does not compare as newer. This
/// is a protocol constant per RFC 7641, not a tuning knob.
pub const NOTIFICATION_FRESHNESS_WINDOW: Duration = Duration::from_secs(128);

const SEQUENCE_MODULUS: u32 = 1 << 24;
const SEQUENCE_HALF: u32 = 1 << 23;

/// Fan-out target for every accepted observe notification, in addition to
/// the normal `MessageDeliverer` path.
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, request: &Request, response: &Response);
}

fn is_fresher(candidate: u32, last: u32, last_at: Instant, now: Instant) -> bool {
    if now.duration_since(last_at) >= NOTIFICATION_FRESHNESS_WINDOW {
        return true;
    }
    let diff = candidate.wrapping_sub(last) % SEQUENCE_MODULUS;
    diff != 0 && diff < SEQUENCE_HALF
}

pub struct ObserveLayer {
    store: Arc<dyn ObservationStore>,
    clock: Arc<dyn Clock>,
    listeners: ArcSwap<Vec<Arc<dyn NotificationListener>>>,
}

impl ObserveLayer {
    pub fn new(store: Arc<dyn ObservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Snapshot-append: readers iterating a prior snapshot are unaffected
    ///.
    pub fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push(listener.clone());
            next
        });
    }

    fn notify_listeners(&self, request: &Request, response: &Response) {
        for listener in self.listeners.load().iter() {
            listener.on_notification(request, response);
        }
    }
}

impl Layer for ObserveLayer {
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request, next: &Next<'_>) -> Result<()> {
        if request.is_observe_register() {
            self.store.register(Observation::new(request.message.token.clone(), request.uri_path()));
            exchange.set_observe_relation(ObserveRelation::new());
        } else if request.is_observe_deregister() {
            self.store.deregister(&request.message.token);
            exchange.clear_observe_relation();
        }
        next.send_request(exchange, request)
    }

    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response, next: &Next<'_>) -> Result<()> {
        let Some(sequence) = response.message.options.observe() else {
            return next.receive_response(exchange, response);
        };

        let now = self.clock.now();
        let relation = exchange.observe_relation();

        let fresh = match &relation {
            Some(ObserveRelation {
                last_sequence: Some(last),
                last_notification_at: Some(last_at),
            }) => is_fresher(sequence, *last, *last_at, now),
            _ => true,
        };

        if !fresh {
            return Ok(());
        }

        exchange.set_observe_relation(ObserveRelation {
            last_sequence: Some(sequence),
            last_notification_at: Some(now),
        });
        self.store.update_sequence(&response.message.token, sequence);

        if let Some(request) = exchange.request() {
            self.notify_listeners(&request, &response);
        }

        next.receive_response(exchange, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Origin;
    use crate::message::{Code, Mid, MessageType, Scheme, Token};
    use crate::observation::InMemoryObservationStore;
    use crate::time::MockClock;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    struct RecordingTerminal {
        delivered_sequences: Mutex<Vec<u32>>,
    }

    impl super::super::Terminal for RecordingTerminal {
        fn send_request(&self, _: &Arc<Exchange>, _: Request) -> Result<()> {
            Ok(())
        }
        fn send_response(&self, _: &Arc<Exchange>, _: Response) -> Result<()> {
            Ok(())
        }
        fn send_empty(&self, _: &Arc<Exchange>, _: crate::message::EmptyMessage) -> Result<()> {
            Ok(())
        }
        fn receive_request(&self, _: &Arc<Exchange>, _: Request) -> Result<()> {
            Ok(())
        }
        fn receive_response(&self, _: &Arc<Exchange>, response: Response) -> Result<()> {
            self.delivered_sequences.lock().unwrap().push(response.message.options.observe().unwrap());
            Ok(())
        }
        fn receive_empty(&self, _: &Arc<Exchange>, _: crate::message::EmptyMessage) -> Result<()> {
            Ok(())
        }
    }

    fn notification(seq: u32, token: Token) -> Response {
        let mut response = Response::new(MessageType::NonConfirmable, Code::CONTENT, Mid(0), token);
        response.message.options.set_observe(seq);
        response
    }

    #[test]
    fn drops_the_one_out_of_order_notification_in_scenario_e() {
        let clock = Arc::new(MockClock::new());
        let store = Arc::new(InMemoryObservationStore::new());
        let layer = ObserveLayer::new(store, clock);
        let exchange = Arc::new(Exchange::new(1, Origin::Local, peer(), Instant::now()));
        exchange.set_request(Request::new(Code::GET, Scheme::Coap).with_token(Token(vec![0x55])));

        let terminal = RecordingTerminal {
            delivered_sequences: Mutex::new(Vec::new()),
        };
        let next = Next {
            layers: &[],
            terminal: &terminal,
        };

        for seq in [5, 7, 6] {
            layer
                .receive_response(&exchange, notification(seq, Token(vec![0x55])), &next)
                .unwrap();
        }

        assert_eq!(*terminal.delivered_sequences.lock().unwrap(), vec![5, 7]);
    }
}
