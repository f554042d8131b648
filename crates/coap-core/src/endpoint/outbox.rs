//! `Outbox`: the send-side I/O boundary and the bottom [`Terminal`] of the
//! stack. Every outbound message, whether it started life
//! at `Endpoint::send_request`/`send_response`/`send_empty_message` or as a
//! re-send of a cached duplicate response, ends up here: register with the
//! matcher, fan through interceptors, serialize, hand to the connector.
use std::net::SocketAddr;
use std::sync::Arc;

use crate::codec::DataSerializer;
use crate::connector::{Connector, HandshakeCallback};
use crate::deliverer::MessageDeliverer;
use crate::endpoint::executor::TaskExecutor;
use crate::endpoint::interceptor::{EndpointObserver, MessageInterceptor, SnapshotList};
use crate::error::{CoapError, Result};
use crate::exchange::Exchange;
use crate::matcher::Matcher;
use crate::message::{EmptyMessage, Request, Response};
use crate::stack::{ReliabilityLayer, Terminal};

/// Binds a handshake's negotiated session identity onto the exchange that
/// triggered it, so a later response can be checked against the same
/// correlation context.
struct ExchangeContextBinder(Arc<Exchange>);

impl HandshakeCallback for ExchangeContextBinder {
    fn on_context_established(&self, context: Vec<u8>) {
        self.0.set_correlation_context(crate::exchange::CorrelationContext(context));
    }
}

pub struct Outbox {
    matcher: Arc<Matcher>,
    codec: Arc<dyn DataSerializer>,
    connector: Arc<dyn Connector>,
    interceptors: Arc<SnapshotList<dyn MessageInterceptor>>,
    observers: Arc<SnapshotList<dyn EndpointObserver>>,
    reliability: Arc<ReliabilityLayer>,
    deliverer: parking_lot::Mutex<Option<Arc<dyn MessageDeliverer>>>,
}

impl Outbox {
    pub fn new(
        matcher: Arc<Matcher>,
        codec: Arc<dyn DataSerializer>,
        connector: Arc<dyn Connector>,
        interceptors: Arc<SnapshotList<dyn MessageInterceptor>>,
        observers: Arc<SnapshotList<dyn EndpointObserver>>,
        reliability: Arc<ReliabilityLayer>,
    ) -> Self {
        Self {
            matcher,
            codec,
            connector,
            interceptors,
            observers,
            reliability,
            deliverer: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the executor the reliability layer posts retransmission and
    /// timeout jobs through. Set once, at `Endpoint::start`.
    pub fn set_executor(&self, executor: Arc<dyn TaskExecutor>) {
        self.reliability.set_executor(executor);
    }

    /// Binds the deliverer notified with a synthetic failure if a CON this
    /// Outbox armed exhausts its retransmissions.
    pub fn set_deliverer(&self, deliverer: Arc<dyn MessageDeliverer>) {
        *self.deliverer.lock() = Some(deliverer);
    }

    fn require_destination(destination: Option<SocketAddr>) -> Result<SocketAddr> {
        match destination {
            Some(addr) if addr.port() != 0 => Ok(addr),
            _ => Err(CoapError::InvalidArgument("message has no destination address".to_string())),
        }
    }

    fn arm_retransmission(&self, exchange: &Arc<Exchange>, bytes: Vec<u8>, destination: SocketAddr) {
        let connector = self.connector.clone();
        let deliverer = self.deliverer.lock().clone();
        let observers = self.observers.clone();
        self.reliability.start_retransmission(
            exchange.clone(),
            bytes,
            move |raw| {
                let _ = connector.send(raw.to_vec(), destination, None);
            },
            move |exchange, attempts| {
                let mid = exchange.request().map(|r| r.message.mid).unwrap_or(crate::message::Mid(0));
                if let Some(deliverer) = &deliverer {
                    deliverer.deliver_failure(exchange, CoapError::Timeout { mid, attempts });
                }
                for observer in observers.snapshot().iter() {
                    observer.exchange_failed(exchange, crate::exchange::CompletionReason::Timeout);
                }
            },
        );
    }
}

impl Terminal for Outbox {
    /// (1) destination asserted, (2) matcher
    /// registers MID/token, (3) interceptors observe and may cancel, (4) if
    /// still live, serialize and hand to the connector, arming the
    /// retransmission timer for a CON.
    fn send_request(&self, exchange: &Arc<Exchange>, mut request: Request) -> Result<()> {
        let destination = Self::require_destination(request.destination)?;

        self.matcher.send_request(exchange, &mut request)?;

        for interceptor in self.interceptors.snapshot().iter() {
            interceptor.send_request(exchange, &request);
        }
        if exchange.is_canceled() {
            return Ok(());
        }

        let bytes = self.codec.serialize(&request.message)?;
        self.connector
            .send(bytes.clone(), destination, Some(Box::new(ExchangeContextBinder(exchange.clone()))))?;

        if request.is_confirmable() {
            self.arm_retransmission(exchange, bytes, destination);
        }

        Ok(())
    }

    fn send_response(&self, exchange: &Arc<Exchange>, response: Response) -> Result<()> {
        let destination = Self::require_destination(Some(exchange.remote_addr))?;

        self.matcher.send_response(exchange, &response)?;

        for interceptor in self.interceptors.snapshot().iter() {
            interceptor.send_response(exchange, &response);
        }
        if exchange.is_canceled() {
            return Ok(());
        }

        let bytes = self.codec.serialize(&response.message)?;
        self.connector.send(bytes.clone(), destination, None)?;

        if response.is_confirmable() {
            self.arm_retransmission(exchange, bytes, destination);
        }

        Ok(())
    }

    fn send_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage) -> Result<()> {
        let destination = Self::require_destination(Some(exchange.remote_addr))?;

        self.matcher.send_empty(exchange, &message)?;

        for interceptor in self.interceptors.snapshot().iter() {
            interceptor.send_empty(exchange, &message);
        }
        if exchange.is_canceled() {
            return Ok(());
        }

        let bytes = self.codec.serialize(&message.message)?;
        self.connector.send(bytes, destination, None)?;

        Ok(())
    }

    fn receive_request(&self, _exchange: &Arc<Exchange>, _request: Request) -> Result<()> {
        unreachable!("Outbox is the send-direction terminal; the stack never calls receive hooks on it")
    }

    fn receive_response(&self, _exchange: &Arc<Exchange>, _response: Response) -> Result<()> {
        unreachable!("Outbox is the send-direction terminal; the stack never calls receive hooks on it")
    }

    fn receive_empty(&self, _exchange: &Arc<Exchange>, _message: EmptyMessage) -> Result<()> {
        unreachable!("Outbox is the send-direction terminal; the stack never calls receive hooks on it")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::udp::UdpCodec;
    use crate::config::CoapConfig;
    use crate::exchange::store::ExchangeStore;
    use crate::exchange::Origin;
    use crate::message::{Code, MessageType, Request, Scheme};
    use crate::time::SystemClock;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    struct RecordingConnector {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Connector for RecordingConnector {
        fn start(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
        fn destroy(&self) -> Result<()> {
            Ok(())
        }
        fn send(&self, raw: Vec<u8>, _destination: SocketAddr, _on_context: Option<Box<dyn HandshakeCallback>>) -> Result<()> {
            self.sent.lock().unwrap().push(raw);
            Ok(())
        }
        fn set_raw_data_receiver(&self, _receiver: Arc<dyn crate::connector::RawDataReceiver>) {}
        fn get_address(&self) -> Option<SocketAddr> {
            None
        }
        fn get_uri(&self) -> String {
            "coap://test".to_string()
        }
        fn is_scheme_supported(&self, scheme: crate::message::Scheme) -> bool {
            matches!(scheme, Scheme::Coap)
        }
    }

    fn outbox(connector: Arc<RecordingConnector>) -> (Outbox, Arc<Matcher>) {
        let clock = Arc::new(SystemClock);
        let config = CoapConfig::default();
        let store = Arc::new(ExchangeStore::new(clock.clone(), &config));
        let matcher = Arc::new(Matcher::udp(store, 8));
        let reliability = Arc::new(ReliabilityLayer::new(config, clock));
        let outbox = Outbox::new(
            matcher.clone(),
            Arc::new(UdpCodec),
            connector,
            Arc::new(SnapshotList::new()),
            Arc::new(SnapshotList::new()),
            reliability,
        );
        (outbox, matcher)
    }

    #[test]
    fn send_request_without_destination_is_rejected() {
        let connector = Arc::new(RecordingConnector { sent: Mutex::new(Vec::new()) });
        let (outbox, matcher) = outbox(connector);
        let exchange = matcher.create_local_exchange(peer());
        let request = Request::new(Code::GET, Scheme::Coap);
        let err = outbox.send_request(&exchange, request).unwrap_err();
        assert!(matches!(err, CoapError::InvalidArgument(_)));
    }

    #[test]
    fn send_request_serializes_and_hands_to_connector() {
        let connector = Arc::new(RecordingConnector { sent: Mutex::new(Vec::new()) });
        let (outbox, matcher) = outbox(connector.clone());
        let exchange = matcher.create_local_exchange(peer());
        let request = Request::new(Code::GET, Scheme::Coap)
            .with_type(MessageType::Confirmable)
            .with_destination(peer());

        outbox.send_request(&exchange, request).unwrap();

        assert_eq!(connector.sent.lock().unwrap().len(), 1);
        assert!(exchange.request().is_some());
        assert!(exchange.with_reliability_state(|s| s.is_none()));
    }

    #[test]
    fn canceled_exchange_suppresses_the_wire_write() {
        let connector = Arc::new(RecordingConnector { sent: Mutex::new(Vec::new()) });
        let (outbox, matcher) = outbox(connector.clone());
        let exchange = matcher.create_local_exchange(peer());
        exchange.cancel();
        let request = Request::new(Code::GET, Scheme::Coap).with_destination(peer());

        outbox.send_request(&exchange, request).unwrap();

        assert!(connector.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn send_empty_uses_the_exchange_remote_address() {
        let connector = Arc::new(RecordingConnector { sent: Mutex::new(Vec::new()) });
        let (outbox, _matcher) = outbox(connector.clone());
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), std::time::Instant::now()));

        outbox
            .send_empty(&exchange, EmptyMessage::ack(crate::message::Mid(9)))
            .unwrap();

        assert_eq!(connector.sent.lock().unwrap().len(), 1);
    }
}
