//! In-process loopback `Connector` for integration tests: swaps a real
//! socket for a deterministic in-memory peer, addressed through a shared
//! registry two [`MockConnector`]s look each other up in — there is no
//! framing or real I/O, so unlike a real connector this one delivers
//! synchronously from `send`.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::connector::{Connector, HandshakeCallback, RawData, RawDataReceiver};
use crate::error::Result;
use crate::message::Scheme;

/// Shared address book every [`MockConnector`] in a test registers itself
/// into, so `send` can find the peer's receiver by address without any
/// actual socket.
#[derive(Default)]
pub struct MockNetwork {
    peers: Mutex<HashMap<SocketAddr, Weak<MockConnector>>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, addr: SocketAddr, connector: &Arc<MockConnector>) {
        self.peers.lock().insert(addr, Arc::downgrade(connector));
    }

    fn lookup(&self, addr: SocketAddr) -> Option<Arc<MockConnector>> {
        self.peers.lock().get(&addr).and_then(Weak::upgrade)
    }
}

/// One side of a loopback pair. Bound to a fixed address on construction;
/// `send` looks its destination up in the shared [`MockNetwork`] and calls
/// the peer's receiver directly on the caller's thread.
pub struct MockConnector {
    address: SocketAddr,
    scheme: Scheme,
    network: Arc<MockNetwork>,
    receiver: Mutex<Option<Arc<dyn RawDataReceiver>>>,
    dropped: Mutex<bool>,
}

impl MockConnector {
    pub fn new(network: Arc<MockNetwork>, address: SocketAddr, scheme: Scheme) -> Arc<Self> {
        let connector = Arc::new(Self {
            address,
            scheme,
            network: network.clone(),
            receiver: Mutex::new(None),
            dropped: Mutex::new(false),
        });
        network.register(address, &connector);
        connector
    }

    /// Test hook: once set, every frame sent *to* this connector is
    /// silently discarded, simulating a peer that stops acknowledging
    /// (retransmission-to-timeout).
    pub fn drop_inbound(&self, drop: bool) {
        *self.dropped.lock() = drop;
    }
}

impl Connector for MockConnector {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.network.peers.lock().remove(&self.address);
        Ok(())
    }

    fn send(&self, raw: Vec<u8>, destination: SocketAddr, on_context: Option<Box<dyn HandshakeCallback>>) -> Result<()> {
        if let Some(callback) = on_context {
            callback.on_context_established(Vec::new());
        }
        let Some(peer) = self.network.lookup(destination) else {
            return Ok(());
        };
        if *peer.dropped.lock() {
            return Ok(());
        }
        let receiver = peer.receiver.lock().clone();
        if let Some(receiver) = receiver {
            receiver.receive(RawData {
                bytes: raw,
                source: self.address,
                correlation_context: None,
                is_secure: self.scheme.is_secure(),
            });
        }
        Ok(())
    }

    fn set_raw_data_receiver(&self, receiver: Arc<dyn RawDataReceiver>) {
        *self.receiver.lock() = Some(receiver);
    }

    fn get_address(&self) -> Option<SocketAddr> {
        Some(self.address)
    }

    fn get_uri(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.address)
    }

    fn is_scheme_supported(&self, scheme: Scheme) -> bool {
        scheme == self.scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    struct CountingReceiver {
        count: Arc<AtomicUsize>,
    }

    impl RawDataReceiver for CountingReceiver {
        fn receive(&self, _data: RawData) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn frame_sent_to_a_registered_peer_is_delivered() {
        let network = MockNetwork::new();
        let client = MockConnector::new(network.clone(), addr(1), Scheme::Coap);
        let server = MockConnector::new(network.clone(), addr(2), Scheme::Coap);

        let count = Arc::new(AtomicUsize::new(0));
        server.set_raw_data_receiver(Arc::new(CountingReceiver { count: count.clone() }));

        client.send(vec![1, 2, 3], addr(2), None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_sent_to_an_unregistered_address_is_silently_dropped() {
        let network = MockNetwork::new();
        let client = MockConnector::new(network, addr(1), Scheme::Coap);
        client.send(vec![1], addr(99), None).unwrap();
    }

    #[test]
    fn drop_inbound_suppresses_delivery_to_that_peer() {
        let network = MockNetwork::new();
        let client = MockConnector::new(network.clone(), addr(1), Scheme::Coap);
        let server = MockConnector::new(network, addr(2), Scheme::Coap);

        let count = Arc::new(AtomicUsize::new(0));
        server.set_raw_data_receiver(Arc::new(CountingReceiver { count: count.clone() }));
        server.drop_inbound(true);

        client.send(vec![1], addr(2), None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn destroy_removes_the_peer_from_the_network() {
        let network = MockNetwork::new();
        let client = MockConnector::new(network.clone(), addr(1), Scheme::Coap);
        let server = MockConnector::new(network, addr(2), Scheme::Coap);
        server.destroy().unwrap();

        client.send(vec![1], addr(2), None).unwrap();
    }
}
