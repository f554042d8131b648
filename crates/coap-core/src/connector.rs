//! `Connector`: the transport driver boundary. Out of
//! scope to *implement* here (owning the socket, thread pool, and byte
//! serialization is a separate crate's job) — this module
//! only defines the trait the endpoint depends on.
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::message::Scheme;

/// One inbound frame as the connector hands it to the [`Inbox`](crate::endpoint::inbox::Inbox).
pub struct RawData {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
    /// Opaque session identity (e.g. DTLS epoch), surfaced so the matcher
    /// can validate later responses arrived under the same session
    ///.
    pub correlation_context: Option<Vec<u8>>,
    pub is_secure: bool,
}

/// Callback the connector invokes once per inbound frame. The endpoint's
/// `Inbox` is the production implementation; it immediately reposts to the
/// protocol stage.
pub trait RawDataReceiver: Send + Sync {
    fn receive(&self, data: RawData);
}

/// One-shot notification that a handshake established a session for an
/// outbound request, so the exchange can bind its `correlation_context`
///.
pub trait HandshakeCallback: Send + Sync {
    fn on_context_established(&self, context: Vec<u8>);
}

/// The transport driver this endpoint binds to. Implementations own the
/// socket and any I/O threads; their only interaction with core state is
/// through [`RawDataReceiver`].
pub trait Connector: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn destroy(&self) -> Result<()>;

    /// Fire-and-forget: the protocol stage never blocks on transport I/O
    ///.
    fn send(&self, raw: Vec<u8>, destination: SocketAddr, on_context: Option<Box<dyn HandshakeCallback>>) -> Result<()>;

    fn set_raw_data_receiver(&self, receiver: Arc<dyn RawDataReceiver>);

    fn get_address(&self) -> Option<SocketAddr>;
    fn get_uri(&self) -> String;
    fn is_scheme_supported(&self, scheme: Scheme) -> bool;
}
