//! `Request`: code class 0, detail 1..=4.
use std::net::SocketAddr;

use super::{Code, Mid, Message, MessageType, Options, Scheme, Token};

/// A CoAP request, wrapping the common [`Message`] plus the destination/
/// source identity the endpoint needs to route it.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub message: Message,
    /// Set for locally-originated requests before the matcher assigns a
    /// peer; `None` is only valid before `send_request` has resolved an
    /// address.
    pub destination: Option<SocketAddr>,
    /// Set for remotely-received requests by the Inbox.
    pub source: Option<SocketAddr>,
    pub scheme: Scheme,
}

impl Request {
    pub fn new(code: Code, scheme: Scheme) -> Self {
        Self {
            message: Message::new(MessageType::Confirmable, code, Mid(0), Token::empty()),
            destination: None,
            source: None,
            scheme,
        }
    }

    pub fn get(scheme: Scheme) -> Self {
        Self::new(Code::GET, scheme)
    }

    pub fn with_type(mut self, mtype: MessageType) -> Self {
        self.message.mtype = mtype;
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.message.token = token;
        self
    }

    pub fn with_destination(mut self, addr: SocketAddr) -> Self {
        self.destination = Some(addr);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.message.options = options;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.message.payload = payload.into();
        self
    }

    pub fn is_confirmable(&self) -> bool {
        self.message.mtype.is_confirmable()
    }

    /// `Observe` option present with value 0 (register) per RFC 7641 §1.
    pub fn is_observe_register(&self) -> bool {
        self.message.options.observe() == Some(0)
    }

    /// `Observe` option present with value 1 (deregister).
    pub fn is_observe_deregister(&self) -> bool {
        self.message.options.observe() == Some(1)
    }

    /// Reassembled target path, joining repeated Uri-Path segments with `/`.
    pub fn uri_path(&self) -> String {
        self.message
            .options
            .all(super::OptionNumber::UriPath.number())
            .iter()
            .map(|segment| String::from_utf8_lossy(segment))
            .collect::<Vec<_>>()
            .join("/")
    }
}
