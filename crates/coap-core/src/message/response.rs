//! `Response`: code class in {2, 4, 5}.
use std::time::Duration;

use super::{Code, Mid, Message, MessageType, Options, Token};

/// A CoAP response, carrying the round-trip time recorded once the matcher
/// resolves which [`crate::exchange::Exchange`] it closes.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub message: Message,
    pub round_trip_time: Option<Duration>,
}

impl Response {
    pub fn new(mtype: MessageType, code: Code, mid: Mid, token: Token) -> Self {
        Self {
            message: Message::new(mtype, code, mid, token),
            round_trip_time: None,
        }
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

    pub fn is_piggybacked_ack(&self) -> bool {
        matches!(self.message.mtype, MessageType::Acknowledgement)
    }
}
