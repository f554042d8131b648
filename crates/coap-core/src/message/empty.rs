//! `EmptyMessage`: code 0.00, type ACK or RST.
use super::{Code, Mid, Message, MessageType, Token};

/// An ACK or RST carrying no payload, used both to acknowledge a CON and to
/// reject an unmatched/malformed message (RFC 7252 §4.2/§4.3).
#[derive(Clone, Debug, PartialEq)]
pub struct EmptyMessage {
    pub message: Message,
}

impl EmptyMessage {
    pub fn ack(mid: Mid) -> Self {
        Self {
            message: Message::new(MessageType::Acknowledgement, Code::EMPTY, mid, Token::empty()),
        }
    }

    pub fn reset(mid: Mid) -> Self {
        Self {
            message: Message::new(MessageType::Reset, Code::EMPTY, mid, Token::empty()),
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self.message.mtype, MessageType::Reset)
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.message.mtype, MessageType::Acknowledgement)
    }

    pub fn mid(&self) -> Mid {
        self.message.mid
    }
}
