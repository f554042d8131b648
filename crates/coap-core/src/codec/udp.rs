//! RFC 7252 §3 datagram framing: `Ver|Type|TKL` byte, Code byte, 16-bit MID,
//! token, options, optional 0xFF-delimited payload.
use crate::message::{Code, Message, Mid, MessageType, Options, Token, COAP_VERSION};

use super::options_codec::{decode_options, encode_options};
use super::{CodecError, DataParser, DataSerializer};

/// Stateless codec for the UDP wire format. One instance is shared across a
/// `Matcher::Udp`'s inbound/outbound paths since there is nothing to hold.
#[derive(Clone, Copy, Debug, Default)]
pub struct UdpCodec;

impl DataSerializer for UdpCodec {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        if message.token.len() > Token::MAX_LEN {
            return Err(CodecError::TokenTooLong(message.token.len() as u8));
        }

        let mut out = Vec::with_capacity(4 + message.token.len() + message.options.iter().count() * 2 + message.payload.len());
        let type_bits = message.mtype.to_bits();
        out.push((message.version << 6) | (type_bits << 4) | message.token.len() as u8);
        out.push(message.code.to_byte());
        out.extend_from_slice(&message.mid.0.to_be_bytes());
        out.extend_from_slice(&message.token.0);

        encode_options(&message.options, &mut out);

        if !message.payload.is_empty() {
            out.push(0xFF);
            out.extend_from_slice(&message.payload);
        }

        Ok(out)
    }
}

impl DataParser for UdpCodec {
    fn parse(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated {
                needed: 4,
                have: bytes.len(),
            });
        }

        let version = bytes[0] >> 6;
        if version != COAP_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let type_bits = (bytes[0] >> 4) & 0b11;
        let tkl = bytes[0] & 0x0F;
        if tkl as usize > Token::MAX_LEN {
            return Err(CodecError::TokenTooLong(tkl));
        }

        let code = Code::from_byte(bytes[1]);
        let mid = Mid(u16::from_be_bytes([bytes[2], bytes[3]]));

        let token_end = 4 + tkl as usize;
        if bytes.len() < token_end {
            return Err(CodecError::Truncated {
                needed: token_end,
                have: bytes.len(),
            });
        }
        let token = Token(bytes[4..token_end].to_vec());

        let mut options = Options::new();
        let payload_start = decode_options(bytes, token_end, &mut options)?;
        let payload = bytes[payload_start..].to_vec();

        let mut message = Message::new(MessageType::from_bits(type_bits), code, mid, token);
        message.options = options;
        message.payload = payload;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OptionNumber;

    fn sample_message() -> Message {
        let mut message = Message::new(MessageType::Confirmable, Code::GET, Mid(0x1234), Token(vec![0xde, 0xad]));
        message.options.push(OptionNumber::UriPath.number(), b"temperature".to_vec());
        message.payload = b"ignored-on-get".to_vec();
        message
    }

    #[test]
    fn round_trips_a_request_with_payload() {
        let codec = UdpCodec;
        let original = sample_message();
        let bytes = codec.serialize(&original).unwrap();
        let decoded = codec.parse(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_truncated_header() {
        let codec = UdpCodec;
        assert_eq!(
            codec.parse(&[0x40, 0x01]),
            Err(CodecError::Truncated { needed: 4, have: 2 })
        );
    }

    #[test]
    fn rejects_unsupported_version() {
        let codec = UdpCodec;
        let bytes = [0b10_00_0000, 0x01, 0x00, 0x00];
        assert_eq!(codec.parse(&bytes), Err(CodecError::UnsupportedVersion(2)));
    }

    #[test]
    fn empty_message_has_no_payload_marker() {
        let codec = UdpCodec;
        let empty = Message::new(MessageType::Acknowledgement, Code::EMPTY, Mid(1), Token::empty());
        let bytes = codec.serialize(&empty).unwrap();
        assert_eq!(bytes.len(), 4);
    }
}
