//! RFC 8323 §3.2 stream framing: `Len|TKL` byte with an escaped extended
//! length, Code byte, token, options, optional payload. There is no Type or
//! Message ID field — the stream itself provides reliable, ordered delivery,
//! so this crate's `Message::mtype`/`mid` are wire-irrelevant placeholders
//! here and the matcher's `Matcher::Tcp` variant never reads them.
use crate::message::{Code, Message, Mid, MessageType, Options, Token, COAP_VERSION};

use super::options_codec::{decode_options, encode_options};
use super::{CodecError, DataParser, DataSerializer};

/// Stateless codec for the TCP wire format. A frame's total
/// length only covers options+payload; the Len/TKL/extended-length/Code/
/// token bytes that precede it are not part of the count.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpCodec;

impl DataSerializer for TcpCodec {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        if message.token.len() > Token::MAX_LEN {
            return Err(CodecError::TokenTooLong(message.token.len() as u8));
        }

        let mut body = Vec::new();
        encode_options(&message.options, &mut body);
        if !message.payload.is_empty() {
            body.push(0xFF);
            body.extend_from_slice(&message.payload);
        }

        let mut out = Vec::with_capacity(6 + message.token.len() + body.len());
        let (len_nibble, ext_len) = split_length(body.len());
        out.push((len_nibble << 4) | message.token.len() as u8);
        out.extend_from_slice(&ext_len);
        out.push(message.code.to_byte());
        out.extend_from_slice(&message.token.0);
        out.extend_from_slice(&body);

        Ok(out)
    }
}

impl DataParser for TcpCodec {
    fn parse(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Truncated { needed: 1, have: 0 });
        }

        let len_nibble = bytes[0] >> 4;
        let tkl = bytes[0] & 0x0F;
        if tkl as usize > Token::MAX_LEN {
            return Err(CodecError::TokenTooLong(tkl));
        }

        let mut pos = 1usize;
        let body_len = read_extended_length(len_nibble, bytes, &mut pos)?;

        let code_pos = pos;
        if bytes.len() <= code_pos {
            return Err(CodecError::Truncated {
                needed: code_pos + 1,
                have: bytes.len(),
            });
        }
        let code = Code::from_byte(bytes[code_pos]);
        pos = code_pos + 1;

        let token_end = pos + tkl as usize;
        if bytes.len() < token_end {
            return Err(CodecError::Truncated {
                needed: token_end,
                have: bytes.len(),
            });
        }
        let token = Token(bytes[pos..token_end].to_vec());

        let body_end = token_end + body_len;
        if bytes.len() < body_end {
            return Err(CodecError::Truncated {
                needed: body_end,
                have: bytes.len(),
            });
        }

        let mut options = Options::new();
        let payload_start = decode_options(&bytes[..body_end], token_end, &mut options)?;
        let payload = bytes[payload_start..body_end].to_vec();

        let mut message = Message::new(MessageType::Confirmable, code, Mid(0), token);
        message.version = COAP_VERSION;
        message.options = options;
        message.payload = payload;
        Ok(message)
    }
}

/// Splits a body length into its 4-bit nibble plus the extended-length bytes
/// that follow the first byte, per RFC 8323's 13/14/15 escaping.
fn split_length(len: usize) -> (u8, Vec<u8>) {
    if len < 13 {
        (len as u8, Vec::new())
    } else if len < 269 {
        (13, vec![(len - 13) as u8])
    } else if len < 65805 {
        (14, ((len - 269) as u16).to_be_bytes().to_vec())
    } else {
        (15, ((len - 65805) as u32).to_be_bytes().to_vec())
    }
}

fn read_extended_length(nibble: u8, bytes: &[u8], pos: &mut usize) -> Result<usize, CodecError> {
    match nibble {
        13 => {
            let ext = *bytes.get(*pos).ok_or(CodecError::Truncated {
                needed: *pos + 1,
                have: bytes.len(),
            })?;
            *pos += 1;
            Ok(ext as usize + 13)
        }
        14 => {
            let b0 = *bytes.get(*pos).ok_or(CodecError::Truncated {
                needed: *pos + 2,
                have: bytes.len(),
            })?;
            let b1 = *bytes.get(*pos + 1).ok_or(CodecError::Truncated {
                needed: *pos + 2,
                have: bytes.len(),
            })?;
            *pos += 2;
            Ok(u16::from_be_bytes([b0, b1]) as usize + 269)
        }
        15 => {
            let end = *pos + 4;
            let slice = bytes.get(*pos..end).ok_or(CodecError::Truncated {
                needed: end,
                have: bytes.len(),
            })?;
            *pos = end;
            Ok(u32::from_be_bytes(slice.try_into().unwrap()) as usize + 65805)
        }
        n => Ok(n as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OptionNumber;

    fn sample_message() -> Message {
        let mut message = Message::new(MessageType::Confirmable, Code::PUT, Mid(0), Token(vec![0x01]));
        message.options.push(OptionNumber::UriPath.number(), b"large".to_vec());
        message.payload = vec![0x42; 300];
        message
    }

    #[test]
    fn round_trips_a_message_with_extended_length() {
        let codec = TcpCodec;
        let original = sample_message();
        let bytes = codec.serialize(&original).unwrap();
        let decoded = codec.parse(&bytes).unwrap();
        assert_eq!(decoded.code, original.code);
        assert_eq!(decoded.token, original.token);
        assert_eq!(decoded.options, original.options);
        assert_eq!(decoded.payload, original.payload);
    }

    #[test]
    fn small_frame_uses_single_nibble_length() {
        let codec = TcpCodec;
        let message = Message::new(MessageType::Confirmable, Code::GET, Mid(0), Token::empty());
        let bytes = codec.serialize(&message).unwrap();
        assert_eq!(bytes[0] >> 4, 0);
    }

    #[test]
    fn rejects_truncated_frame() {
        let codec = TcpCodec;
        assert_eq!(codec.parse(&[]), Err(CodecError::Truncated { needed: 1, have: 0 }));
    }
}
