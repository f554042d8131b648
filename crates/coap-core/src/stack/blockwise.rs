//! `BlockwiseLayer` (middle, RFC 7959): splits oversized
//! outbound payloads into block1/block2 sequences and reassembles inbound
//! ones. Reassembly state lives on the `Exchange` (`BlockTransferState`),
//! one field per direction, so it survives across the several wire messages
//! one logical transfer spans.
//!
//! Outbound splitting is driven by the caller: a caller that wants to push
//! a payload larger than one block sends it across several `send_request`/
//! `send_response` calls, incrementing the `Block1`/`Block2` option's `num`
//! each time. This layer's job there is just to enforce the slice matches
//! the negotiated block size. Inbound reassembly is this layer's own
//! responsibility and needs no cooperation from the caller.
use std::sync::Arc;

use crate::error::{CoapError, Result};
use crate::exchange::{BlockProgress, Exchange};
use crate::message::{BlockValue, Request, Response};

use super::{Layer, Next};
use crate::config::CoapConfig;

pub struct BlockwiseLayer {
    config: CoapConfig,
}

impl BlockwiseLayer {
    pub fn new(config: CoapConfig) -> Self {
        Self { config }
    }

    fn block_size(&self) -> usize {
        self.config.preferred_block_size as usize
    }

    fn slice(&self, payload: &[u8], num: u32, requested_more: bool) -> (Vec<u8>, bool) {
        let size = self.block_size();
        let start = num as usize * size;
        if start >= payload.len() {
            return (Vec::new(), false);
        }
        let end = (start + size).min(payload.len());
        let more = requested_more || end < payload.len();
        (payload[start..end].to_vec(), end < payload.len() && more)
    }
}

impl Layer for BlockwiseLayer {
    fn send_request(&self, exchange: &Arc<Exchange>, mut request: Request, next: &Next<'_>) -> Result<()> {
        if request.message.payload.len() > self.block_size() {
            let num = request.message.options.block1().map(|b| b.num).unwrap_or(0);
            let (slice, more) = self.slice(&request.message.payload, num, false);
            request.message.options.set_block1(BlockValue {
                num,
                more,
                szx: BlockValue::szx_for_size(self.block_size()),
            });
            request.message.payload = slice;
        }
        next.send_request(exchange, request)
    }

    fn send_response(&self, exchange: &Arc<Exchange>, mut response: Response, next: &Next<'_>) -> Result<()> {
        if response.message.payload.len() > self.block_size() {
            let num = response.message.options.block2().map(|b| b.num).unwrap_or(0);
            let (slice, more) = self.slice(&response.message.payload, num, false);
            response.message.options.set_block2(BlockValue {
                num,
                more,
                szx: BlockValue::szx_for_size(self.block_size()),
            });
            response.message.payload = slice;
        }
        next.send_response(exchange, response)
    }

    /// Reassembles an inbound block1 (request body) transfer. Only the
    /// final block is forwarded upward; intermediate blocks return `Ok(())`
    /// without delivering, marking the exchange so the inbox emits the
    /// matching 2.31 (Continue) once this call returns.
    ///
    /// A block1 num 0 under a token that doesn't match the in-progress
    /// transfer starts a fresh reassembly rather than appending to the old
    /// one — a peer restarting a PUT with a new token shouldn't have its
    /// first block glued onto the abandoned transfer's buffer.
    fn receive_request(&self, exchange: &Arc<Exchange>, mut request: Request, next: &Next<'_>) -> Result<()> {
        let Some(block1) = request.message.options.block1() else {
            return next.receive_request(exchange, request);
        };

        let token = request.message.token.clone();
        let expected_num = exchange.with_block_state(|state| match &state.block1 {
            Some(progress) if progress.token == token => progress.next_num,
            _ => 0,
        });
        if block1.num != expected_num {
            return Err(CoapError::RequestEntityIncomplete {
                token: request.message.token.clone(),
                detail: format!("expected block1 num {expected_num}, got {}", block1.num),
            });
        }

        let incoming = std::mem::take(&mut request.message.payload);
        let (assembled_len, assembled, more) = exchange.with_block_state(|state| {
            if state.block1.as_ref().is_some_and(|p| p.token != token) {
                state.block1 = None;
            }
            let progress = state.block1.get_or_insert_with(|| BlockProgress {
                token: token.clone(),
                ..BlockProgress::default()
            });
            progress.assembled.extend_from_slice(&incoming);
            progress.next_num += 1;
            progress.szx = block1.szx;
            (progress.assembled.len(), progress.assembled.clone(), block1.more)
        });

        if assembled_len > self.config.max_resource_body_size {
            return Err(CoapError::RequestEntityTooLarge {
                size: assembled_len,
                limit: self.config.max_resource_body_size,
            });
        }

        if more {
            exchange.with_block_state(|state| state.block1_continue_pending = true);
            return Ok(());
        }

        exchange.with_block_state(|state| state.block1 = None);
        request.message.options.remove(crate::message::OptionNumber::Block1.number());
        request.message.payload = assembled;
        next.receive_request(exchange, request)
    }

    /// Reassembles an inbound block2 (response body) transfer on the
    /// requesting side. Only the final block is forwarded to the
    /// deliverer; intermediate blocks are absorbed here. As with block1, a
    /// token change restarts reassembly instead of appending to the old
    /// buffer.
    fn receive_response(&self, exchange: &Arc<Exchange>, mut response: Response, next: &Next<'_>) -> Result<()> {
        let Some(block2) = response.message.options.block2() else {
            return next.receive_response(exchange, response);
        };

        let token = response.message.token.clone();
        let incoming = std::mem::take(&mut response.message.payload);
        let (assembled_len, assembled) = exchange.with_block_state(|state| {
            if state.block2.as_ref().is_some_and(|p| p.token != token) {
                state.block2 = None;
            }
            let progress = state.block2.get_or_insert_with(|| BlockProgress {
                token: token.clone(),
                ..BlockProgress::default()
            });
            progress.assembled.extend_from_slice(&incoming);
            progress.next_num = block2.num + 1;
            progress.szx = block2.szx;
            (progress.assembled.len(), progress.assembled.clone())
        });

        if assembled_len > self.config.max_resource_body_size {
            return Err(CoapError::RequestEntityTooLarge {
                size: assembled_len,
                limit: self.config.max_resource_body_size,
            });
        }

        if block2.more {
            return Ok(());
        }

        exchange.with_block_state(|state| state.block2 = None);
        response.message.options.remove(crate::message::OptionNumber::Block2.number());
        response.message.payload = assembled;
        next.receive_response(exchange, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Origin;
    use crate::message::{Code, MessageType, Scheme, Token};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Instant;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    struct CapturingTerminal {
        delivered: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl CapturingTerminal {
        fn new() -> Self {
            Self {
                delivered: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl super::super::Terminal for CapturingTerminal {
        fn send_request(&self, _: &Arc<Exchange>, _: Request) -> Result<()> {
            Ok(())
        }
        fn send_response(&self, _: &Arc<Exchange>, _: Response) -> Result<()> {
            Ok(())
        }
        fn send_empty(&self, _: &Arc<Exchange>, _: crate::message::EmptyMessage) -> Result<()> {
            Ok(())
        }
        fn receive_request(&self, _: &Arc<Exchange>, request: Request) -> Result<()> {
            self.delivered.lock().unwrap().push(request.message.payload);
            Ok(())
        }
        fn receive_response(&self, _: &Arc<Exchange>, response: Response) -> Result<()> {
            self.delivered.lock().unwrap().push(response.message.payload);
            Ok(())
        }
        fn receive_empty(&self, _: &Arc<Exchange>, _: crate::message::EmptyMessage) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reassembles_block1_request_across_three_blocks() {
        let config = CoapConfig::default().with_preferred_block_size(16);
        let layer = BlockwiseLayer::new(config);
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), Instant::now()));
        let terminal = CapturingTerminal::new();
        let next = Next {
            layers: &[],
            terminal: &terminal,
        };

        let full_body = vec![0xAB; 40];
        for (num, chunk) in full_body.chunks(16).enumerate() {
            let more = (num + 1) * 16 < full_body.len();
            let mut request = Request::new(Code::PUT, Scheme::Coap).with_type(MessageType::Confirmable);
            request.message.options.set_block1(BlockValue {
                num: num as u32,
                more,
                szx: BlockValue::szx_for_size(16),
            });
            request.message.payload = chunk.to_vec();
            layer.receive_request(&exchange, request, &next).unwrap();
        }

        let delivered = terminal.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], full_body);
    }

    #[test]
    fn oversized_reassembly_is_rejected() {
        let config = CoapConfig::default().with_preferred_block_size(16).with_max_resource_body_size(20);
        let layer = BlockwiseLayer::new(config);
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), Instant::now()));
        let terminal = CapturingTerminal::new();
        let next = Next {
            layers: &[],
            terminal: &terminal,
        };

        let mut first = Request::new(Code::PUT, Scheme::Coap);
        first.message.options.set_block1(BlockValue { num: 0, more: true, szx: 0 });
        first.message.payload = vec![0; 16];
        layer.receive_request(&exchange, first, &next).unwrap();

        let mut second = Request::new(Code::PUT, Scheme::Coap);
        second.message.options.set_block1(BlockValue { num: 1, more: false, szx: 0 });
        second.message.payload = vec![0; 16];
        let err = layer.receive_request(&exchange, second, &next).unwrap_err();
        assert!(matches!(err, CoapError::RequestEntityTooLarge { .. }));
    }

    #[test]
    fn intermediate_block1_marks_continue_pending_final_clears_it() {
        let config = CoapConfig::default().with_preferred_block_size(16);
        let layer = BlockwiseLayer::new(config);
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), Instant::now()));
        let terminal = CapturingTerminal::new();
        let next = Next {
            layers: &[],
            terminal: &terminal,
        };

        let mut first = Request::new(Code::PUT, Scheme::Coap);
        first.message.options.set_block1(BlockValue { num: 0, more: true, szx: 0 });
        first.message.payload = vec![0; 16];
        layer.receive_request(&exchange, first, &next).unwrap();
        assert!(exchange.take_block1_continue_pending());
        assert!(!exchange.take_block1_continue_pending());

        let mut second = Request::new(Code::PUT, Scheme::Coap);
        second.message.options.set_block1(BlockValue { num: 1, more: false, szx: 0 });
        second.message.payload = vec![0; 16];
        layer.receive_request(&exchange, second, &next).unwrap();
        assert!(!exchange.take_block1_continue_pending());
    }

    #[test]
    fn block1_transfer_restarts_when_the_token_changes() {
        let config = CoapConfig::default().with_preferred_block_size(16);
        let layer = BlockwiseLayer::new(config);
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), Instant::now()));
        let terminal = CapturingTerminal::new();
        let next = Next {
            layers: &[],
            terminal: &terminal,
        };

        let mut abandoned = Request::new(Code::PUT, Scheme::Coap).with_token(Token(vec![0x01]));
        abandoned.message.options.set_block1(BlockValue { num: 0, more: true, szx: 0 });
        abandoned.message.payload = vec![0xAA; 16];
        layer.receive_request(&exchange, abandoned, &next).unwrap();

        let mut restarted = Request::new(Code::PUT, Scheme::Coap).with_token(Token(vec![0x02]));
        restarted.message.options.set_block1(BlockValue { num: 0, more: false, szx: 0 });
        restarted.message.payload = vec![0xBB; 8];
        layer.receive_request(&exchange, restarted, &next).unwrap();

        let delivered = terminal.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], vec![0xBB; 8]);
    }

    #[test]
    fn unrelated_messages_pass_through_untouched() {
        let layer = BlockwiseLayer::new(CoapConfig::default());
        let exchange = Arc::new(Exchange::new(1, Origin::Remote, peer(), Instant::now()));
        let terminal = CapturingTerminal::new();
        let next = Next {
            layers: &[],
            terminal: &terminal,
        };
        let request = Request::new(Code::GET, Scheme::Coap).with_token(Token::empty());
        layer.receive_request(&exchange, request, &next).unwrap();
        assert_eq!(terminal.delivered.lock().unwrap().len(), 1);
    }
}
