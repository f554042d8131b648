//! `Inbox`: the receive-side I/O boundary. Frames arrive
//! from the connector's own I/O thread; this is the one place the jump back
//! onto the protocol stage happens.
use std::net::SocketAddr;
use std::sync::Arc;

use crate::codec::DataParser;
use crate::connector::{RawData, RawDataReceiver};
use crate::endpoint::executor::TaskExecutor;
use crate::error::CoapError;
use crate::exchange::{Exchange, Origin};
use crate::matcher::Matcher;
use crate::message::{EmptyMessage, Message, MessageType, Request, Response, Scheme};
use crate::stack::{Stack, Terminal};

/// Everything `receive` needs once a frame has been handed to the protocol
/// stage. Split out from [`Inbox`] so the closure posted to the executor
/// doesn't have to carry (or reconstruct) an executor of its own.
///
/// Two distinct [`Terminal`]s are held: `deliverer` closes the *receive*
/// direction of the stack (bottom → top → `MessageDeliverer`); `outbox`
/// is where a re-sent duplicate response or a synthesized RST/error
/// response goes out, bypassing the stack layers since that traffic was
/// already processed once.
struct Core {
    parser: Arc<dyn DataParser>,
    matcher: Arc<Matcher>,
    stack: Arc<Stack>,
    deliverer: Arc<dyn Terminal>,
    outbox: Arc<dyn Terminal>,
}

impl Core {
    fn handle_frame(&self, data: RawData) {
        let message = match self.parser.parse(&data.bytes) {
            Ok(message) => message,
            Err(_) => {
                self.handle_malformed(&data.bytes, data.source);
                return;
            }
        };

        if message.code.is_empty() {
            self.handle_empty(message, data.source);
        } else if message.code.is_request() {
            self.handle_request(message, data.source, data.is_secure);
        } else if message.code.is_response() {
            self.handle_response(message, data.source, data.correlation_context.as_deref());
        } else {
            tracing::debug!(code = %message.code, "ignoring message whose code is neither request, response, nor empty");
        }
    }

    fn handle_empty(&self, message: Message, source: SocketAddr) {
        let empty = EmptyMessage { message };
        // ACKs/RSTs for unknown MIDs are silently dropped.
        if let Some(exchange) = self.matcher.receive_empty(&empty, source) {
            let _ = self.stack.receive_empty(&exchange, empty, self.deliverer.as_ref());
        }
    }

    fn handle_request(&self, message: Message, source: SocketAddr, is_secure: bool) {
        let is_tcp = matches!(self.matcher.as_ref(), Matcher::Tcp(_));
        let request = Request {
            message,
            destination: None,
            source: Some(source),
            scheme: Scheme::resolve(is_secure, is_tcp),
        };

        let matched = self.matcher.receive_request(&request, source);
        if matched.duplicate {
            // re-emit the cached response
            // rather than calling the deliverer a second time. If the first
            // handling hasn't produced a response yet, the duplicate is
            // simply absorbed.
            if let Some(cached) = matched.exchange.response() {
                let _ = self.outbox.send_response(&matched.exchange, cached);
            }
            return;
        }

        let request_mid = request.message.mid;
        let request_token = request.message.token.clone();
        if let Err(err) = self.stack.receive_request(&matched.exchange, request, self.deliverer.as_ref()) {
            self.respond_to_protocol_error(&matched.exchange, err, Some(request_mid));
        } else if matched.exchange.take_block1_continue_pending() {
            let response = Response::new(MessageType::Acknowledgement, crate::message::Code::CONTINUE, request_mid, request_token);
            let _ = self.outbox.send_response(&matched.exchange, response);
        }
    }

    fn handle_response(&self, message: Message, source: SocketAddr, context: Option<&[u8]>) {
        let response = Response {
            message,
            round_trip_time: None,
        };

        match self.matcher.receive_response(&response, source, context) {
            Some(exchange) => {
                if let Err(err) = self.stack.receive_response(&exchange, response, self.deliverer.as_ref()) {
                    self.respond_to_protocol_error(&exchange, err, None);
                }
            }
            None => {
                // unmatched response (no live
                // exchange, or one rejected for arriving under a different
                // correlation context). ACKs/NON are dropped silently; a
                // Confirmable response gets an RST back via a throwaway
                // exchange, mirroring `handle_malformed`.
                let mid = response.message.mid;
                if response.is_confirmable() {
                    tracing::debug!(peer = %source, token = ?response.message.token, mid = %mid, "resetting unmatched confirmable response");
                    let exchange = Arc::new(Exchange::new(0, Origin::Remote, source, std::time::Instant::now()));
                    let _ = self.outbox.send_empty(&exchange, EmptyMessage::reset(mid));
                } else if !matches!(response.message.mtype, MessageType::Acknowledgement) {
                    tracing::debug!(peer = %source, token = ?response.message.token, "dropping unmatched response");
                }
            }
        }
    }

    /// a CON whose header parsed far enough to recover a MID
    /// gets an RST; anything else (NON, or a header too damaged to yield a
    /// MID) is silently dropped with a log line. Only meaningful for the
    /// UDP variant — TCP framing carries no MID to recover.
    fn handle_malformed(&self, bytes: &[u8], source: SocketAddr) {
        let Matcher::Udp(_) = self.matcher.as_ref() else {
            tracing::debug!(peer = %source, "dropping unparseable TCP frame");
            return;
        };

        if bytes.len() < 4 {
            tracing::debug!(peer = %source, "dropping unparseable frame: header too short to recover a MID");
            return;
        }

        let mtype = MessageType::from_bits(bytes[0] >> 4);
        let mid = crate::message::Mid(u16::from_be_bytes([bytes[2], bytes[3]]));

        if !mtype.is_confirmable() {
            tracing::debug!(peer = %source, mid = %mid, "dropping unparseable non-confirmable message");
            return;
        }

        tracing::warn!(
            "{}",
            CoapError::MalformedConfirmable {
                peer: source,
                mid,
                detail: "frame failed to parse past the fixed header".to_string(),
            }
        );

        // An RST needs some exchange to carry it through, even though the
        // request never parsed; a throwaway remote exchange is created and
        // registered nowhere.
        let exchange = Arc::new(Exchange::new(0, Origin::Remote, source, std::time::Instant::now()));
        let _ = self.outbox.send_empty(&exchange, EmptyMessage::reset(mid));
    }

    /// blockwise errors map to specific response codes.
    /// Everything else is logged and otherwise swallowed at this boundary
    /// — protocol-stage exceptions never tear down the executor (§7).
    fn respond_to_protocol_error(&self, exchange: &Arc<Exchange>, err: CoapError, mid: Option<crate::message::Mid>) {
        use crate::message::Code;

        let code = match &err {
            CoapError::RequestEntityTooLarge { .. } => Some(Code::REQUEST_ENTITY_TOO_LARGE),
            CoapError::RequestEntityIncomplete { .. } => Some(Code::REQUEST_ENTITY_INCOMPLETE),
            _ => None,
        };

        tracing::warn!(error = %err, "protocol-stage error handling inbound message");

        match (code, exchange.request()) {
            (Some(code), Some(request)) => {
                let response = Response::new(MessageType::Acknowledgement, code, request.message.mid, request.message.token);
                let _ = self.outbox.send_response(exchange, response);
            }
            _ => {
                if let Some(mid) = mid {
                    let _ = self.outbox.send_empty(exchange, EmptyMessage::reset(mid));
                }
            }
        }
    }
}

pub struct Inbox {
    core: Arc<Core>,
    executor: Arc<dyn TaskExecutor>,
}

impl Inbox {
    pub fn new(
        parser: Arc<dyn DataParser>,
        matcher: Arc<Matcher>,
        stack: Arc<Stack>,
        deliverer: Arc<dyn Terminal>,
        outbox: Arc<dyn Terminal>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                parser,
                matcher,
                stack,
                deliverer,
                outbox,
            }),
            executor,
        }
    }
}

impl RawDataReceiver for Inbox {
    /// The pre-condition check is the only thing done on the connector's own
    /// thread; parsing and everything after it runs on the protocol stage
    ///.
    fn receive(&self, data: RawData) {
        if data.source.port() == 0 {
            tracing::error!(peer = %data.source, "connector delivered a frame with a zero source port");
            return;
        }

        let core = self.core.clone();
        self.executor.spawn(Box::new(move || core.handle_frame(data)));
    }
}
