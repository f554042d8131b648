//! `ReliabilityLayer` (bottom): CON retransmission with
//! exponential backoff, piggyback-vs-separate response bookkeeping. Applies
//! only to the UDP matcher variant — a `Stack` built for a TCP endpoint
//! still carries this layer, but every hook becomes a pass-through because
//! no message it sees is ever Confirmable over a reliable stream.
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use crate::config::CoapConfig;
use crate::endpoint::executor::TaskExecutor;
use crate::error::Result;
use crate::exchange::{CompletionReason, Exchange, Origin, ReliabilityState};
use crate::message::{EmptyMessage, MessageType, Request, Response};
use crate::time::Clock;

use super::{Layer, Next};

fn random_unit() -> f64 {
    let raw = RandomState::new().build_hasher().finish();
    (raw >> 11) as f64 / (1u64 << 53) as f64
}

/// What a single retransmission tick decided, computed on the background
/// waiting thread but only ever acted on inside a job posted to the
/// protocol-stage executor.
enum RetransmitOutcome {
    Resend,
    TimedOut { attempts: u8 },
    AlreadySettled,
}

pub struct ReliabilityLayer {
    config: CoapConfig,
    clock: Arc<dyn Clock>,
    executor: parking_lot::Mutex<Option<Arc<dyn TaskExecutor>>>,
}

impl ReliabilityLayer {
    pub fn new(config: CoapConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            executor: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the executor state mutation and resend/timeout callbacks must
    /// run on. Set once, at `Endpoint::start`.
    pub fn set_executor(&self, executor: Arc<dyn TaskExecutor>) {
        *self.executor.lock() = Some(executor);
    }

    /// Spawns the retransmission wait loop for one outbound CON. `resend`
    /// is called with the exact bytes last written to the connector, and
    /// `on_timeout` once retransmissions are exhausted; the caller (Outbox)
    /// is responsible for serialization since this layer never sees wire
    /// bytes. Returns immediately. The spawned thread only sleeps and reads
    /// completion state — every mutation of `exchange` and every callback
    /// invocation runs inside a job posted to the protocol-stage executor,
    /// never on this background thread directly.
    pub fn start_retransmission(
        &self,
        exchange: Arc<Exchange>,
        raw: Vec<u8>,
        resend: impl Fn(&[u8]) + Send + Sync + 'static,
        on_timeout: impl Fn(&Arc<Exchange>, u8) + Send + Sync + 'static,
    ) {
        let clock = self.clock.clone();
        let config = self.config.clone();
        let Some(executor) = self.executor.lock().clone() else {
            tracing::warn!("retransmission armed with no executor installed; dropping timer");
            return;
        };
        let resend = Arc::new(resend);
        let on_timeout = Arc::new(on_timeout);

        std::thread::spawn(move || loop {
            let timeout = exchange.with_reliability_state(|state| state.as_ref().map(|s| s.next_timeout));
            let Some(timeout) = timeout else { break };

            clock.sleep_for(timeout);

            if exchange.is_canceled() || exchange.is_completed() {
                break;
            }

            let (result_tx, result_rx) = std::sync::mpsc::channel();
            let job_exchange = exchange.clone();
            let job_raw = raw.clone();
            let job_resend = resend.clone();
            let job_on_timeout = on_timeout.clone();
            let max_retransmit = config.max_retransmit;
            executor.spawn(Box::new(move || {
                let outcome = fire_retransmission(&job_exchange, max_retransmit);
                match &outcome {
                    RetransmitOutcome::Resend => job_resend(&job_raw),
                    RetransmitOutcome::TimedOut { attempts } => {
                        if !job_exchange.is_completed() {
                            job_exchange.complete(CompletionReason::Timeout);
                        }
                        job_on_timeout(&job_exchange, *attempts);
                    }
                    RetransmitOutcome::AlreadySettled => {}
                }
                let _ = result_tx.send(outcome);
            }));

            match result_rx.recv() {
                Ok(RetransmitOutcome::Resend) => continue,
                Ok(RetransmitOutcome::TimedOut { .. }) | Ok(RetransmitOutcome::AlreadySettled) | Err(_) => break,
            }
        });
    }

    fn arm(&self, exchange: &Arc<Exchange>) {
        let timeout = self.config.retransmit_timeout(0, random_unit());
        exchange.with_reliability_state(|state| {
            *state = Some(ReliabilityState {
                retransmit_count: 0,
                next_timeout: timeout,
                last_sent_bytes: Vec::new(),
            });
        });
    }

    fn disarm(&self, exchange: &Arc<Exchange>) {
        exchange.with_reliability_state(|state| *state = None);
    }

    fn ack_already_sent(&self, exchange: &Arc<Exchange>) -> bool {
        exchange.with_reliability_state(|state| state.as_ref().map(|s| !s.last_sent_bytes.is_empty()).unwrap_or(false))
    }

    fn mark_ack_sent(&self, exchange: &Arc<Exchange>) {
        exchange.with_reliability_state(|state| {
            if state.is_none() {
                *state = Some(ReliabilityState {
                    retransmit_count: 0,
                    next_timeout: self.config.ack_timeout,
                    last_sent_bytes: Vec::new(),
                });
            }
            if let Some(s) = state {
                s.last_sent_bytes = vec![1];
            }
        });
    }
}

/// The actual state mutation for one retransmission tick: bump the
/// counter and back off, or detect exhaustion. Runs inside the
/// protocol-stage executor job, never on the timer's waiting thread.
fn fire_retransmission(exchange: &Arc<Exchange>, max_retransmit: u8) -> RetransmitOutcome {
    if exchange.is_canceled() || exchange.is_completed() {
        return RetransmitOutcome::AlreadySettled;
    }
    exchange.with_reliability_state(|state| {
        let Some(s) = state else {
            return RetransmitOutcome::AlreadySettled;
        };
        if s.retransmit_count >= max_retransmit {
            return RetransmitOutcome::TimedOut { attempts: s.retransmit_count };
        }
        s.retransmit_count += 1;
        s.next_timeout *= 2;
        RetransmitOutcome::Resend
    })
}

impl Layer for ReliabilityLayer {
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request, next: &Next<'_>) -> Result<()> {
        if request.is_confirmable() {
            self.arm(exchange);
        }
        next.send_request(exchange, request)
    }

    /// Decides piggyback vs. separate response for a remotely-originated
    /// exchange. The first
    /// response sent for a still-unacknowledged inbound CON rides in the
    /// ACK; any response after that goes out as its own message.
    fn send_response(&self, exchange: &Arc<Exchange>, response: Response, next: &Next<'_>) -> Result<()> {
        let request_is_confirmable = exchange.request().map(|r| r.is_confirmable()).unwrap_or(false);
        let piggyback = exchange.origin == Origin::Remote && request_is_confirmable && !self.ack_already_sent(exchange);

        let response = if piggyback {
            let mid = exchange.request().map(|r| r.message.mid).unwrap_or(response.message.mid);
            self.mark_ack_sent(exchange);
            let mut piggybacked = response;
            piggybacked.message.mtype = MessageType::Acknowledgement;
            piggybacked.message.mid = mid;
            piggybacked
        } else {
            response
        };

        next.send_response(exchange, response)
    }

    fn send_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage, next: &Next<'_>) -> Result<()> {
        if message.is_ack() {
            self.mark_ack_sent(exchange);
        }
        next.send_empty(exchange, message)
    }

    fn receive_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage, next: &Next<'_>) -> Result<()> {
        if message.is_ack() || message.is_reset() {
            self.disarm(exchange);
            if !exchange.is_completed() {
                exchange.complete(CompletionReason::Answered);
            }
        }
        next.receive_empty(exchange, message)
    }
}
