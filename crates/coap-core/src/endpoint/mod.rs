//! `Endpoint`: lifecycle, executor binding, interceptor fan-out, inbox/outbox
//! wiring. Ties every other module in this crate together
//! into the one object an application constructs.
pub mod executor;
pub mod inbox;
pub mod interceptor;
pub mod outbox;

pub use executor::{SingleThreadExecutor, TaskExecutor};
pub use inbox::Inbox;
pub use interceptor::{EndpointObserver, MessageInterceptor, SnapshotList};
pub use outbox::Outbox;

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{DataParser, DataSerializer};
use crate::config::CoapConfig;
use crate::connector::{Connector, RawDataReceiver};
use crate::deliverer::{ClientDeliverer, MessageDeliverer};
use crate::error::{CoapError, Result};
use crate::exchange::store::ExchangeStore;
use crate::exchange::Exchange;
use crate::matcher::Matcher;
use crate::message::{EmptyMessage, Request, Response, Scheme, Token};
use crate::observation::{InMemoryObservationStore, ObservationStore};
use crate::stack::observe::NotificationListener;
use crate::stack::{BlockwiseLayer, ObserveLayer, ReliabilityLayer, Stack, Terminal};
use crate::time::{Clock, SystemClock};

/// CREATED → STARTED → STOPPED (→STARTED permitted) →
/// DESTROYED (terminal).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    Started,
    Stopped,
    Destroyed,
}

/// Closes the receive direction of the stack onto the installed
/// `MessageDeliverer`. The mirror image of [`Outbox`]: that one is the
/// bottom terminal on send, this one is the top terminal on receive. Never
/// the same object, since each only implements half of `Terminal`
/// meaningfully.
struct DelivererBridge {
    deliverer: Arc<dyn MessageDeliverer>,
}

impl Terminal for DelivererBridge {
    fn send_request(&self, _exchange: &Arc<Exchange>, _request: Request) -> Result<()> {
        unreachable!("DelivererBridge is the receive-direction terminal; the stack never calls send hooks on it")
    }

    fn send_response(&self, _exchange: &Arc<Exchange>, _response: Response) -> Result<()> {
        unreachable!("DelivererBridge is the receive-direction terminal; the stack never calls send hooks on it")
    }

    fn send_empty(&self, _exchange: &Arc<Exchange>, _message: EmptyMessage) -> Result<()> {
        unreachable!("DelivererBridge is the receive-direction terminal; the stack never calls send hooks on it")
    }

    fn receive_request(&self, exchange: &Arc<Exchange>, request: Request) -> Result<()> {
        self.deliverer.deliver_request(exchange, request);
        Ok(())
    }

    /// Reaching this terminal means reassembly (if any) is done — unlike
    /// `ReliabilityLayer`, which runs before `BlockwiseLayer` on the receive
    /// path and so never sees whether a block2 response is the final one.
    /// The request's CON retransmission, if still armed, stops here.
    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response) -> Result<()> {
        exchange.with_reliability_state(|state| *state = None);
        if !exchange.is_completed() {
            exchange.complete(crate::exchange::CompletionReason::Answered);
        }
        self.deliverer.deliver_response(exchange, response);
        Ok(())
    }

    /// A bare ACK/RST that survives to the top of the chain carries nothing
    /// for the deliverer to see.
    fn receive_empty(&self, _exchange: &Arc<Exchange>, _message: EmptyMessage) -> Result<()> {
        Ok(())
    }
}

pub struct Endpoint {
    scheme: Scheme,
    matcher: Arc<Matcher>,
    stack: Arc<Stack>,
    observe_layer: Arc<ObserveLayer>,
    outbox: Arc<Outbox>,
    connector: Arc<dyn Connector>,
    parser: Arc<dyn DataParser>,
    interceptors: Arc<SnapshotList<dyn MessageInterceptor>>,
    observers: Arc<SnapshotList<dyn EndpointObserver>>,
    executor: Mutex<Option<Arc<dyn TaskExecutor>>>,
    owned_executor: Mutex<Option<Arc<SingleThreadExecutor>>>,
    deliverer: Mutex<Option<Arc<dyn MessageDeliverer>>>,
    client_deliverer: Arc<ClientDeliverer>,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    pub fn new(
        config: CoapConfig,
        connector: Arc<dyn Connector>,
        serializer: Arc<dyn DataSerializer>,
        parser: Arc<dyn DataParser>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let is_tcp = connector.is_scheme_supported(Scheme::CoapTcp) || connector.is_scheme_supported(Scheme::CoapsTcp);
        let is_secure = connector.is_scheme_supported(Scheme::Coaps) || connector.is_scheme_supported(Scheme::CoapsTcp);
        let scheme = Scheme::resolve(is_secure, is_tcp);

        let store = Arc::new(ExchangeStore::new(clock.clone(), &config));
        let matcher = Arc::new(if is_tcp {
            Matcher::tcp(store, config.token_size_limit)
        } else {
            Matcher::udp(store, config.token_size_limit)
        });

        let observation_store: Arc<dyn ObservationStore> = Arc::new(InMemoryObservationStore::default());
        let observe_layer = Arc::new(ObserveLayer::new(observation_store, clock.clone()));
        let stack = Arc::new(Stack::new(
            observe_layer.clone(),
            BlockwiseLayer::new(config.clone()),
            ReliabilityLayer::new(config.clone(), clock.clone()),
        ));

        let interceptors = Arc::new(SnapshotList::new());
        let observers = Arc::new(SnapshotList::new());
        let outbox = Arc::new(Outbox::new(
            matcher.clone(),
            serializer,
            connector.clone(),
            interceptors.clone(),
            observers.clone(),
            Arc::new(ReliabilityLayer::new(config, clock)),
        ));

        Self {
            scheme,
            matcher,
            stack,
            observe_layer,
            outbox,
            connector,
            parser,
            interceptors,
            observers,
            executor: Mutex::new(None),
            owned_executor: Mutex::new(None),
            deliverer: Mutex::new(None),
            client_deliverer: Arc::new(ClientDeliverer::new()),
            state: Mutex::new(EndpointState::Created),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock()
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn MessageInterceptor>) {
        self.interceptors.add(interceptor);
    }

    pub fn add_observer(&self, observer: Arc<dyn EndpointObserver>) {
        self.observers.add(observer);
    }

    pub fn add_notification_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.observe_layer.add_listener(listener);
    }

    /// Rejected while started (/// replacement is forbidden rather than silently shutting down the
    /// previous executor).
    pub fn set_executor(&self, executor: Arc<dyn TaskExecutor>) -> Result<()> {
        if *self.state.lock() == EndpointState::Started {
            return Err(CoapError::InvalidState("cannot replace the executor while the endpoint is started".to_string()));
        }
        *self.executor.lock() = Some(executor);
        *self.owned_executor.lock() = None;
        Ok(())
    }

    pub fn set_deliverer(&self, deliverer: Arc<dyn MessageDeliverer>) {
        *self.deliverer.lock() = Some(deliverer);
    }

    fn current_executor(&self) -> Arc<dyn TaskExecutor> {
        self.executor
            .lock()
            .clone()
            .expect("endpoint must be started before protocol-stage work is submitted")
    }

    /// install default deliverer if none;
    /// install default executor if none; mark started; start connector;
    /// notify observers; force executor thread creation with a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == EndpointState::Started {
            return Ok(());
        }

        {
            let mut deliverer = self.deliverer.lock();
            if deliverer.is_none() {
                *deliverer = Some(self.client_deliverer.clone() as Arc<dyn MessageDeliverer>);
            }
        }

        {
            let mut executor = self.executor.lock();
            if executor.is_none() {
                let single = Arc::new(SingleThreadExecutor::new());
                *self.owned_executor.lock() = Some(single.clone());
                *executor = Some(single);
            }
        }

        let deliverer = self.deliverer.lock().clone().expect("just installed above");
        let bridge: Arc<dyn Terminal> = Arc::new(DelivererBridge { deliverer: deliverer.clone() });
        let executor = self.executor.lock().clone().expect("just installed above");
        self.outbox.set_executor(executor.clone());
        self.outbox.set_deliverer(deliverer);
        let outbox_terminal: Arc<dyn Terminal> = self.outbox.clone();
        let inbox = Arc::new(Inbox::new(
            self.parser.clone(),
            self.matcher.clone(),
            self.stack.clone(),
            bridge,
            outbox_terminal,
            executor.clone(),
        ));

        if let Err(err) = self.connector.start() {
            let _ = self.connector.stop();
            *state = EndpointState::Stopped;
            return Err(err);
        }
        self.connector.set_raw_data_receiver(inbox as Arc<dyn RawDataReceiver>);

        *state = EndpointState::Started;
        drop(state);

        for observer in self.observers.snapshot().iter() {
            observer.started();
        }

        // Forces the executor's worker thread to exist even if nothing else
        // is submitted yet, so the process doesn't exit thinking only
        // daemon threads remain.
        executor.spawn(Box::new(|| {}));

        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, EndpointState::Stopped | EndpointState::Created) {
            return Ok(());
        }

        self.connector.stop()?;
        *state = EndpointState::Stopped;
        drop(state);

        for observer in self.observers.snapshot().iter() {
            observer.stopped();
        }
        Ok(())
    }

    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == EndpointState::Destroyed {
            return Ok(());
        }

        self.connector.destroy()?;
        if let Some(owned) = self.owned_executor.lock().take() {
            owned.shutdown();
        }

        *state = EndpointState::Destroyed;
        drop(state);

        for observer in self.observers.snapshot().iter() {
            observer.destroyed();
        }
        Ok(())
    }

    /// Always posted to the protocol stage, then handed to the stack top
    ///. The exchange itself is allocated synchronously —
    /// cheap bookkeeping against an atomic counter, not a mutation of any
    /// shared matcher table — so the caller gets a handle back immediately;
    /// the traversal that registers it with the matcher runs on the
    /// protocol stage.
    pub fn send_request(&self, request: Request) -> Result<Arc<Exchange>> {
        if *self.state.lock() != EndpointState::Started {
            return Err(CoapError::InvalidState("endpoint is not started".to_string()));
        }
        let destination = request
            .destination
            .ok_or_else(|| CoapError::InvalidArgument("request has no destination".to_string()))?;

        let exchange = self.matcher.create_local_exchange(destination);
        let stack = self.stack.clone();
        let outbox = self.outbox.clone();
        let task_exchange = exchange.clone();
        self.current_executor().spawn(Box::new(move || {
            if let Err(err) = stack.send_request(&task_exchange, request, outbox.as_ref()) {
                tracing::warn!(error = %err, "protocol-stage error sending request");
            }
        }));

        Ok(exchange)
    }

    /// If `exchange.custom_executor` is set, posted to the protocol stage;
    /// otherwise run synchronously on the caller's thread.
    pub fn send_response(&self, exchange: Arc<Exchange>, response: Response) -> Result<()> {
        if exchange.custom_executor {
            let stack = self.stack.clone();
            let outbox = self.outbox.clone();
            self.current_executor().spawn(Box::new(move || {
                if let Err(err) = stack.send_response(&exchange, response, outbox.as_ref()) {
                    tracing::warn!(error = %err, "protocol-stage error sending response");
                }
            }));
            Ok(())
        } else {
            self.stack.send_response(&exchange, response, self.outbox.as_ref())
        }
    }

    /// Always synchronous on the caller's thread, preserving ordering with
    /// explicit accept/reject calls from handlers.
    pub fn send_empty_message(&self, exchange: &Arc<Exchange>, message: EmptyMessage) -> Result<()> {
        self.stack.send_empty(exchange, message, self.outbox.as_ref())
    }

    pub fn cancel_observation(&self, token: &Token, peer: SocketAddr) {
        self.matcher.cancel_observation(token, peer);
    }
}
