//! The protocol stack: an ordered, bidirectional pipeline
//! of layers between the `MessageDeliverer` (top) and the `Outbox` (bottom).
//!
//! Modeled as a chain of trait objects rather than an inheritance hierarchy
//! of abstract base layers: each [`Layer`] implements six
//! symmetric hooks, and which direction a call traverses is a property of
//! *which list of remaining layers* a [`Next`] handle was built from, not a
//! field any layer carries.
pub mod blockwise;
pub mod observe;
pub mod reliability;

use std::sync::Arc;

use crate::error::Result;
use crate::exchange::Exchange;
use crate::message::{EmptyMessage, Request, Response};

pub use blockwise::BlockwiseLayer;
pub use observe::ObserveLayer;
pub use reliability::ReliabilityLayer;

/// One protocol-stack layer. Default method bodies simply forward to `next`,
/// so an implementor only overrides the hooks it actually changes behavior
/// for, letting most implementors override one or two of several symmetric
/// methods.
pub trait Layer: Send + Sync {
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request, next: &Next<'_>) -> Result<()> {
        next.send_request(exchange, request)
    }

    fn send_response(&self, exchange: &Arc<Exchange>, response: Response, next: &Next<'_>) -> Result<()> {
        next.send_response(exchange, response)
    }

    fn send_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage, next: &Next<'_>) -> Result<()> {
        next.send_empty(exchange, message)
    }

    fn receive_request(&self, exchange: &Arc<Exchange>, request: Request, next: &Next<'_>) -> Result<()> {
        next.receive_request(exchange, request)
    }

    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response, next: &Next<'_>) -> Result<()> {
        next.receive_response(exchange, response)
    }

    fn receive_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage, next: &Next<'_>) -> Result<()> {
        next.receive_empty(exchange, message)
    }
}

/// The chain's endpoints: above the topmost layer (deliverer side) or below
/// the bottommost layer (outbox side), depending on which direction a call
/// is traversing.
pub trait Terminal: Send + Sync {
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request) -> Result<()>;
    fn send_response(&self, exchange: &Arc<Exchange>, response: Response) -> Result<()>;
    fn send_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage) -> Result<()>;
    fn receive_request(&self, exchange: &Arc<Exchange>, request: Request) -> Result<()>;
    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response) -> Result<()>;
    fn receive_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage) -> Result<()>;
}

/// A continuation: the remaining layers for this traversal plus the
/// terminal to call once they're exhausted. Constructed fresh per call, so
/// nothing about direction is stored on the layers themselves.
pub struct Next<'a> {
    layers: &'a [Arc<dyn Layer>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    fn rest(&self) -> Next<'a> {
        Next {
            layers: &self.layers[1..],
            terminal: self.terminal,
        }
    }

    pub fn send_request(&self, exchange: &Arc<Exchange>, request: Request) -> Result<()> {
        match self.layers.first() {
            Some(layer) => layer.send_request(exchange, request, &self.rest()),
            None => self.terminal.send_request(exchange, request),
        }
    }

    pub fn send_response(&self, exchange: &Arc<Exchange>, response: Response) -> Result<()> {
        match self.layers.first() {
            Some(layer) => layer.send_response(exchange, response, &self.rest()),
            None => self.terminal.send_response(exchange, response),
        }
    }

    pub fn send_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage) -> Result<()> {
        match self.layers.first() {
            Some(layer) => layer.send_empty(exchange, message, &self.rest()),
            None => self.terminal.send_empty(exchange, message),
        }
    }

    pub fn receive_request(&self, exchange: &Arc<Exchange>, request: Request) -> Result<()> {
        match self.layers.first() {
            Some(layer) => layer.receive_request(exchange, request, &self.rest()),
            None => self.terminal.receive_request(exchange, request),
        }
    }

    pub fn receive_response(&self, exchange: &Arc<Exchange>, response: Response) -> Result<()> {
        match self.layers.first() {
            Some(layer) => layer.receive_response(exchange, response, &self.rest()),
            None => self.terminal.receive_response(exchange, response),
        }
    }

    pub fn receive_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage) -> Result<()> {
        match self.layers.first() {
            Some(layer) => layer.receive_empty(exchange, message, &self.rest()),
            None => self.terminal.receive_empty(exchange, message),
        }
    }
}

/// The fixed three-layer chain: Observe on top, Blockwise
/// in the middle, Reliability on the bottom. `send_order` is top-to-bottom;
/// `receive_order` is its reverse, precomputed once so traversal never
/// reallocates.
pub struct Stack {
    send_order: Vec<Arc<dyn Layer>>,
    receive_order: Vec<Arc<dyn Layer>>,
}

impl Stack {
    /// `observe` is taken as an already-shared `Arc` rather than by value so
    /// the endpoint can keep registering `NotificationListener`s on the same
    /// instance after it's buried inside the chain.
    pub fn new(observe: Arc<ObserveLayer>, blockwise: BlockwiseLayer, reliability: ReliabilityLayer) -> Self {
        let send_order: Vec<Arc<dyn Layer>> = vec![observe, Arc::new(blockwise), Arc::new(reliability)];
        let receive_order: Vec<Arc<dyn Layer>> = send_order.iter().rev().cloned().collect();
        Self {
            send_order,
            receive_order,
        }
    }

    pub fn send_request(&self, exchange: &Arc<Exchange>, request: Request, terminal: &dyn Terminal) -> Result<()> {
        Next {
            layers: &self.send_order,
            terminal,
        }
        .send_request(exchange, request)
    }

    pub fn send_response(&self, exchange: &Arc<Exchange>, response: Response, terminal: &dyn Terminal) -> Result<()> {
        Next {
            layers: &self.send_order,
            terminal,
        }
        .send_response(exchange, response)
    }

    pub fn send_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage, terminal: &dyn Terminal) -> Result<()> {
        Next {
            layers: &self.send_order,
            terminal,
        }
        .send_empty(exchange, message)
    }

    pub fn receive_request(&self, exchange: &Arc<Exchange>, request: Request, terminal: &dyn Terminal) -> Result<()> {
        Next {
            layers: &self.receive_order,
            terminal,
        }
        .receive_request(exchange, request)
    }

    pub fn receive_response(&self, exchange: &Arc<Exchange>, response: Response, terminal: &dyn Terminal) -> Result<()> {
        Next {
            layers: &self.receive_order,
            terminal,
        }
        .receive_response(exchange, response)
    }

    pub fn receive_empty(&self, exchange: &Arc<Exchange>, message: EmptyMessage, terminal: &dyn Terminal) -> Result<()> {
        Next {
            layers: &self.receive_order,
            terminal,
        }
        .receive_empty(exchange, message)
    }
}
