//! `coap-core`: the endpoint pipeline for a CoAP (RFC 7252) transport
//! binding — protocol stack, matcher, and I/O boundary — independent of any
//! particular socket implementation or resource tree.
//!
//! A connector (owning the socket) and a `MessageDeliverer` (owning the
//! resource tree or client call sites) are supplied by the caller; this
//! crate wires them together through [`endpoint::Endpoint`].
pub mod codec;
pub mod config;
pub mod connector;
pub mod deliverer;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod matcher;
pub mod message;
pub mod observability;
pub mod observation;
pub mod stack;
pub mod test_support;
pub mod time;

pub use config::CoapConfig;
pub use endpoint::{Endpoint, EndpointState};
pub use error::{CoapError, ErrorCategory, Result};
