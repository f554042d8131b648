//! Endpoint configuration.
//!
//! A flat struct rather than a scoped key/value/source system
//! (see DESIGN.md, Open Question 4) — every field here is one of the
//! exhaustive configuration keys, with RFC 7252
//! defaults. Construction is always in-process; loading from a file or
//! environment is explicitly out of this crate's scope.
use std::time::Duration;

/// Tuning knobs for a [`crate::endpoint::Endpoint`] and the layers/matcher it
/// owns.
#[derive(Clone, Debug, PartialEq)]
pub struct CoapConfig {
    pub ack_timeout: Duration,
    pub ack_random_factor: f64,
    pub max_retransmit: u8,
    pub nstart: u32,
    pub exchange_lifetime: Duration,
    pub non_lifetime: Duration,
    pub max_message_size: usize,
    pub preferred_block_size: u16,
    pub max_resource_body_size: usize,
    pub notification_check_interval: Duration,
    pub notification_reregistration_backoff: Duration,
    pub token_size_limit: usize,
    pub network_stage_receiver_threads: usize,
    pub network_stage_sender_threads: usize,
    pub udp_connector_receive_buffer: usize,
    pub udp_connector_send_buffer: usize,
    pub udp_connector_datagram_size: usize,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            nstart: 1,
            exchange_lifetime: Duration::from_secs(247),
            non_lifetime: Duration::from_secs(145),
            max_message_size: 1152,
            preferred_block_size: 1024,
            max_resource_body_size: 8 * 1024 * 1024,
            notification_check_interval: Duration::from_secs(24 * 60 * 60),
            notification_reregistration_backoff: Duration::from_secs(2),
            token_size_limit: 8,
            network_stage_receiver_threads: 1,
            network_stage_sender_threads: 1,
            udp_connector_receive_buffer: 65536,
            udp_connector_send_buffer: 65536,
            udp_connector_datagram_size: 1280,
        }
    }
}

impl CoapConfig {
    /// Builder-style override, consuming `self`, following the common
    /// `with_*` idiom.
    pub fn with_ack_timeout(mut self, value: Duration) -> Self {
        self.ack_timeout = value;
        self
    }

    pub fn with_max_retransmit(mut self, value: u8) -> Self {
        self.max_retransmit = value;
        self
    }

    pub fn with_exchange_lifetime(mut self, value: Duration) -> Self {
        self.exchange_lifetime = value;
        self
    }

    pub fn with_preferred_block_size(mut self, value: u16) -> Self {
        self.preferred_block_size = value;
        self
    }

    pub fn with_max_resource_body_size(mut self, value: usize) -> Self {
        self.max_resource_body_size = value;
        self
    }

    /// Upper bound for a single retransmission backoff: `ACK_TIMEOUT *
    /// ACK_RANDOM_FACTOR * 2^retry`, used by [`crate::stack::reliability`].
    pub fn retransmit_timeout(&self, retry: u32, jitter: f64) -> Duration {
        let factor = 1.0 + jitter * (self.ack_random_factor - 1.0);
        let base = self.ack_timeout.as_secs_f64() * factor;
        Duration::from_secs_f64(base * 2f64.powi(retry as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc7252() {
        let cfg = CoapConfig::default();
        assert_eq!(cfg.ack_timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_retransmit, 4);
        assert_eq!(cfg.nstart, 1);
        assert_eq!(cfg.exchange_lifetime, Duration::from_secs(247));
        assert_eq!(cfg.non_lifetime, Duration::from_secs(145));
    }

    #[test]
    fn retransmit_timeout_doubles_each_retry() {
        let cfg = CoapConfig::default();
        let t0 = cfg.retransmit_timeout(0, 0.0);
        let t1 = cfg.retransmit_timeout(1, 0.0);
        let t2 = cfg.retransmit_timeout(2, 0.0);
        assert_eq!(t1, t0 * 2);
        assert_eq!(t2, t0 * 4);
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = CoapConfig::default()
            .with_max_retransmit(2)
            .with_ack_timeout(Duration::from_millis(500));
        assert_eq!(cfg.max_retransmit, 2);
        assert_eq!(cfg.ack_timeout, Duration::from_millis(500));
    }
}
