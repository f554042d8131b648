//! `ExchangeStore`: the `KeyMid`/`KeyToken`/`KeyUri` tables plus the
//! eviction wheel. `DashMap` gives per-bucket locking
//! so concurrent sends/receives for distinct exchanges do not contend.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::CoapConfig;
use crate::message::{Mid, Token};
use crate::time::Clock;

use super::{Exchange, Origin, RegisteredKey};

type KeyMid = (Mid, SocketAddr);
type KeyToken = (Token, SocketAddr);
type KeyUri = (String, Token);

/// Returned when a registration would violate an exchange-store invariant
///. The matcher turns this into the caller-
/// facing `CoapError::DuplicateToken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCollision;

/// The table trio plus the exchange-lifetime expiration wheel. One instance
/// per `Endpoint`; the matcher holds an `Arc` to it.
pub struct ExchangeStore {
    clock: Arc<dyn Clock>,
    exchange_lifetime: Duration,
    by_mid: DashMap<KeyMid, Arc<Exchange>>,
    by_token: DashMap<KeyToken, Arc<Exchange>>,
    by_uri: DashMap<KeyUri, Arc<Exchange>>,
    next_id: AtomicU64,
}

impl ExchangeStore {
    pub fn new(clock: Arc<dyn Clock>, config: &CoapConfig) -> Self {
        Self {
            clock,
            exchange_lifetime: config.exchange_lifetime,
            by_mid: DashMap::new(),
            by_token: DashMap::new(),
            by_uri: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates a fresh, not-yet-registered exchange. The caller (matcher)
    /// registers whichever keys apply and records them on the exchange via
    /// [`Exchange::record_key`].
    pub fn create(&self, origin: Origin, remote_addr: SocketAddr) -> Arc<Exchange> {
        Arc::new(Exchange::new(self.next_id(), origin, remote_addr, self.clock.now()))
    }

    /// Idempotent: re-registering the same exchange under the same key is a
    /// no-op success. Registering a *different* exchange under a live key
    /// is a collision ("at most one live Exchange
    /// per KeyMID").
    pub fn register_mid(&self, mid: Mid, addr: SocketAddr, exchange: &Arc<Exchange>) -> Result<(), KeyCollision> {
        let key = (mid, addr);
        match self.by_mid.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) if existing.get().id != exchange.id => {
                Err(KeyCollision)
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(exchange.clone());
                exchange.record_key(RegisteredKey::Mid(mid, addr));
                Ok(())
            }
        }
    }

    pub fn lookup_mid(&self, mid: Mid, addr: SocketAddr) -> Option<Arc<Exchange>> {
        self.by_mid.get(&(mid, addr)).map(|r| r.clone())
    }

    pub fn register_token(&self, token: Token, addr: SocketAddr, exchange: &Arc<Exchange>) -> Result<(), KeyCollision> {
        let key = (token.clone(), addr);
        match self.by_token.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) if existing.get().id != exchange.id => {
                Err(KeyCollision)
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(exchange.clone());
                exchange.record_key(RegisteredKey::Token(token, addr));
                Ok(())
            }
        }
    }

    pub fn lookup_token(&self, token: &Token, addr: SocketAddr) -> Option<Arc<Exchange>> {
        self.by_token.get(&(token.clone(), addr)).map(|r| r.clone())
    }

    pub fn register_uri(&self, uri: String, token: Token, exchange: &Arc<Exchange>) -> Result<(), KeyCollision> {
        let key = (uri.clone(), token.clone());
        match self.by_uri.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) if existing.get().id != exchange.id => {
                Err(KeyCollision)
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(exchange.clone());
                exchange.record_key(RegisteredKey::Uri(uri, token));
                Ok(())
            }
        }
    }

    pub fn lookup_uri(&self, uri: &str, token: &Token) -> Option<Arc<Exchange>> {
        self.by_uri.get(&(uri.to_string(), token.clone())).map(|r| r.clone())
    }

    /// Removes every key the exchange currently has registered. Called on
    /// cancellation, completion, and eviction.
    pub fn remove_exchange(&self, exchange: &Exchange) {
        for key in exchange.take_registered_keys() {
            match key {
                RegisteredKey::Mid(mid, addr) => {
                    self.by_mid.remove(&(mid, addr));
                }
                RegisteredKey::Token(token, addr) => {
                    self.by_token.remove(&(token, addr));
                }
                RegisteredKey::Uri(uri, token) => {
                    self.by_uri.remove(&(uri, token));
                }
            }
        }
    }

    /// One pass of the expiration wheel: evicts exchanges whose
    /// `exchange_lifetime` has elapsed, except those with a live observe
    /// relation, which are exempt from token-table eviction per §4.3.
    /// Intended to be invoked periodically from the protocol stage.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let expired: Vec<Arc<Exchange>> = self
            .by_token
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|exchange| !exchange.is_observing())
            .filter(|exchange| now.duration_since(exchange.created_at) >= self.exchange_lifetime)
            .collect();

        for exchange in expired {
            exchange.complete(super::CompletionReason::Evicted);
            self.remove_exchange(&exchange);
        }
    }

    pub fn len(&self) -> (usize, usize, usize) {
        (self.by_mid.len(), self.by_token.len(), self.by_uri.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683)
    }

    fn store_with_clock() -> (ExchangeStore, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let config = CoapConfig::default();
        let store = ExchangeStore::new(clock.clone(), &config);
        (store, clock)
    }

    #[test]
    fn duplicate_mid_registration_from_same_exchange_is_idempotent() {
        let (store, _clock) = store_with_clock();
        let exchange = store.create(Origin::Local, addr());
        assert!(store.register_mid(Mid(1), addr(), &exchange).is_ok());
        assert!(store.register_mid(Mid(1), addr(), &exchange).is_ok());
    }

    #[test]
    fn mid_registration_from_a_different_exchange_collides() {
        let (store, _clock) = store_with_clock();
        let a = store.create(Origin::Local, addr());
        let b = store.create(Origin::Local, addr());
        store.register_mid(Mid(1), addr(), &a).unwrap();
        assert_eq!(store.register_mid(Mid(1), addr(), &b), Err(KeyCollision));
    }

    #[test]
    fn sweep_evicts_past_lifetime_but_spares_observers() {
        let clock = Arc::new(MockClock::new());
        let config = CoapConfig::default().with_exchange_lifetime(Duration::from_secs(10));
        let store = ExchangeStore::new(clock.clone(), &config);

        let observed = store.create(Origin::Local, addr());
        store.register_token(Token(vec![1]), addr(), &observed).unwrap();
        observed.set_observe_relation(super::super::ObserveRelation::new());

        let plain = store.create(Origin::Local, addr());
        store.register_token(Token(vec![2]), addr(), &plain).unwrap();

        clock.advance(Duration::from_secs(11));
        store.sweep();

        assert!(store.lookup_token(&Token(vec![1]), addr()).is_some());
        assert!(store.lookup_token(&Token(vec![2]), addr()).is_none());
    }
}
