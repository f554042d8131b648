//! `ObservationStore`: the durable record of resources
//! this endpoint is observing. Pluggable so an embedder can back it with
//! persistent storage; an in-memory default covers the common case.
use dashmap::DashMap;

use crate::message::Token;

/// A durable record of one remote resource being observed. Survives
/// endpoint restarts only if the backing [`ObservationStore`] is
/// persistent — the in-memory default does not.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub token: Token,
    pub target_uri: String,
    pub last_sequence: Option<u32>,
    pub correlation_context: Option<Vec<u8>>,
}

impl Observation {
    pub fn new(token: Token, target_uri: String) -> Self {
        Self {
            token,
            target_uri,
            last_sequence: None,
            correlation_context: None,
        }
    }
}

/// Pluggable backing store for observations, keyed by token.
pub trait ObservationStore: Send + Sync {
    fn register(&self, observation: Observation);
    fn deregister(&self, token: &Token);
    fn get(&self, token: &Token) -> Option<Observation>;
    fn update_sequence(&self, token: &Token, sequence: u32);
}

/// Default in-memory store, one `DashMap` bucket per token.
#[derive(Default)]
pub struct InMemoryObservationStore {
    entries: DashMap<Token, Observation>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObservationStore for InMemoryObservationStore {
    fn register(&self, observation: Observation) {
        self.entries.insert(observation.token.clone(), observation);
    }

    fn deregister(&self, token: &Token) {
        self.entries.remove(token);
    }

    fn get(&self, token: &Token) -> Option<Observation> {
        self.entries.get(token).map(|r| r.clone())
    }

    fn update_sequence(&self, token: &Token, sequence: u32) {
        if let Some(mut entry) = self.entries.get_mut(token) {
            entry.last_sequence = Some(sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        let store = InMemoryObservationStore::new();
        let token = Token(vec![0x55]);
        store.register(Observation::new(token.clone(), "/temp".to_string()));
        assert!(store.get(&token).is_some());
        store.update_sequence(&token, 7);
        assert_eq!(store.get(&token).unwrap().last_sequence, Some(7));
    }

    #[test]
    fn deregister_removes_entry() {
        let store = InMemoryObservationStore::new();
        let token = Token(vec![0x56]);
        store.register(Observation::new(token.clone(), "/temp".to_string()));
        store.deregister(&token);
        assert!(store.get(&token).is_none());
    }
}
