//! Server registry: the authoritative key/value store and the peer roster.
//!
//! Both maps are shared between the accept loop and any writer task that
//! calls `set_key`. Each operation is a single DashMap/DashSet call, so a
//! reader sees either the old record or the new one, never a value paired
//! with another value's signature.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use peerkv_core::crypto::{CryptoError, SigningKey};
use peerkv_core::wire::{Command, PeerAddress, Request, Response, ValueRecord};

/// Canonical store plus roster. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ServerRegistry {
    db: Arc<DashMap<String, ValueRecord>>,
    roster: Arc<DashSet<PeerAddress>>,
    signing_key: Arc<SigningKey>,
}

impl ServerRegistry {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            db: Arc::new(DashMap::new()),
            roster: Arc::new(DashSet::new()),
            signing_key: Arc::new(signing_key),
        }
    }

    /// Sign `value` and store it under `key`, replacing any previous record.
    ///
    /// The signature is computed before the map is touched so the shard
    /// lock is held only for the insert.
    pub fn set_key(
        &self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), CryptoError> {
        let key = key.into();
        let value = value.into();
        let signature = self.signing_key.sign(&value)?;
        tracing::debug!(key = %key, len = value.len(), "value set");
        self.db.insert(key, ValueRecord { value, signature });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<ValueRecord> {
        self.db.get(key).map(|r| r.value().clone())
    }

    /// Add a peer to the roster. Idempotent; there is no removal.
    pub fn register(&self, peer: PeerAddress) {
        if self.roster.insert(peer) {
            tracing::info!(peer = %peer, peers = self.roster.len(), "peer registered");
        }
    }

    /// Snapshot of the roster, in no particular order.
    pub fn get_peer_list(&self) -> Vec<PeerAddress> {
        self.roster.iter().map(|p| *p).collect()
    }

    /// Answer one request. Never fails: anything not understood is `(false, none)`.
    pub fn handle(&self, request: &Request) -> Response {
        match Command::try_from(request) {
            Ok(Command::Get(key)) => self
                .get(&key)
                .map(Response::record)
                .unwrap_or_else(Response::failure),
            Ok(Command::Register(peer)) => {
                self.register(peer);
                Response::ack()
            }
            Ok(Command::GetPeerList) => Response::peers(self.get_peer_list()),
            Err(e) => {
                tracing::debug!(error = %e, "rejecting request");
                Response::failure()
            }
        }
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.db.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.roster.len()
    }
}
