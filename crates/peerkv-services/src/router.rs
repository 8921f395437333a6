//! Request router. Resolves a key through a random peer, then the server.
//!
//! A value relayed by a peer is accepted only if its signature verifies
//! against the pinned trust root. Anything else (no peers, peer down, peer
//! miss, forged signature) falls through to one request on the
//! authenticated server channel, whose answer is trusted as-is. At most one
//! peer is tried per lookup.
//!
//! Every outcome is a value. Transport errors are logged and folded into
//! [`Fetch::Unreachable`]; nothing propagates out of [`Router::get_key`].

use std::sync::Arc;

use peerkv_core::wire::{PeerAddress, Request, ValueRecord};
use peerkv_core::{verify, TrustRoot};

use crate::cache::LocalCache;
use crate::network::KvNetwork;
use crate::peer::PeerDirectory;

/// Result of asking one source for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    Found(ValueRecord),
    NotFound,
    Unreachable,
    /// A peer answered, but the signature did not verify.
    Rejected,
}

/// Where a lookup was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Peer { peer: PeerAddress, value: Vec<u8> },
    Server { value: Vec<u8> },
    NotFound,
}

impl Lookup {
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Lookup::Peer { value, .. } | Lookup::Server { value } => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Lookup::Peer { value, .. } | Lookup::Server { value } => Some(value),
            Lookup::NotFound => None,
        }
    }
}

pub struct Router<N: ?Sized> {
    network: Arc<N>,
    cache: LocalCache,
    directory: PeerDirectory,
    trust_root: TrustRoot,
}

impl<N: KvNetwork + ?Sized> Router<N> {
    pub fn new(
        network: Arc<N>,
        cache: LocalCache,
        directory: PeerDirectory,
        trust_root: TrustRoot,
    ) -> Self {
        Self {
            network,
            cache,
            directory,
            trust_root,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    /// Resolve `key` to its value, or `None` if neither tier produced one.
    pub async fn get_key(&self, key: &str) -> Option<Vec<u8>> {
        self.lookup(key).await.into_value()
    }

    /// Resolve `key`, reporting which tier answered.
    pub async fn lookup(&self, key: &str) -> Lookup {
        if let Some(peer) = self.directory.random_peer().await {
            match self.fetch_from_peer(peer, key).await {
                Fetch::Found(record) => {
                    tracing::debug!(key, peer = %peer, "served by peer");
                    let value = record.value.clone();
                    self.cache.record_from_peer(key, record);
                    return Lookup::Peer { peer, value };
                }
                Fetch::Rejected => {
                    tracing::warn!(key, peer = %peer, "peer value failed verification, falling back to server");
                }
                Fetch::NotFound | Fetch::Unreachable => {
                    tracing::debug!(key, peer = %peer, "peer miss, falling back to server");
                }
            }
        }

        match self.fetch_from_server(key).await {
            Fetch::Found(record) => {
                tracing::debug!(key, "served by server");
                let value = record.value.clone();
                self.cache.record_from_server(key, record);
                Lookup::Server { value }
            }
            _ => {
                tracing::info!(key, "key not found");
                Lookup::NotFound
            }
        }
    }

    /// Ask one peer for `key` and authenticate the answer.
    pub async fn fetch_from_peer(&self, peer: PeerAddress, key: &str) -> Fetch {
        let response = match self.network.peer_request(peer, Request::get(key)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "peer request failed");
                return Fetch::Unreachable;
            }
        };
        match response.into_record() {
            Some(record) if verify(&self.trust_root, &record.signature, &record.value) => {
                Fetch::Found(record)
            }
            Some(_) => Fetch::Rejected,
            None => Fetch::NotFound,
        }
    }

    /// Ask the server for `key` over the authenticated channel.
    pub async fn fetch_from_server(&self, key: &str) -> Fetch {
        match self.network.server_request(Request::get(key)).await {
            Ok(response) => response.into_record().map_or(Fetch::NotFound, Fetch::Found),
            Err(e) => {
                tracing::warn!(key, error = %e, "server request failed");
                Fetch::Unreachable
            }
        }
    }

    /// Refresh the peer directory from the server; see [`PeerDirectory::refresh`].
    pub async fn get_peers(&self) -> Vec<PeerAddress> {
        self.directory.refresh(self.network.as_ref()).await
    }
}
