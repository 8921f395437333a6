//! Peer directory: the client's cached copy of the server's roster.
//!
//! The copy is pulled, never pushed, so it may be stale. A failed pull
//! leaves the previous list in place. The directory also remembers the
//! address this client registered under so that it never picks itself.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use peerkv_core::wire::{PeerAddress, Request};

use crate::network::KvNetwork;

#[derive(Debug, Default)]
struct DirectoryState {
    peers: Vec<PeerAddress>,
    own: Option<PeerAddress>,
}

/// Shared handle to the directory. Clones share state.
#[derive(Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<RwLock<DirectoryState>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_own_address(&self, own: PeerAddress) {
        self.inner.write().await.own = Some(own);
    }

    pub async fn own_address(&self) -> Option<PeerAddress> {
        self.inner.read().await.own
    }

    /// The list as last pulled, self included.
    pub async fn snapshot(&self) -> Vec<PeerAddress> {
        self.inner.read().await.peers.clone()
    }

    /// Replace the list wholesale. Duplicates are dropped.
    pub async fn replace(&self, mut peers: Vec<PeerAddress>) {
        peers.sort();
        peers.dedup();
        self.inner.write().await.peers = peers;
    }

    /// Uniformly random peer other than ourselves, or `None` if there is none.
    pub async fn random_peer(&self) -> Option<PeerAddress> {
        let candidates: Vec<PeerAddress> = {
            let state = self.inner.read().await;
            state
                .peers
                .iter()
                .copied()
                .filter(|p| Some(*p) != state.own)
                .collect()
        };
        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Pull the roster from the server.
    ///
    /// Returns the list now in effect: the fresh roster on success, the
    /// previous list on any failure.
    pub async fn refresh<N: KvNetwork + ?Sized>(&self, network: &N) -> Vec<PeerAddress> {
        match network.server_request(Request::get_peer_list()).await {
            Ok(response) => match response.into_peers() {
                Some(peers) => {
                    tracing::debug!(peers = peers.len(), "peer list refreshed");
                    self.replace(peers).await;
                }
                None => tracing::warn!("server refused peer list request, keeping stale list"),
            },
            Err(e) => {
                tracing::warn!(error = %e, "peer list refresh failed, keeping stale list");
            }
        }
        self.snapshot().await
    }
}
