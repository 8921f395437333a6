//! Client node: listener, registration, and the periodic fetch loop.
//!
//! Startup order matters. The listener is bound first so its port is known
//! before the client registers; peers may start querying as soon as the
//! server lists us.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use peerkv_core::config::{ClientConfig, TimeoutConfig};
use peerkv_core::wire::PeerAddress;
use peerkv_core::TrustRoot;

use crate::cache::LocalCache;
use crate::listener::PeerListener;
use crate::network::{KvNetwork, NetNetwork};
use crate::peer::PeerDirectory;
use crate::router::{Lookup, Router};

pub struct Client<N: ?Sized> {
    router: Arc<Router<N>>,
    listen_addr: SocketAddr,
    own: PeerAddress,
    listener_task: JoinHandle<()>,
}

impl Client<NetNetwork> {
    /// Start a client that talks to the configured server over real sockets.
    pub async fn connect(
        config: &ClientConfig,
        timeouts: &TimeoutConfig,
        trust_root: TrustRoot,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let network = NetNetwork::new(
            config.server_host.as_str(),
            config.server_port,
            &trust_root,
            timeouts.clone(),
        )
        .context("failed to set up server channel")?;
        Self::start(config, timeouts, Arc::new(network), trust_root, shutdown).await
    }
}

impl<N: KvNetwork + ?Sized> Client<N> {
    /// Bind the peer listener, register it with the server, and pull the
    /// initial peer list.
    pub async fn start(
        config: &ClientConfig,
        timeouts: &TimeoutConfig,
        network: Arc<N>,
        trust_root: TrustRoot,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let cache = LocalCache::new(config.cache_timeout());
        let directory = PeerDirectory::new();

        let host = if config.listen_host.is_empty() {
            "0.0.0.0"
        } else {
            config.listen_host.as_str()
        };
        let listener = PeerListener::bind(
            (host, config.listen_port),
            cache.clone(),
            directory.clone(),
            timeouts.io(),
        )
        .await?;
        let listen_addr = listener.local_addr()?;

        let listener_task = tokio::spawn(async move {
            if let Err(e) = listener.run(shutdown).await {
                tracing::error!(error = %e, "peer listener failed");
            }
        });

        let own = match network.register(listen_addr.port()).await {
            Ok(own) => own,
            Err(e) => {
                listener_task.abort();
                return Err(e).context("failed to register with server");
            }
        };
        directory.set_own_address(own).await;

        let router = Arc::new(Router::new(network, cache, directory, trust_root));
        let peers = router.get_peers().await;
        tracing::info!(own = %own, listen = %listen_addr, peers = peers.len(), "client started");

        Ok(Self {
            router,
            listen_addr,
            own,
            listener_task,
        })
    }

    pub fn router(&self) -> &Arc<Router<N>> {
        &self.router
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The address the server has on its roster for us.
    pub fn own_address(&self) -> PeerAddress {
        self.own
    }

    pub async fn get_key(&self, key: &str) -> Option<Vec<u8>> {
        self.router.get_key(key).await
    }

    pub async fn get_peers(&self) -> Vec<PeerAddress> {
        self.router.get_peers().await
    }

    /// Fetch every key in `keys` once per `interval`, refreshing the peer
    /// list on every `refresh_every`-th round, until shutdown.
    pub async fn fetch_loop(
        &self,
        keys: &[String],
        interval: Duration,
        refresh_every: u32,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        let mut round: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(rounds = round, "fetch loop stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    round += 1;
                    if refresh_every > 0 && round % u64::from(refresh_every) == 0 {
                        let peers = self.get_peers().await;
                        tracing::debug!(peers = peers.len(), "peer list refreshed");
                    }
                    for key in keys {
                        log_lookup(key, &self.router.lookup(key).await);
                    }
                }
            }
        }
    }
}

fn log_lookup(key: &str, lookup: &Lookup) {
    match lookup {
        Lookup::Peer { peer, value } => {
            tracing::info!(key, peer = %peer, value = %String::from_utf8_lossy(value), "value (peer)");
        }
        Lookup::Server { value } => {
            tracing::info!(key, value = %String::from_utf8_lossy(value), "value (server)");
        }
        Lookup::NotFound => tracing::info!(key, "value not found"),
    }
}

impl<N: ?Sized> Drop for Client<N> {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}
