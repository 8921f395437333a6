//! peerkv integration test harness.
//!
//! Every test starts its own TLS server and clients on 127.0.0.1 with
//! OS-assigned ports and freshly generated key material, so tests can run
//! in parallel without sharing anything.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use peerkv_core::config::{ClientConfig, TimeoutConfig};
use peerkv_core::{KeyMaterial, TrustRoot};
use peerkv_services::{Client, KvServer, NetNetwork, ServerRegistry};

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn timeouts() -> TimeoutConfig {
    TimeoutConfig {
        connect_timeout_ms: 1_000,
        io_timeout_ms: 1_000,
    }
}

/// A running server plus the shutdown channels for it and its clients.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: ServerRegistry,
    pub root: TrustRoot,
    server_shutdown: broadcast::Sender<()>,
    client_shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let keys = KeyMaterial::generate("peerkv-integration", 2048, 1)?;
        let root = keys.trust_root()?;
        let registry = ServerRegistry::new(keys.signing_key.clone());

        let server = KvServer::bind("127.0.0.1:0", &keys, registry.clone(), timeouts()).await?;
        let addr = server.local_addr()?;
        let (server_shutdown, rx) = broadcast::channel(1);
        let (client_shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(server.run(rx));

        Ok(Self {
            addr,
            registry,
            root,
            server_shutdown,
            client_shutdown,
            task: Some(task),
        })
    }

    pub fn client_config(&self, cache_timeout_secs: u64) -> ClientConfig {
        ClientConfig {
            server_host: self.addr.ip().to_string(),
            server_port: self.addr.port(),
            cache_timeout_secs,
            listen_host: "127.0.0.1".into(),
            ..ClientConfig::default()
        }
    }

    pub async fn client(&self) -> Result<Client<NetNetwork>> {
        Client::connect(
            &self.client_config(60),
            &timeouts(),
            self.root.clone(),
            self.client_shutdown.subscribe(),
        )
        .await
        .context("client failed to start")
    }

    /// Stop the accept loop and wait for it to exit. Clients keep running.
    pub async fn stop(&mut self) -> Result<()> {
        let _ = self.server_shutdown.send(());
        if let Some(task) = self.task.take() {
            task.await??;
        }
        Ok(())
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

mod directory;
mod failures;
mod forgery;
mod lookup;
