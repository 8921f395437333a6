//! Authoritative server: TLS accept loop over the registry.
//!
//! Connections are served strictly one after another:
//! accept → handshake → read one request → answer → close.
//! The handshake is bounded by the connect timeout and the exchange by the
//! I/O timeout. A failed handshake or a malformed frame drops that
//! connection and the loop carries on.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use openssl::ssl::SslAcceptor;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use peerkv_core::config::TimeoutConfig;
use peerkv_core::wire::Request;
use peerkv_core::KeyMaterial;

use crate::framing::{read_message, write_message};
use crate::network::{bounded, TransportError};
use crate::registry::ServerRegistry;
use crate::tls;

pub struct KvServer {
    listener: TcpListener,
    acceptor: SslAcceptor,
    registry: ServerRegistry,
    timeouts: TimeoutConfig,
}

impl KvServer {
    pub async fn bind(
        addr: impl tokio::net::ToSocketAddrs,
        keys: &KeyMaterial,
        registry: ServerRegistry,
        timeouts: TimeoutConfig,
    ) -> Result<Self> {
        let acceptor = tls::acceptor(keys).context("failed to build TLS acceptor")?;
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind server socket")?;
        Ok(Self {
            listener,
            acceptor,
            registry,
            timeouts,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, keys = self.registry.len(), "server listening");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("server shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (tcp, remote) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = self.serve(tcp).await {
                        tracing::warn!(remote = %remote, error = %e, "connection dropped");
                    }
                }
            }
        }
    }

    async fn serve(&self, tcp: TcpStream) -> Result<(), TransportError> {
        let mut stream = bounded(
            "tls handshake",
            self.timeouts.connect(),
            tls::accept(&self.acceptor, tcp),
        )
        .await?;

        bounded("exchange", self.timeouts.io(), async {
            let Some(request) = read_message::<_, Request>(&mut stream).await? else {
                return Ok(());
            };
            tracing::debug!(command = %request.command, "request");
            let response = self.registry.handle(&request);
            write_message(&mut stream, &response).await?;
            let _ = stream.shutdown().await;
            Ok(())
        })
        .await
    }
}

/// Store each configured value in the registry.
pub fn seed(registry: &ServerRegistry, values: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in values {
        registry
            .set_key(key.as_str(), value.as_str())
            .with_context(|| format!("failed to sign seed value for {key:?}"))?;
    }
    if !values.is_empty() {
        tracing::info!(count = values.len(), "seeded initial values");
    }
    Ok(())
}

/// Overwrite `key` with an increasing counter every `period` until shutdown.
pub async fn tick_loop(
    registry: ServerRegistry,
    key: String,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut interval = tokio::time::interval(period);
    let mut counter: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = interval.tick() => {
                registry
                    .set_key(key.as_str(), counter.to_string())
                    .context("failed to sign tick value")?;
                tracing::trace!(key = %key, counter, "tick");
                counter += 1;
            }
        }
    }
}
