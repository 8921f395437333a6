//! Inbound peer listener. Answers other clients from the local cache.
//!
//! Plain TCP, one connection at a time, one request per connection. Each
//! exchange is bounded by the I/O timeout so a stalled peer cannot wedge
//! the loop, and a malformed frame only costs that one connection.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use peerkv_core::wire::{Command, Request, Response};

use crate::cache::LocalCache;
use crate::framing::{read_message, write_message};
use crate::network::{bounded, TransportError};
use crate::peer::PeerDirectory;

pub struct PeerListener {
    listener: TcpListener,
    cache: LocalCache,
    directory: PeerDirectory,
    io_timeout: Duration,
}

impl PeerListener {
    pub async fn bind(
        addr: impl tokio::net::ToSocketAddrs,
        cache: LocalCache,
        directory: PeerDirectory,
        io_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind peer listener")?;
        Ok(Self {
            listener,
            cache,
            directory,
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "peer listener started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("peer listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "peer accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = self.serve(stream).await {
                        tracing::warn!(remote = %remote, error = %e, "peer connection dropped");
                    }
                }
            }
        }
    }

    async fn serve(&self, mut stream: TcpStream) -> Result<(), TransportError> {
        bounded("exchange", self.io_timeout, async {
            let Some(request) = read_message::<_, Request>(&mut stream).await? else {
                return Ok(());
            };
            let response = self.handle(&request).await;
            write_message(&mut stream, &response).await
        })
        .await
    }

    /// Answer one peer request from local state.
    pub async fn handle(&self, request: &Request) -> Response {
        match Command::try_from(request) {
            Ok(Command::Get(key)) => match self.cache.lookup(&key) {
                Some(record) => {
                    tracing::debug!(key = %key, "cache hit for peer");
                    Response::record(record)
                }
                None => Response::failure(),
            },
            Ok(Command::GetPeerList) => Response::peers(self.directory.snapshot().await),
            Ok(Command::Register(_)) => {
                tracing::debug!("register sent to a peer, refusing");
                Response::failure()
            }
            Err(e) => {
                tracing::debug!(error = %e, "rejecting peer request");
                Response::failure()
            }
        }
    }
}
