//! Outbound transport: the TLS channel to the server and plain channels to peers.
//!
//! The router and the peer directory talk to the network only through
//! [`KvNetwork`], so they can be driven by an in-memory double in tests.
//! Every connect, handshake, write and read is bounded by a timeout; an
//! unreachable peer or server surfaces as a [`TransportError`] value, never
//! as a hang.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use openssl::error::ErrorStack;
use openssl::ssl::SslConnector;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use peerkv_core::config::TimeoutConfig;
use peerkv_core::wire::{PeerAddress, Request, Response, WireError};
use peerkv_core::TrustRoot;

use crate::framing::{read_message, write_message};
use crate::tls;

/// Request/response transport used by the client side.
#[async_trait]
pub trait KvNetwork: Send + Sync {
    /// One exchange with a peer's listener over an unauthenticated channel.
    async fn peer_request(
        &self,
        peer: PeerAddress,
        request: Request,
    ) -> Result<Response, TransportError>;

    /// One exchange with the server over the authenticated channel.
    async fn server_request(&self, request: Request) -> Result<Response, TransportError>;

    /// Register our listener port with the server.
    ///
    /// The IP half of the returned address is the local address of the
    /// server connection, i.e. the address the server sees us on.
    async fn register(&self, listen_port: u16) -> Result<PeerAddress, TransportError>;
}

/// [`KvNetwork`] over real sockets.
pub struct NetNetwork {
    server_host: String,
    server_port: u16,
    connector: SslConnector,
    timeouts: TimeoutConfig,
}

impl NetNetwork {
    pub fn new(
        server_host: impl Into<String>,
        server_port: u16,
        trust_root: &TrustRoot,
        timeouts: TimeoutConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            server_host: server_host.into(),
            server_port,
            connector: tls::connector(trust_root)?,
            timeouts,
        })
    }

    fn server_label(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    async fn connect_server(&self) -> Result<tokio_openssl::SslStream<TcpStream>, TransportError> {
        let label = self.server_label();
        let tcp = bounded("connect", self.timeouts.connect(), async {
            TcpStream::connect((self.server_host.as_str(), self.server_port))
                .await
                .map_err(|source| TransportError::Connect {
                    addr: label.clone(),
                    source,
                })
        })
        .await?;
        bounded(
            "tls handshake",
            self.timeouts.connect(),
            tls::connect(&self.connector, tcp),
        )
        .await
    }
}

#[async_trait]
impl KvNetwork for NetNetwork {
    async fn peer_request(
        &self,
        peer: PeerAddress,
        request: Request,
    ) -> Result<Response, TransportError> {
        let addr = peer.socket_addr();
        let mut stream = bounded("connect", self.timeouts.connect(), async {
            TcpStream::connect(addr)
                .await
                .map_err(|source| TransportError::Connect {
                    addr: addr.to_string(),
                    source,
                })
        })
        .await?;
        exchange(&mut stream, &request, self.timeouts.io()).await
    }

    async fn server_request(&self, request: Request) -> Result<Response, TransportError> {
        let mut stream = self.connect_server().await?;
        let response = exchange(&mut stream, &request, self.timeouts.io()).await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut stream).await;
        response
    }

    async fn register(&self, listen_port: u16) -> Result<PeerAddress, TransportError> {
        let mut stream = self.connect_server().await?;
        let local_ip = stream.get_ref().local_addr()?.ip();
        let own = PeerAddress::new(local_ip, listen_port);

        let response = exchange(&mut stream, &Request::register(own), self.timeouts.io()).await?;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut stream).await;
        if !response.success {
            return Err(TransportError::Refused("register".into()));
        }
        tracing::info!(own = %own, server = %self.server_label(), "registered with server");
        Ok(own)
    }
}

/// Write one request and read one response, bounded by `io_timeout`.
pub async fn exchange<S>(
    stream: &mut S,
    request: &Request,
    io_timeout: Duration,
) -> Result<Response, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    bounded("exchange", io_timeout, async {
        write_message(stream, request).await?;
        read_message(stream).await?.ok_or(TransportError::Closed)
    })
    .await
}

/// Apply a timeout to a fallible transport step.
pub async fn bounded<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| TransportError::Timeout { op, after })?
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("TLS setup failed: {0}")]
    TlsSetup(#[from] ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("connection closed before a response arrived")]
    Closed,

    #[error("server refused {0}")]
    Refused(String),
}

impl TransportError {
    /// The remote end could not be reached at all, as opposed to answering badly.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. } | TransportError::Timeout { op: "connect", .. }
        )
    }
}
