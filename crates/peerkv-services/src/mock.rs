//! In-memory [`KvNetwork`] for unit tests.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use peerkv_core::wire::{PeerAddress, Request, Response};

use crate::network::{KvNetwork, TransportError};
use crate::registry::ServerRegistry;

pub fn addr(port: u16) -> PeerAddress {
    PeerAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn refused(peer: impl ToString) -> TransportError {
    TransportError::Connect {
        addr: peer.to_string(),
        source: io::Error::from(io::ErrorKind::ConnectionRefused),
    }
}

/// Peers answer with a canned response; the server is a real registry
/// that can be switched off.
pub struct MockNetwork {
    pub registry: ServerRegistry,
    peers: Mutex<HashMap<PeerAddress, Response>>,
    server_down: Mutex<bool>,
    pub peer_calls: AtomicUsize,
    pub server_calls: AtomicUsize,
}

impl MockNetwork {
    pub fn new(registry: ServerRegistry) -> Self {
        Self {
            registry,
            peers: Mutex::new(HashMap::new()),
            server_down: Mutex::new(false),
            peer_calls: AtomicUsize::new(0),
            server_calls: AtomicUsize::new(0),
        }
    }

    pub fn answer_as(&self, peer: PeerAddress, response: Response) {
        self.peers.lock().unwrap().insert(peer, response);
    }

    pub fn set_server_down(&self, down: bool) {
        *self.server_down.lock().unwrap() = down;
    }

    pub fn peer_calls(&self) -> usize {
        self.peer_calls.load(Ordering::SeqCst)
    }

    pub fn server_calls(&self) -> usize {
        self.server_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvNetwork for MockNetwork {
    async fn peer_request(
        &self,
        peer: PeerAddress,
        _request: Request,
    ) -> Result<Response, TransportError> {
        self.peer_calls.fetch_add(1, Ordering::SeqCst);
        self.peers
            .lock()
            .unwrap()
            .get(&peer)
            .cloned()
            .ok_or_else(|| refused(peer))
    }

    async fn server_request(&self, request: Request) -> Result<Response, TransportError> {
        self.server_calls.fetch_add(1, Ordering::SeqCst);
        if *self.server_down.lock().unwrap() {
            return Err(refused("server"));
        }
        Ok(self.registry.handle(&request))
    }

    async fn register(&self, listen_port: u16) -> Result<PeerAddress, TransportError> {
        let own = addr(listen_port);
        match self.server_request(Request::register(own)).await? {
            r if r.success => Ok(own),
            _ => Err(TransportError::Refused("register".into())),
        }
    }
}

