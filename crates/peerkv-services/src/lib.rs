//! peerkv-services — the server registry, the client's cache, directory and
//! router, and the socket loops that serve them.

pub mod cache;
pub mod client;
pub mod framing;
pub mod listener;
pub mod network;
pub mod peer;
pub mod registry;
pub mod router;
pub mod server;
pub mod tls;

#[cfg(test)]
mod mock;

pub use cache::{CacheEntry, LocalCache};
pub use client::Client;
pub use listener::PeerListener;
pub use network::{KvNetwork, NetNetwork, TransportError};
pub use peer::PeerDirectory;
pub use registry::ServerRegistry;
pub use router::{Fetch, Lookup, Router};
pub use server::KvServer;
