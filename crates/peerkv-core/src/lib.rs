//! peerkv-core — shared types, wire format, configuration, and signatures.
//! All other peerkv crates depend on this one.

pub mod config;
pub mod crypto;
pub mod wire;

pub use crypto::{verify, KeyMaterial, SigningKey, TrustRoot};
pub use wire::{Command, PeerAddress, Request, Response, ValueRecord};
