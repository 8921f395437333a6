//! peerkv wire format: the messages exchanged with the server and between peers.
//!
//! Every exchange is one request followed by one response on a fresh
//! connection. A request is a `(command, argument)` pair, a response is a
//! `(success, payload)` pair. The same vocabulary is spoken on the TLS
//! channel to the server and on the plain channel between peers; the peer
//! listener simply refuses `register`.
//!
//! On the stream each message is a frame: a little-endian u32 length
//! followed by that many bytes of bincode. Frames are bounded by
//! MAX_FRAME_LEN so a hostile length header cannot force a huge allocation.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ── Commands ──────────────────────────────────────────────────────────────────

/// Fetch the value record stored under a key.
pub const CMD_GET: &str = "get";

/// Add the caller's inbound listener to the server's peer roster.
pub const CMD_REGISTER: &str = "register";

/// Fetch the full peer roster (or a peer's cached copy of it).
pub const CMD_GET_PEER_LIST: &str = "get_peer_list";

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the frame length header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest frame body accepted from the wire.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ── Data model ────────────────────────────────────────────────────────────────

/// A value together with the server's signature over exactly those bytes.
///
/// The signature is produced once, when the server sets the key, and travels
/// with the value wherever it is relayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub value: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Address of one client's inbound peer listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// The argument half of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Argument {
    None,
    Key(String),
    Peer(PeerAddress),
}

/// A request as it appears on the wire.
///
/// `command` is kept as a free-form string so that unknown commands can be
/// decoded and answered with a failure instead of tearing down the
/// connection. Use [`Command::try_from`] to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    pub argument: Argument,
}

impl Request {
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            command: CMD_GET.to_string(),
            argument: Argument::Key(key.into()),
        }
    }

    pub fn register(peer: PeerAddress) -> Self {
        Self {
            command: CMD_REGISTER.to_string(),
            argument: Argument::Peer(peer),
        }
    }

    pub fn get_peer_list() -> Self {
        Self {
            command: CMD_GET_PEER_LIST.to_string(),
            argument: Argument::None,
        }
    }
}

/// A validated request. Command names are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Register(PeerAddress),
    GetPeerList,
}

impl TryFrom<&Request> for Command {
    type Error = WireError;

    fn try_from(req: &Request) -> Result<Self, Self::Error> {
        match (req.command.as_str(), &req.argument) {
            (CMD_GET, Argument::Key(key)) => Ok(Command::Get(key.clone())),
            (CMD_REGISTER, Argument::Peer(peer)) => Ok(Command::Register(*peer)),
            // The roster request takes no argument; anything sent along is ignored.
            (CMD_GET_PEER_LIST, _) => Ok(Command::GetPeerList),
            (CMD_GET, _) | (CMD_REGISTER, _) => {
                Err(WireError::BadArgument(req.command.clone()))
            }
            (other, _) => Err(WireError::UnknownCommand(other.to_string())),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// The payload half of a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Record(ValueRecord),
    Peers(Vec<PeerAddress>),
}

/// A `(success, payload)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub payload: Option<Payload>,
}

impl Response {
    /// `(false, none)`: not found, refused, or not understood.
    pub fn failure() -> Self {
        Self {
            success: false,
            payload: None,
        }
    }

    /// `(true, none)`: acknowledgment with nothing to return.
    pub fn ack() -> Self {
        Self {
            success: true,
            payload: None,
        }
    }

    pub fn record(record: ValueRecord) -> Self {
        Self {
            success: true,
            payload: Some(Payload::Record(record)),
        }
    }

    pub fn peers(peers: Vec<PeerAddress>) -> Self {
        Self {
            success: true,
            payload: Some(Payload::Peers(peers)),
        }
    }

    /// The record carried by a successful `get`, if any.
    pub fn into_record(self) -> Option<ValueRecord> {
        match (self.success, self.payload) {
            (true, Some(Payload::Record(record))) => Some(record),
            _ => None,
        }
    }

    /// The roster carried by a successful `get_peer_list`, if any.
    pub fn into_peers(self) -> Option<Vec<PeerAddress>> {
        match (self.success, self.payload) {
            (true, Some(Payload::Peers(peers))) => Some(peers),
            _ => None,
        }
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_LEN as u64)
}

/// Serialize a message body (without the length header).
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let body = codec().serialize(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    Ok(body)
}

/// Deserialize a message body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    Ok(codec().deserialize(body)?)
}

/// Serialize a message into a complete frame: length header followed by body.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let body = encode(msg)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Interpret a frame header, rejecting lengths above MAX_FRAME_LEN.
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, WireError> {
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok(len)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("malformed argument for command {0:?}")]
    BadArgument(String),

    #[error("frame length {0} exceeds maximum {}", MAX_FRAME_LEN)]
    FrameTooLarge(usize),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
