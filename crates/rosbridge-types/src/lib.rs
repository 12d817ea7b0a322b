//! `rosbridge-types` – error, capability and connection-state types shared by
//! the rosbridge crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A capability the registry checks at registration time.
///
/// Decoding and delivery are required by the binding traits themselves, so
/// only the metadata a binding reports can be missing at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Topic (or service) name accessor.
    Topic,
    /// Protocol type name accessor, e.g. `"std_msgs/Bool"`.
    MessageType,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Topic => write!(f, "topic"),
            Capability::MessageType => write!(f, "message type"),
        }
    }
}

/// Lifecycle of a bridge connection.
///
/// `Idle → Connecting → Open → Closing → Closed`.  A failed open goes
/// straight from `Connecting` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    /// Decode the `repr(u8)` form; unknown values map to `Closed`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Error type shared by every rosbridge crate.
///
/// Only the configuration variants (`InvalidBinding`, `DuplicateBinding`)
/// and lifecycle misuse (`AlreadyConnected`) ever reach host code directly.
/// Transport and protocol failures on the network thread are logged instead.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("invalid binding for '{topic}': missing {capability} capability")]
    InvalidBinding { topic: String, capability: Capability },

    #[error("a binding is already registered for topic '{topic}'")]
    DuplicateBinding { topic: String },

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("failed to decode message on '{topic}': {reason}")]
    Decode { topic: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}
