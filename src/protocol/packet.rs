//! Relay-level view of the game packets the core inspects.
//!
//! Only the messages the handshake touches are modelled; everything else passes through
//! as [`RelayPacket::Other`] with its payload untouched.

use crate::utils::compression::CompressionAlgorithm;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Who sent a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Game client → relay
    FromClient,
    /// Upstream server → relay
    FromServer,
}

/// How the upstream server should treat the login chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthType {
    /// One self-signed token, offline-mode servers
    #[default]
    SelfSigned,
    /// Provider-issued chain
    Full,
}

/// The client's login: certificate chain plus the client-data (skin) token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMessage {
    pub protocol_version: u32,
    pub chain: Vec<String>,
    pub auth_type: AuthType,
    /// Signed client data; `None` when the client sent none.
    pub client_jwt: Option<String>,
}

impl LoginMessage {
    pub fn new(protocol_version: u32, chain: Vec<String>, client_jwt: Option<String>) -> Self {
        Self {
            protocol_version,
            chain,
            auth_type: AuthType::default(),
            client_jwt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectMessage {
    pub reason: String,
    pub hide_screen: bool,
}

impl DisconnectMessage {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            hide_screen: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPacket {
    Login(LoginMessage),
    RequestNetworkSettings {
        protocol_version: u32,
    },
    NetworkSettings {
        compression_threshold: u16,
        compression_algorithm: CompressionAlgorithm,
    },
    /// Server challenge: a signed token whose header carries `x5u`, payload carries `salt`.
    ServerToClientHandshake {
        jwt: String,
    },
    ClientToServerHandshake,
    Disconnect(DisconnectMessage),
    /// Anything the relay core does not inspect.
    Other {
        id: u32,
        payload: Bytes,
    },
}

impl RelayPacket {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RelayPacket::Login(_) => "Login",
            RelayPacket::RequestNetworkSettings { .. } => "RequestNetworkSettings",
            RelayPacket::NetworkSettings { .. } => "NetworkSettings",
            RelayPacket::ServerToClientHandshake { .. } => "ServerToClientHandshake",
            RelayPacket::ClientToServerHandshake => "ClientToServerHandshake",
            RelayPacket::Disconnect(_) => "Disconnect",
            RelayPacket::Other { .. } => "Other",
        }
    }
}
