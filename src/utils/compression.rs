//! Compression negotiation for the upstream link.
//!
//! The server announces a threshold and an algorithm in its network settings. The relay
//! applies them to the outbound link before forwarding the login; the codec that actually
//! deflates frames lives in the transport.

use serde::{Deserialize, Serialize};

/// Compression algorithms a server may announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    Zlib,
    Snappy,
    None,
}

impl CompressionAlgorithm {
    /// Wire identifier used in network settings messages.
    pub fn wire_id(self) -> u16 {
        match self {
            CompressionAlgorithm::Zlib => 0,
            CompressionAlgorithm::Snappy => 1,
            CompressionAlgorithm::None => 0xFFFF,
        }
    }

    /// Resolve a wire identifier; unknown identifiers yield `None` (the Option).
    pub fn from_wire_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(CompressionAlgorithm::Zlib),
            1 => Some(CompressionAlgorithm::Snappy),
            0xFFFF => Some(CompressionAlgorithm::None),
            _ => None,
        }
    }
}

/// Compression state agreed for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    /// Payloads shorter than this many bytes are sent uncompressed.
    pub threshold: u16,
    pub algorithm: CompressionAlgorithm,
}

impl CompressionSettings {
    /// Settings before any negotiation took place.
    pub const DISABLED: CompressionSettings = CompressionSettings {
        threshold: 0,
        algorithm: CompressionAlgorithm::None,
    };

    /// Settings resulting from a server's announcement. A zero threshold disables compression
    /// regardless of the announced algorithm.
    pub fn negotiated(threshold: u16, algorithm: CompressionAlgorithm) -> Self {
        if threshold > 0 {
            Self {
                threshold,
                algorithm,
            }
        } else {
            Self::DISABLED
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }

    /// Whether a payload of `len` bytes should go through the compressor.
    pub fn should_compress(&self, len: usize) -> bool {
        self.is_enabled() && len >= self.threshold as usize
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self::DISABLED
    }
}
