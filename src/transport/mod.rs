//! # Transport Boundary
//!
//! The relay core never touches sockets. A [`SessionLink`] is the per-session handle to
//! both legs of the connection (game client and upstream server) as provided by the
//! embedding transport.
//!
//! ## Implementations
//! - **Channel**: emits every operation as a [`channel::LinkEvent`] on a tokio mpsc
//!   channel; used to embed the core in another event loop and by the tests.

pub mod channel;

use crate::core::SessionKey;
use crate::error::Result;
use crate::protocol::packet::RelayPacket;
use crate::utils::compression::CompressionSettings;
use async_trait::async_trait;

pub use channel::{ChannelLink, LinkEvent};

/// Operations the relay core needs from the transport for one session.
#[async_trait]
pub trait SessionLink: Send {
    /// Open the upstream leg. Called once, after the client's login has been intercepted.
    async fn connect_upstream(&mut self) -> Result<()>;

    async fn send_to_server(&mut self, packet: RelayPacket) -> Result<()>;

    async fn send_to_client(&mut self, packet: RelayPacket) -> Result<()>;

    /// Apply negotiated compression to the upstream leg's outbound frames.
    fn set_upstream_compression(&mut self, settings: CompressionSettings);

    /// Switch the upstream leg to encrypted framing under `key`.
    fn enable_upstream_encryption(&mut self, key: SessionKey);

    /// Close both legs. Must tolerate repeated calls.
    async fn terminate(&mut self, reason: &str);
}
