//! # Relay Protocol
//!
//! Login interception and the upstream key agreement.
//!
//! ## Components
//! - **Packet**: the subset of game messages the relay inspects
//! - **Chain**: login chain forging, self-signed or delegated
//! - **Handshake**: the per-session state machine
//! - **Pipeline**: ordered interceptors with first-handler-wins dispatch
//!
//! ## Handshake States
//! ```text
//! Idle → LoginIntercepted → AwaitingCompressionSettings → LoginForwarded
//!      → AwaitingServerHandshake → EncryptionEstablished
//!                 (any state) → Failed
//! ```

pub mod chain;
pub mod handshake;
pub mod packet;
pub mod pipeline;

pub use chain::{ChainForger, DelegatedIdentity, ForgedLogin};
pub use handshake::{HandshakeCoordinator, HandshakeState};
pub use packet::{AuthType, Direction, DisconnectMessage, LoginMessage, RelayPacket};
pub use pipeline::{Interceptor, OnClose, PacketPipeline};
