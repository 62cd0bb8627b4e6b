//! # Relay Service
//!
//! Wiring between the transport, the packet pipeline and the identity layer.
//!
//! ## Components
//! - **Relay**: long-lived owner of the token cache, identity acquirer and metrics
//! - **Session**: one connection's pipeline and link, processed sequentially
//!
//! ## Example
//! ```rust,no_run
//! use bedrock_relay::config::RelayConfig;
//! use bedrock_relay::service::Relay;
//! use bedrock_relay::transport::ChannelLink;
//!
//! # fn main() -> bedrock_relay::error::Result<()> {
//! let relay = Relay::new(RelayConfig::default())?;
//! let (link, _events) = ChannelLink::new();
//! let session = relay.open_session(Box::new(link))?;
//! # drop(session);
//! # Ok(())
//! # }
//! ```

pub mod relay;
pub mod session;

pub use relay::Relay;
pub use session::RelaySession;
