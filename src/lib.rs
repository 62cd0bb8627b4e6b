//! # Bedrock Relay
//!
//! Core of a transparent relay between a Bedrock game client and an upstream server.
//!
//! The relay intercepts the client's login, replaces its certificate chain with one bound
//! to a per-session key, and completes the upstream encryption handshake itself. In
//! delegated mode the chain is issued by the chain endpoint against an Xbox Live identity
//! token acquired (and cached) for a configured account.
//!
//! ## Modules
//! - [`core`]: session key material and signed tokens
//! - [`auth`]: OAuth, device signing, the Xbox Live flow and the token cache
//! - [`protocol`]: chain forging, the handshake state machine and the packet pipeline
//! - [`transport`]: the session link abstraction
//! - [`service`]: relay and session wiring
//! - [`config`], [`error`], [`utils`]: ambient configuration, errors, logging and metrics

pub mod auth;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use service::{Relay, RelaySession};
