//! # Core Primitives
//!
//! Key material and signed tokens shared by the forging and handshake stages.
//!
//! ## Components
//! - **Keys**: per-session P-384 key pair, session key derivation
//! - **Jwt**: compact ES384 tokens with an `x5u` header
//!
//! ## Wire Format
//! ```text
//! base64url(header) "." base64url(payload) "." base64url(r || s)
//! ```

pub mod jwt;
pub mod keys;

pub use keys::{KeyMaterial, SessionKey};
