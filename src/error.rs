//! # Error Types
//!
//! Error handling for the relay core.
//!
//! Every fallible stage of a relay session has its own error type so callers can
//! tell a rejected account apart from a malformed server challenge. All of them
//! fold into [`RelayError`] through `#[from]` conversions.
//!
//! ## Error Categories
//! - **Token Errors**: signed-token and public-key parsing/signing failures
//! - **Forge Errors**: certificate chain construction failures (session fatal)
//! - **Handshake Errors**: malformed challenges, key agreement failures (session fatal)
//! - **Identity Errors**: identity-provider failures, including the
//!   human-actionable [`IdentityError::GamertagRequired`]
//! - **Configuration / I/O Errors**
//!
//! ## Example Usage
//! ```rust
//! use bedrock_relay::error::{IdentityError, RelayError};
//! use tracing::{error, warn};
//!
//! fn report(err: &RelayError) {
//!     match err {
//!         RelayError::Identity(IdentityError::GamertagRequired { resume_url }) => {
//!             warn!(%resume_url, "Account needs provider-side registration")
//!         }
//!         other => error!(error = %other, "Relay session failed"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants for recurring failure paths.
pub mod constants {
    /// Token parsing
    pub const ERR_TOKEN_SEGMENTS: &str = "Signed token must have three segments";
    pub const ERR_TOKEN_BASE64: &str = "Signed token segment is not valid base64";
    pub const ERR_TOKEN_JSON: &str = "Signed token segment is not a JSON object";
    pub const ERR_MISSING_X5U: &str = "Signed token header has no x5u claim";
    pub const ERR_PUBLIC_KEY: &str = "Public key is not a valid P-384 SubjectPublicKeyInfo";

    /// Chain forging
    pub const ERR_EMPTY_CHAIN: &str = "Chain endpoint returned an empty chain";
    pub const ERR_CHAIN_STATUS: &str = "Chain endpoint returned a non-success status";
    pub const ERR_NO_IDENTITY: &str = "Delegated mode requires an account credential";

    /// Handshake
    pub const ERR_MISSING_SALT: &str = "Server handshake payload has no salt claim";
    pub const ERR_NO_STORED_LOGIN: &str = "No login message stored for forwarding";

    /// Session
    pub const ERR_SESSION_CANCELLED: &str = "Relay session was torn down";
    pub const ERR_LOGIN_FAILED: &str = "Login failed";
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption handshake failed";

    /// Identity provider
    pub const ERR_MISSING_SESSION_ID: &str = "SISU authenticate response has no session id";
    pub const ERR_MISSING_DEVICE_ID: &str = "Device token has no xdi.did claim";
    pub const ERR_MISSING_UHS: &str = "Token response has no xui.uhs claim";
}

/// Failures while encoding, decoding or verifying signed tokens and keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(&'static str),

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signature verification failed")]
    BadSignature,
}

/// Failures while building the forged certificate chain. Always fatal for the session.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Malformed chain response: {0}")]
    MalformedChain(String),

    #[error("Chain request failed: {0}")]
    Transport(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Identity acquisition failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    MissingIdentity(&'static str),
}

/// Failures while processing the server's handshake challenge. Always fatal for the session.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("{0}")]
    MissingLogin(&'static str),
}

/// Failures reported by the identity-provider flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The provider rejected the account credential; the account must be re-authenticated.
    #[error("Credential rejected: {0}")]
    Unauthenticated(String),

    /// Transport-level failure; not retried by the acquirer.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The account lacks a gamertag. The operator has to open `resume_url`.
    #[error("Have you registered a gamertag? You can register it here: {resume_url}")]
    GamertagRequired { resume_url: String },

    /// The provider answered with a body that violates its contract.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// The owning relay session was torn down while the acquisition was in flight.
    #[error("Acquisition cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IdentityError::MalformedResponse(err.to_string())
        } else {
            IdentityError::NetworkFailure(err.to_string())
        }
    }
}

// RelayError is the umbrella error for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
