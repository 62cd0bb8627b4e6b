//! # Identity Acquisition
//!
//! Everything needed to turn an account credential into a provider-issued identity
//! token for delegated chain forging.
//!
//! ## Components
//! - **Device**: device classes and the P-256 request-signing proof key
//! - **OAuth**: refresh-token / authorization-code exchange, credential providers
//! - **Cache**: persistent identity-token cache shared by every session
//! - **Xbox**: the user/device/title/XSTS exchange ([`IdentityAcquirer`])

pub mod cache;
pub mod device;
pub mod oauth;
pub mod xbox;

pub use cache::{IdentityToken, TokenCache};
pub use device::{DeviceDescriptor, DeviceKey, DeviceKind};
pub use oauth::{Account, CredentialProvider, OAuthClient, StaticCredential, TokenGrant};
pub use xbox::IdentityAcquirer;

use crate::error::IdentityError;
use reqwest::StatusCode;

/// Map a non-success provider status to the identity error taxonomy.
pub(crate) fn status_error(status: StatusCode, step: &str) -> IdentityError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            IdentityError::Unauthenticated(format!("{step} rejected with HTTP {status}"))
        }
        _ => IdentityError::NetworkFailure(format!("{step} failed with HTTP {status}")),
    }
}
