//! Identity-provider device classes and the device proof key.
//!
//! Xbox Live binds device, title and SISU tokens to a P-256 "proof key". Requests to those
//! endpoints carry a `Signature` header computed over the method, path, authorization
//! header and body, prefixed with a policy version and a Windows FILETIME timestamp.

use crate::core::keys::SEGMENT_BASE64;
use crate::error::IdentityError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Signature policy version understood by the provider.
const SIGNATURE_POLICY_VERSION: u32 = 1;

/// Bodies longer than this are truncated before signing.
const MAX_SIGNED_BODY: usize = 8192;

/// A device class the relay can impersonate toward the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Identity-provider application (client) id.
    pub app_id: &'static str,
    /// Device-type tag, also the key of cache entries.
    pub device_type: &'static str,
    /// Whether a title token can be requested directly; `false` forces the SISU flow.
    pub allow_direct_title_token: bool,
    /// Redirect URI registered for the SISU flow.
    pub xal_redirect: &'static str,
}

impl DeviceDescriptor {
    pub const ANDROID: DeviceDescriptor = DeviceDescriptor {
        app_id: "0000000048183522",
        device_type: "Android",
        allow_direct_title_token: false,
        xal_redirect: "ms-xal-0000000048183522://auth",
    };

    pub const IOS: DeviceDescriptor = DeviceDescriptor {
        app_id: "000000004c17c01a",
        device_type: "iOS",
        allow_direct_title_token: false,
        xal_redirect: "ms-xal-000000004c17c01a://auth",
    };

    pub const NINTENDO: DeviceDescriptor = DeviceDescriptor {
        app_id: "00000000441cc96b",
        device_type: "Nintendo",
        allow_direct_title_token: true,
        xal_redirect: "",
    };

    pub const ALL: [DeviceDescriptor; 3] = [Self::ANDROID, Self::IOS, Self::NINTENDO];

    /// Whether the two-step SISU exchange is mandatory for this device.
    pub fn requires_sisu(&self) -> bool {
        !self.allow_direct_title_token
    }
}

/// Device kind as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Android,
    Ios,
    Nintendo,
}

impl DeviceKind {
    pub fn descriptor(self) -> DeviceDescriptor {
        match self {
            DeviceKind::Android => DeviceDescriptor::ANDROID,
            DeviceKind::Ios => DeviceDescriptor::IOS,
            DeviceKind::Nintendo => DeviceDescriptor::NINTENDO,
        }
    }
}

/// P-256 proof key the device, title and SISU tokens are bound to.
pub struct DeviceKey {
    signing: SigningKey,
    /// Stable per key; sent as the device `Id`.
    id: uuid::Uuid,
}

impl DeviceKey {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(signing: SigningKey) -> Self {
        Self {
            signing,
            id: uuid::Uuid::new_v4(),
        }
    }

    /// Device identifier in the braced form the provider expects.
    pub fn device_id(&self) -> String {
        format!("{{{}}}", self.id.hyphenated())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// The public half as a JWK.
    pub fn proof_key(&self) -> Value {
        let point = self.signing.verifying_key().to_encoded_point(false);
        let x = point.x().map(|x| SEGMENT_BASE64.encode(x)).unwrap_or_default();
        let y = point.y().map(|y| SEGMENT_BASE64.encode(y)).unwrap_or_default();

        json!({
            "kty": "EC",
            "x": x,
            "y": y,
            "crv": "P-256",
            "alg": "ES256",
            "use": "sig",
        })
    }

    /// Compute the `Signature` header value for a request.
    ///
    /// `path_and_query` is the request path including its query string; `authorization`
    /// is the `Authorization` header value, empty when the request has none.
    pub fn sign(
        &self,
        method: &str,
        path_and_query: &str,
        authorization: &str,
        body: &[u8],
        filetime: u64,
    ) -> Result<String, IdentityError> {
        let body = &body[..body.len().min(MAX_SIGNED_BODY)];

        let mut message = Vec::with_capacity(
            4 + 1 + 8 + 1 + method.len() + path_and_query.len() + authorization.len() + body.len() + 4,
        );
        message.extend_from_slice(&SIGNATURE_POLICY_VERSION.to_be_bytes());
        message.push(0);
        message.extend_from_slice(&filetime.to_be_bytes());
        message.push(0);
        for part in [method.as_bytes(), path_and_query.as_bytes(), authorization.as_bytes(), body] {
            message.extend_from_slice(part);
            message.push(0);
        }

        // ES256: the signer hashes with SHA-256.
        let signature: Signature = self
            .signing
            .try_sign(&message)
            .map_err(|e| IdentityError::MalformedResponse(format!("device signing failed: {e}")))?;

        let mut header = Vec::with_capacity(4 + 8 + 64);
        header.extend_from_slice(&SIGNATURE_POLICY_VERSION.to_be_bytes());
        header.extend_from_slice(&filetime.to_be_bytes());
        header.extend_from_slice(&signature.to_bytes());
        Ok(STANDARD.encode(header))
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Escape a signature header for embedding in a query string. Only `+` and `=` occur in
/// standard base64 output besides `/`, which the provider accepts unescaped.
pub fn escape_signature(signature: &str) -> String {
    signature.replace('+', "%2B").replace('=', "%3D")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    fn fixed_key() -> DeviceKey {
        DeviceKey::from_signing_key(SigningKey::from_slice(&[7u8; 32]).unwrap())
    }

    #[test]
    fn test_signature_header_layout() {
        let key = fixed_key();
        let filetime = 133_000_000_000_000_000;
        let header = key.sign("POST", "/device/authenticate", "", b"{}", filetime).unwrap();

        let raw = STANDARD.decode(&header).unwrap();
        assert_eq!(raw.len(), 4 + 8 + 64);
        assert_eq!(&raw[..4], &1u32.to_be_bytes());
        assert_eq!(&raw[4..12], &filetime.to_be_bytes());

        let mut message = Vec::new();
        message.extend_from_slice(&1u32.to_be_bytes());
        message.push(0);
        message.extend_from_slice(&filetime.to_be_bytes());
        message.push(0);
        message.extend_from_slice(b"POST\0/device/authenticate\0\0{}\0");

        let signature = Signature::from_slice(&raw[12..]).unwrap();
        let verifying = VerifyingKey::from(key.signing_key());
        assert!(verifying.verify(&message, &signature).is_ok());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let key = fixed_key();
        let a = key.sign("POST", "/proxy?sessionid=abc", "", b"", 42).unwrap();
        let b = key.sign("POST", "/proxy?sessionid=abc", "", b"", 42).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, key.sign("POST", "/proxy?sessionid=abd", "", b"", 42).unwrap());
    }

    #[test]
    fn test_escape_signature() {
        assert_eq!(escape_signature("ab+c/d=="), "ab%2Bc/d%3D%3D");
    }

    #[test]
    fn test_proof_key_shape() {
        let jwk = fixed_key().proof_key();
        assert_eq!(jwk["crv"], "P-256");
        assert_eq!(jwk["x"].as_str().unwrap().len(), 43);
        assert_eq!(jwk["y"].as_str().unwrap().len(), 43);
    }

    #[test]
    fn test_sisu_devices() {
        assert!(!DeviceDescriptor::NINTENDO.requires_sisu());
        assert!(DeviceDescriptor::ANDROID.requires_sisu());
        assert!(DeviceDescriptor::IOS.requires_sisu());
    }
}
