//! Per-session key material.
//!
//! A relay session owns exactly one P-384 key pair. It signs every token the relay forges
//! and is the private half of the key agreement with the upstream server. The key pair is
//! generated when the session starts and dropped with it; nothing here touches disk.

use crate::error::{constants, TokenError};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use p384::{PublicKey, SecretKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// Standard alphabet, unpadded on encode, padding-agnostic on decode. Used for keys and salts.
pub const KEY_BASE64: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// URL-safe alphabet, unpadded on encode, padding-agnostic on decode. Used for token segments.
pub const SEGMENT_BASE64: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Symmetric key agreed with the upstream server. Zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// The session's asymmetric key pair.
pub struct KeyMaterial {
    secret: SecretKey,
    signing: SigningKey,
    public_b64: String,
}

impl KeyMaterial {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Result<Self, TokenError> {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    /// Wrap an existing secret key.
    pub fn from_secret(secret: SecretKey) -> Result<Self, TokenError> {
        let public_b64 = encode_public_key(&secret.public_key())?;
        let signing = SigningKey::from(&secret);
        Ok(Self {
            secret,
            signing,
            public_b64,
        })
    }

    /// SubjectPublicKeyInfo DER of the public key, standard base64 without padding.
    pub fn public_key_base64(&self) -> &str {
        &self.public_b64
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// ES384 signature over `message` in fixed-width `r || s` form.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, TokenError> {
        let signature: Signature = self
            .signing
            .try_sign(message)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    /// Derive the session key from the server's public key and salt:
    /// `SHA-256(salt || ECDH(own secret, server public).x)`.
    pub fn shared_secret(&self, server_public: &PublicKey, salt: &[u8]) -> SessionKey {
        let shared =
            p384::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), server_public.as_affine());

        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(shared.raw_secret_bytes());
        SessionKey(hasher.finalize().into())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public", &self.public_b64)
            .finish_non_exhaustive()
    }
}

/// Encode a public key the way tokens carry it.
pub fn encode_public_key(key: &PublicKey) -> Result<String, TokenError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
    Ok(KEY_BASE64.encode(der.as_bytes()))
}

/// Parse a base64 SubjectPublicKeyInfo (the `x5u` / `identityPublicKey` form).
pub fn parse_public_key(encoded: &str) -> Result<PublicKey, TokenError> {
    let der = KEY_BASE64
        .decode(encoded.trim())
        .map_err(|_| TokenError::InvalidKey(constants::ERR_PUBLIC_KEY.into()))?;
    PublicKey::from_public_key_der(&der)
        .map_err(|_| TokenError::InvalidKey(constants::ERR_PUBLIC_KEY.into()))
}

/// Verify an ES384 `r || s` signature.
pub fn verify_signature(
    key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), TokenError> {
    let signature = Signature::from_slice(signature).map_err(|_| TokenError::BadSignature)?;
    VerifyingKey::from(key)
        .verify(message, &signature)
        .map_err(|_| TokenError::BadSignature)
}
