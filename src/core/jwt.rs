//! Signed tokens (compact ES384 JWS).
//!
//! Every token the relay produces carries `{"alg":"ES384","x5u":<public key>}` as its
//! header, so a verifier can check it without any out-of-band key. Decoding never trusts
//! the signature unless [`verify`] is used.

use crate::core::keys::{parse_public_key, verify_signature, KeyMaterial, KEY_BASE64, SEGMENT_BASE64};
use crate::error::{constants, TokenError};
use base64::Engine;
use serde_json::{json, Map, Value};

/// JSON object claims.
pub type Claims = Map<String, Value>;

/// Header and payload of a token, signature not checked.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub header: Claims,
    pub payload: Claims,
}

impl DecodedToken {
    /// The `x5u` header claim: the base64 public key of the signer.
    pub fn x5u(&self) -> Result<&str, TokenError> {
        self.header
            .get("x5u")
            .and_then(Value::as_str)
            .ok_or(TokenError::Malformed(constants::ERR_MISSING_X5U))
    }

    /// A string payload claim.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}

/// Sign `claims` with the session key.
pub fn sign(keys: &KeyMaterial, claims: &Claims) -> Result<String, TokenError> {
    let header = json!({
        "alg": "ES384",
        "x5u": keys.public_key_base64(),
    });

    let header = encode_segment(&header)?;
    let payload = encode_segment(&Value::Object(claims.clone()))?;
    let signing_input = format!("{header}.{payload}");
    let signature = keys.sign(signing_input.as_bytes())?;

    Ok(format!(
        "{signing_input}.{}",
        SEGMENT_BASE64.encode(signature)
    ))
}

/// Split and decode a token without checking its signature.
pub fn decode(token: &str) -> Result<DecodedToken, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload)) = (parts.next(), parts.next()) else {
        return Err(TokenError::Malformed(constants::ERR_TOKEN_SEGMENTS));
    };

    Ok(DecodedToken {
        header: decode_segment(header)?,
        payload: decode_segment(payload)?,
    })
}

/// Payload of a token, or `None` when it cannot be decoded.
pub fn payload(token: &str) -> Option<Claims> {
    decode(token).ok().map(|t| t.payload)
}

/// Decode a token and check its signature against the key in its own `x5u` header.
pub fn verify(token: &str) -> Result<DecodedToken, TokenError> {
    let decoded = decode(token)?;
    let key = parse_public_key(decoded.x5u()?)?;

    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or(TokenError::Malformed(constants::ERR_TOKEN_SEGMENTS))?;
    if signing_input.matches('.').count() != 1 {
        return Err(TokenError::Malformed(constants::ERR_TOKEN_SEGMENTS));
    }
    let signature = SEGMENT_BASE64
        .decode(signature)
        .map_err(|_| TokenError::Malformed(constants::ERR_TOKEN_BASE64))?;

    verify_signature(&key, signing_input.as_bytes(), &signature)?;
    Ok(decoded)
}

/// Check a chain link by link: every token verifies under its own `x5u`, and each token
/// after the first is signed by the key the previous token certifies.
pub fn verify_chain(chain: &[String]) -> Result<(), TokenError> {
    let mut certified: Option<String> = None;
    for token in chain {
        let decoded = verify(token)?;
        if let Some(expected) = certified.as_deref() {
            if decoded.x5u()? != expected {
                return Err(TokenError::BadSignature);
            }
        }
        certified = decoded.claim_str("identityPublicKey").map(str::to_owned);
    }
    Ok(())
}

fn encode_segment(value: &Value) -> Result<String, TokenError> {
    let bytes = serde_json::to_vec(value).map_err(|e| TokenError::Signing(e.to_string()))?;
    Ok(SEGMENT_BASE64.encode(bytes))
}

fn decode_segment(segment: &str) -> Result<Claims, TokenError> {
    // Producers disagree on the alphabet; accept both.
    let bytes = SEGMENT_BASE64
        .decode(segment)
        .or_else(|_| KEY_BASE64.decode(segment))
        .map_err(|_| TokenError::Malformed(constants::ERR_TOKEN_BASE64))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(TokenError::Malformed(constants::ERR_TOKEN_JSON)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test claims must be an object"),
        }
    }

    #[test]
    fn test_signed_token_verifies() {
        let keys = KeyMaterial::generate().unwrap();
        let token = sign(&keys, &claims(json!({"hello": "world"}))).unwrap();

        let decoded = verify(&token).unwrap();
        assert_eq!(decoded.x5u().unwrap(), keys.public_key_base64());
        assert_eq!(decoded.claim_str("hello"), Some("world"));
        assert_eq!(decoded.header.get("alg"), Some(&json!("ES384")));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let keys = KeyMaterial::generate().unwrap();
        let token = sign(&keys, &claims(json!({"n": 1}))).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = SEGMENT_BASE64.encode(br#"{"n":2}"#);
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(decode(&tampered).is_ok());
        assert_eq!(verify(&tampered), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("nodots").is_err());
        assert!(decode("!!!.???").is_err());
        assert!(payload("a.b.c").is_none());
    }

    #[test]
    fn test_chain_link_mismatch() {
        let root = KeyMaterial::generate().unwrap();
        let leaf = KeyMaterial::generate().unwrap();
        let stranger = KeyMaterial::generate().unwrap();

        let ca = sign(
            &root,
            &claims(json!({"identityPublicKey": leaf.public_key_base64()})),
        )
        .unwrap();
        let good = sign(&leaf, &claims(json!({"extraData": {}}))).unwrap();
        let bad = sign(&stranger, &claims(json!({"extraData": {}}))).unwrap();

        assert!(verify_chain(&[ca.clone(), good]).is_ok());
        assert!(verify_chain(&[ca, bad]).is_err());
    }
}
