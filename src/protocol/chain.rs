//! Login chain forging.
//!
//! The relay re-signs the client's login with its own session key so it can later
//! complete the upstream key agreement. Two modes:
//!
//! - **Self-signed**: one token certifying the session key, for offline-mode servers.
//! - **Delegated**: the chain endpoint issues a chain for the session key against an
//!   Xbox Live identity token; the relay prepends an authority token, signed by the
//!   session key, that certifies the chain's root key.
//!
//! Either way the chain is produced whole or not at all.

use crate::auth::{CredentialProvider, DeviceDescriptor, IdentityAcquirer, IdentityToken, TokenCache};
use crate::config::EndpointConfig;
use crate::core::jwt::{self, Claims};
use crate::core::KeyMaterial;
use crate::error::{constants, ForgeError, TokenError};
use crate::protocol::packet::{AuthType, LoginMessage};
use crate::utils::metrics::Timer;
use crate::utils::time::unix_now;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Validity of the self-signed token: one second back, one day forward.
const SELF_SIGNED_NOT_BEFORE_SECS: i64 = 1;
const SELF_SIGNED_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Validity of the delegated authority token, both directions.
const DELEGATED_SKEW_SECS: i64 = 6 * 60 * 60;

const NIL_IDENTITY: &str = "00000000-0000-0000-0000-000000000000";

/// A forged login, ready to splice into the client's login message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgedLogin {
    pub chain: Vec<String>,
    pub skin_token: String,
    pub auth_type: AuthType,
}

/// `extraData` used when the client's chain carries none.
pub fn default_extra_data() -> Value {
    json!({
        "displayName": "Player",
        "identity": NIL_IDENTITY,
    })
}

/// `extraData` of the first inbound chain token that has one.
pub fn extract_extra_data(chain: &[String]) -> Option<Value> {
    chain
        .iter()
        .filter_map(|token| jwt::payload(token))
        .find_map(|mut claims| claims.remove("extraData").filter(Value::is_object))
}

/// Single self-certifying token binding `keys` as the chain authority.
pub fn forge_self_signed(keys: &KeyMaterial, extra_data: &Value, now: i64) -> Result<String, TokenError> {
    let claims = to_claims(json!({
        "nbf": now - SELF_SIGNED_NOT_BEFORE_SECS,
        "exp": now + SELF_SIGNED_LIFETIME_SECS,
        "iat": now,
        "iss": "self",
        "certificateAuthority": true,
        "identityPublicKey": keys.public_key_base64(),
        "extraData": extra_data,
    }));
    jwt::sign(keys, &claims)
}

/// Authority token, signed by `keys`, certifying the root key of `provider_chain`.
pub fn forge_authority(keys: &KeyMaterial, provider_chain: &[String], now: i64) -> Result<String, ForgeError> {
    let root = provider_chain
        .first()
        .ok_or_else(|| ForgeError::MalformedChain(constants::ERR_EMPTY_CHAIN.into()))?;
    let root_key = jwt::decode(root)?.x5u()?.to_string();

    let claims = to_claims(json!({
        "certificateAuthority": true,
        "exp": now + DELEGATED_SKEW_SECS,
        "nbf": now - DELEGATED_SKEW_SECS,
        "iat": now,
        "identityPublicKey": root_key,
    }));
    Ok(jwt::sign(keys, &claims)?)
}

/// Re-sign the client-data token's payload, or an empty skin when there is none.
pub fn forge_skin(keys: &KeyMaterial, client_jwt: Option<&str>) -> Result<String, TokenError> {
    let claims = client_jwt.and_then(jwt::payload).unwrap_or_else(|| {
        to_claims(json!({
            "SkinId": "",
            "SkinData": "",
        }))
    });
    jwt::sign(keys, &claims)
}

fn to_claims(value: Value) -> Claims {
    match value {
        Value::Object(map) => map,
        _ => Claims::new(),
    }
}

#[derive(Deserialize)]
struct ChainResponse {
    chain: Vec<String>,
}

/// Everything delegated mode needs to obtain a provider-issued chain.
pub struct DelegatedIdentity {
    acquirer: Arc<IdentityAcquirer>,
    credential: Arc<dyn CredentialProvider>,
    device: DeviceDescriptor,
    cache: TokenCache,
    http: reqwest::Client,
    chain_url: String,
    client_version: String,
    current: Option<IdentityToken>,
}

impl DelegatedIdentity {
    pub fn new(
        acquirer: Arc<IdentityAcquirer>,
        credential: Arc<dyn CredentialProvider>,
        device: DeviceDescriptor,
        cache: TokenCache,
        http: reqwest::Client,
        endpoints: &EndpointConfig,
    ) -> Self {
        Self {
            acquirer,
            credential,
            device,
            cache,
            http,
            chain_url: endpoints.chain_url.clone(),
            client_version: endpoints.client_version.clone(),
            current: None,
        }
    }

    /// Request a chain for `public_key` from the chain endpoint.
    async fn fetch_chain(&self, identity: &IdentityToken, public_key: &str) -> Result<Vec<String>, ForgeError> {
        let _timer = Timer::start("chain_request");
        let response = self
            .http
            .post(&self.chain_url)
            .header("Authorization", &identity.token)
            .header("Client-Version", &self.client_version)
            .json(&json!({ "identityPublicKey": public_key }))
            .send()
            .await
            .map_err(|e| ForgeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForgeError::Transport(format!(
                "{}: HTTP {status}",
                constants::ERR_CHAIN_STATUS
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ForgeError::Transport(e.to_string()))?;
        let parsed: ChainResponse =
            serde_json::from_slice(&body).map_err(|e| ForgeError::MalformedChain(e.to_string()))?;
        if parsed.chain.is_empty() {
            return Err(ForgeError::MalformedChain(constants::ERR_EMPTY_CHAIN.into()));
        }
        Ok(parsed.chain)
    }
}

/// Produces the chain the relay presents upstream.
pub enum ChainForger {
    SelfSigned,
    Delegated(Box<DelegatedIdentity>),
}

impl ChainForger {
    pub fn self_signed() -> Self {
        ChainForger::SelfSigned
    }

    pub fn delegated(identity: DelegatedIdentity) -> Self {
        ChainForger::Delegated(Box::new(identity))
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            ChainForger::SelfSigned => AuthType::SelfSigned,
            ChainForger::Delegated(_) => AuthType::Full,
        }
    }

    /// Forge a chain and skin token for `login`, bound to `keys`.
    #[instrument(skip_all, fields(mode = ?self.auth_type()))]
    pub async fn forge(
        &mut self,
        keys: &KeyMaterial,
        login: &LoginMessage,
        cancel: &CancellationToken,
    ) -> Result<ForgedLogin, ForgeError> {
        let auth_type = self.auth_type();
        let now = unix_now();

        let chain = match self {
            ChainForger::SelfSigned => {
                let extra = extract_extra_data(&login.chain).unwrap_or_else(default_extra_data);
                vec![forge_self_signed(keys, &extra, now)?]
            }
            ChainForger::Delegated(identity) => {
                let current = identity.current.take();
                let token = identity
                    .acquirer
                    .get_or_refresh(
                        current,
                        identity.credential.as_ref(),
                        &identity.device,
                        &identity.cache,
                        cancel,
                    )
                    .await?;
                identity.current = Some(token.clone());

                let provider_chain = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(ForgeError::Transport(constants::ERR_SESSION_CANCELLED.into()))
                    }
                    chain = identity.fetch_chain(&token, keys.public_key_base64()) => chain?,
                };
                debug!(links = provider_chain.len(), "Provider chain received");

                let mut chain = Vec::with_capacity(provider_chain.len() + 1);
                chain.push(forge_authority(keys, &provider_chain, now)?);
                chain.extend(provider_chain);
                chain
            }
        };

        let skin_token = forge_skin(keys, login.client_jwt.as_deref())?;
        Ok(ForgedLogin {
            chain,
            skin_token,
            auth_type,
        })
    }
}

impl std::fmt::Debug for ChainForger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainForger::SelfSigned => f.write_str("ChainForger::SelfSigned"),
            ChainForger::Delegated(identity) => f
                .debug_struct("ChainForger::Delegated")
                .field("account", &identity.credential.account_id())
                .field("device", &identity.device.device_type)
                .finish(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_binds_session_key() {
        let keys = KeyMaterial::generate().unwrap();
        let token = forge_self_signed(&keys, &default_extra_data(), 1_000).unwrap();

        let decoded = jwt::verify(&token).unwrap();
        assert_eq!(decoded.claim_str("identityPublicKey"), Some(keys.public_key_base64()));
        assert_eq!(decoded.payload["nbf"], 999);
        assert_eq!(decoded.payload["exp"], 1_000 + 86_400);
        assert_eq!(decoded.payload["iss"], "self");
        assert_eq!(decoded.payload["certificateAuthority"], true);
        assert_eq!(decoded.payload["extraData"]["identity"], NIL_IDENTITY);
    }

    #[test]
    fn test_authority_certifies_provider_root() {
        let session = KeyMaterial::generate().unwrap();
        let provider = KeyMaterial::generate().unwrap();
        let provider_token = jwt::sign(
            &provider,
            &to_claims(json!({"identityPublicKey": session.public_key_base64()})),
        )
        .unwrap();

        let ca = forge_authority(&session, &[provider_token.clone()], 50_000).unwrap();
        let decoded = jwt::verify(&ca).unwrap();
        assert_eq!(decoded.x5u().unwrap(), session.public_key_base64());
        assert_eq!(decoded.claim_str("identityPublicKey"), Some(provider.public_key_base64()));
        assert_eq!(decoded.payload["nbf"], 50_000 - 6 * 3600);
        assert_eq!(decoded.payload["exp"], 50_000 + 6 * 3600);
        assert!(jwt::verify_chain(&[ca, provider_token]).is_ok());
    }

    #[test]
    fn test_authority_rejects_empty_chain() {
        let keys = KeyMaterial::generate().unwrap();
        assert!(matches!(
            forge_authority(&keys, &[], 0),
            Err(ForgeError::MalformedChain(_))
        ));
    }

    #[test]
    fn test_extra_data_taken_from_inbound_chain() {
        let client = KeyMaterial::generate().unwrap();
        let first = jwt::sign(&client, &to_claims(json!({"certificateAuthority": true}))).unwrap();
        let second = jwt::sign(
            &client,
            &to_claims(json!({"extraData": {"displayName": "Steve", "XUID": "1"}})),
        )
        .unwrap();

        let extra = extract_extra_data(&[first, second]).unwrap();
        assert_eq!(extra["displayName"], "Steve");
        assert_eq!(extract_extra_data(&["garbage".to_string()]), None);
    }

    #[test]
    fn test_skin_fallback() {
        let keys = KeyMaterial::generate().unwrap();
        let skin = forge_skin(&keys, Some("not a token")).unwrap();
        let decoded = jwt::verify(&skin).unwrap();
        assert_eq!(decoded.claim_str("SkinId"), Some(""));

        let client = KeyMaterial::generate().unwrap();
        let client_jwt = jwt::sign(&client, &to_claims(json!({"SkinId": "custom"}))).unwrap();
        let resigned = forge_skin(&keys, Some(&client_jwt)).unwrap();
        let decoded = jwt::verify(&resigned).unwrap();
        assert_eq!(decoded.x5u().unwrap(), keys.public_key_base64());
        assert_eq!(decoded.claim_str("SkinId"), Some("custom"));
    }
}
