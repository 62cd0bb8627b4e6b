//! Xbox Live identity acquisition.
//!
//! Turns a Microsoft account access token into the `XBL3.0` identity token the chain
//! endpoint accepts. The flow is:
//!
//! ```text
//! access token ─┬─ user authenticate ──────────────┐
//!               └─ device authenticate ─┐          │
//!                                       ├─ title ──┴─ XSTS authorize ─→ identity token
//!           (direct, or SISU authenticate + authorize)
//! ```
//!
//! User and device tokens are fetched concurrently. Devices that cannot request a title
//! token directly go through SISU, which fails with
//! [`IdentityError::GamertagRequired`] for accounts that never picked a gamertag.

use crate::auth::cache::{IdentityToken, TokenCache};
use crate::auth::device::{escape_signature, DeviceDescriptor, DeviceKey};
use crate::auth::oauth::{CredentialProvider, XBOX_SCOPE};
use crate::auth::status_error;
use crate::config::EndpointConfig;
use crate::core::keys::SEGMENT_BASE64;
use crate::error::{constants, IdentityError};
use crate::utils::metrics::{RelayMetrics, Timer};
use crate::utils::time::filetime_now;
use base64::Engine;
use bytes::Bytes;
use rand::distr::{Alphanumeric, SampleString};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Relying party of the final XSTS token.
pub const MULTIPLAYER_RELYING_PARTY: &str = "https://multiplayer.minecraft.net/";

const XBOX_RELYING_PARTY: &str = "http://auth.xboxlive.com";
const USER_SITE_NAME: &str = "user.auth.xboxlive.com";
const SANDBOX: &str = "RETAIL";
const DEVICE_VERSION: &str = "0.0.0.0";
const SESSION_ID_HEADER: &str = "X-SessionId";
const PKCE_LEN: usize = 64;

/// Token envelope returned by every Xbox Live token endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XboxToken {
    pub token: String,
    #[serde(default)]
    pub not_after: Option<String>,
    #[serde(default)]
    pub display_claims: Value,
}

impl XboxToken {
    /// User hash, `DisplayClaims.xui[0].uhs`.
    pub fn user_hash(&self) -> Result<&str, IdentityError> {
        self.display_claims["xui"][0]["uhs"]
            .as_str()
            .ok_or_else(|| IdentityError::MalformedResponse(constants::ERR_MISSING_UHS.into()))
    }

    /// Device id, `DisplayClaims.xdi.did`.
    pub fn device_id(&self) -> Result<&str, IdentityError> {
        self.display_claims["xdi"]["did"]
            .as_str()
            .ok_or_else(|| IdentityError::MalformedResponse(constants::ERR_MISSING_DEVICE_ID.into()))
    }

    /// `NotAfter` as unix seconds.
    pub fn expires_at(&self) -> Result<i64, IdentityError> {
        let not_after = self
            .not_after
            .as_deref()
            .ok_or_else(|| IdentityError::MalformedResponse("token has no NotAfter".into()))?;
        chrono::DateTime::parse_from_rfc3339(not_after)
            .map(|t| t.timestamp())
            .map_err(|e| IdentityError::MalformedResponse(format!("bad NotAfter '{not_after}': {e}")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SisuAuthorizeResponse {
    #[serde(default)]
    title_token: Option<XboxToken>,
    #[serde(default)]
    web_page: Option<String>,
}

/// Per-flow SISU parameters.
struct SisuSession {
    session_id: String,
    state: String,
}

struct ProviderResponse {
    status: StatusCode,
    session_id: Option<String>,
    body: Bytes,
}

impl ProviderResponse {
    fn json<T: DeserializeOwned>(self, step: &str) -> Result<T, IdentityError> {
        if !self.status.is_success() {
            return Err(status_error(self.status, step));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| IdentityError::MalformedResponse(format!("{step}: {e}")))
    }
}

/// Build the URL an operator opens to register a gamertag and resume the SISU flow.
pub fn build_resume_url(
    web_page: &str,
    device_id: &str,
    xal_redirect: &str,
    session_id: &str,
    signature: &str,
    state: &str,
) -> String {
    let base = web_page.split('#').next().unwrap_or_default();
    format!(
        "{base}&did=0x{device_id}&redirect={xal_redirect}&sid={session_id}&sig={}&state={state}",
        escape_signature(signature)
    )
}

/// Runs the Xbox Live flow. Holds the device proof key for the lifetime of the relay.
pub struct IdentityAcquirer {
    http: reqwest::Client,
    endpoints: EndpointConfig,
    device_key: DeviceKey,
    metrics: Option<Arc<RelayMetrics>>,
}

impl IdentityAcquirer {
    pub fn new(http: reqwest::Client, endpoints: EndpointConfig) -> Self {
        Self {
            http,
            endpoints,
            device_key: DeviceKey::generate(),
            metrics: None,
        }
    }

    pub fn with_device_key(mut self, device_key: DeviceKey) -> Self {
        self.device_key = device_key;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn device_key(&self) -> &DeviceKey {
        &self.device_key
    }

    /// Return the cached identity token, or run the full flow and cache its result.
    ///
    /// If `cancel` fires while the flow is in flight the result is dropped and the cache
    /// is left untouched.
    #[instrument(skip_all, fields(account = credential.account_id(), device = device.device_type))]
    pub async fn acquire(
        &self,
        credential: &dyn CredentialProvider,
        device: &DeviceDescriptor,
        cache: &TokenCache,
        cancel: &CancellationToken,
    ) -> Result<IdentityToken, IdentityError> {
        if cancel.is_cancelled() {
            return Err(IdentityError::Cancelled);
        }

        if let Some(token) = cache.load(credential.account_id(), device).await {
            debug!("Identity token served from cache");
            if let Some(metrics) = &self.metrics {
                metrics.identity_cache_hit();
            }
            return Ok(token);
        }
        if let Some(metrics) = &self.metrics {
            metrics.identity_cache_miss();
        }

        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IdentityError::Cancelled),
            result = self.run_flow(credential, device) => result?,
        };

        if cancel.is_cancelled() {
            debug!("Session torn down during acquisition, discarding identity token");
            return Err(IdentityError::Cancelled);
        }

        if let Err(e) = cache.save(credential.account_id(), device, &token).await {
            warn!(error = %e, "Failed to cache identity token");
        }
        info!(expires_at = token.expires_at, "Identity token acquired");
        Ok(token)
    }

    /// Keep `current` while it is valid, otherwise acquire a new token.
    pub async fn get_or_refresh(
        &self,
        current: Option<IdentityToken>,
        credential: &dyn CredentialProvider,
        device: &DeviceDescriptor,
        cache: &TokenCache,
        cancel: &CancellationToken,
    ) -> Result<IdentityToken, IdentityError> {
        match current {
            Some(token) if !token.is_expired() => Ok(token),
            _ => self.acquire(credential, device, cache, cancel).await,
        }
    }

    async fn run_flow(
        &self,
        credential: &dyn CredentialProvider,
        device: &DeviceDescriptor,
    ) -> Result<IdentityToken, IdentityError> {
        let _timer = Timer::start("identity_flow");
        let access_token = credential.access_token().await?;

        let (user_token, device_token) =
            tokio::try_join!(self.user_token(&access_token), self.device_token(device))?;

        let title_token = if device.requires_sisu() {
            self.sisu_title_token(&access_token, &device_token, device).await?
        } else {
            self.title_token(&access_token, &device_token).await?
        };

        let xsts = self.xsts_token(&user_token, &title_token, &device_token).await?;
        Ok(IdentityToken::new(
            format!("XBL3.0 x={};{}", xsts.user_hash()?, xsts.token),
            xsts.expires_at()?,
        ))
    }

    async fn user_token(&self, access_token: &str) -> Result<XboxToken, IdentityError> {
        let request = |ticket: String| {
            json!({
                "RelyingParty": XBOX_RELYING_PARTY,
                "TokenType": "JWT",
                "Properties": {
                    "AuthMethod": "RPS",
                    "SiteName": USER_SITE_NAME,
                    "RpsTicket": ticket,
                },
            })
        };

        let url = &self.endpoints.user_auth_url;
        let mut response = self
            .post(url, &request(format!("t={access_token}")), false)
            .await?;
        if response.status == StatusCode::BAD_REQUEST {
            debug!("User authentication rejected t= ticket, retrying with d=");
            response = self
                .post(url, &request(format!("d={access_token}")), false)
                .await?;
        }
        response.json("user authentication")
    }

    async fn device_token(&self, device: &DeviceDescriptor) -> Result<XboxToken, IdentityError> {
        let request = json!({
            "RelyingParty": XBOX_RELYING_PARTY,
            "TokenType": "JWT",
            "Properties": {
                "AuthMethod": "ProofOfPossession",
                "Id": self.device_key.device_id(),
                "DeviceType": device.device_type,
                "Version": DEVICE_VERSION,
                "ProofKey": self.device_key.proof_key(),
            },
        });
        self.post(&self.endpoints.device_auth_url, &request, true)
            .await?
            .json("device authentication")
    }

    async fn title_token(
        &self,
        access_token: &str,
        device_token: &XboxToken,
    ) -> Result<XboxToken, IdentityError> {
        let request = json!({
            "RelyingParty": XBOX_RELYING_PARTY,
            "TokenType": "JWT",
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": USER_SITE_NAME,
                "RpsTicket": format!("t={access_token}"),
                "DeviceToken": device_token.token,
                "ProofKey": self.device_key.proof_key(),
            },
        });
        self.post(&self.endpoints.title_auth_url, &request, true)
            .await?
            .json("title authentication")
    }

    async fn sisu_title_token(
        &self,
        access_token: &str,
        device_token: &XboxToken,
        device: &DeviceDescriptor,
    ) -> Result<XboxToken, IdentityError> {
        let session = self.sisu_authenticate(device_token, device).await?;

        let request = json!({
            "AccessToken": format!("t={access_token}"),
            "AppId": device.app_id,
            "DeviceToken": device_token.token,
            "Sandbox": SANDBOX,
            "SiteName": USER_SITE_NAME,
            "RelyingParty": "http://xboxlive.com",
            "SessionId": session.session_id,
            "ProofKey": self.device_key.proof_key(),
            "UseModernGamertag": true,
        });
        let response = self
            .post(&self.endpoints.sisu_authorize_url, &request, true)
            .await?;

        if response.status.is_success() {
            let authorized: SisuAuthorizeResponse = response.json("SISU authorize")?;
            return authorized.title_token.ok_or_else(|| {
                IdentityError::MalformedResponse("SISU authorize response has no TitleToken".into())
            });
        }

        let web_page = serde_json::from_slice::<SisuAuthorizeResponse>(&response.body)
            .ok()
            .and_then(|r| r.web_page)
            .ok_or_else(|| status_error(response.status, "SISU authorize"))?;

        let path = format!("/proxy?sessionid={}", session.session_id);
        let signature = self.device_key.sign("POST", &path, "", b"", filetime_now())?;
        let resume_url = build_resume_url(
            &web_page,
            device_token.device_id()?,
            device.xal_redirect,
            &session.session_id,
            &signature,
            &session.state,
        );

        warn!(status = %response.status, "SISU authorize refused; account needs a gamertag");
        Err(IdentityError::GamertagRequired { resume_url })
    }

    async fn sisu_authenticate(
        &self,
        device_token: &XboxToken,
        device: &DeviceDescriptor,
    ) -> Result<SisuSession, IdentityError> {
        // ThreadRng is !Send; keep it out of the await below.
        let (state, verifier) = {
            let mut rng = rand::rng();
            (
                Alphanumeric.sample_string(&mut rng, PKCE_LEN),
                Alphanumeric.sample_string(&mut rng, PKCE_LEN),
            )
        };
        let challenge = SEGMENT_BASE64.encode(Sha256::digest(verifier.as_bytes()));

        let request = json!({
            "AppId": device.app_id,
            "DeviceToken": device_token.token,
            "Offers": [XBOX_SCOPE],
            "Query": {
                "display": "phone",
                "code_challenge": challenge,
                "code_challenge_method": "S256",
                "state": state,
            },
            "RedirectUri": device.xal_redirect,
            "Sandbox": SANDBOX,
            "TokenType": "code",
        });
        let response = self
            .post(&self.endpoints.sisu_authenticate_url, &request, true)
            .await?;
        if !response.status.is_success() {
            return Err(status_error(response.status, "SISU authenticate"));
        }

        let session_id = response.session_id.ok_or_else(|| {
            IdentityError::MalformedResponse(constants::ERR_MISSING_SESSION_ID.into())
        })?;
        debug!(session_id = %session_id, "SISU session started");
        Ok(SisuSession { session_id, state })
    }

    async fn xsts_token(
        &self,
        user_token: &XboxToken,
        title_token: &XboxToken,
        device_token: &XboxToken,
    ) -> Result<XboxToken, IdentityError> {
        let request = json!({
            "RelyingParty": MULTIPLAYER_RELYING_PARTY,
            "TokenType": "JWT",
            "Properties": {
                "UserTokens": [user_token.token],
                "SandboxId": SANDBOX,
                "TitleToken": title_token.token,
                "DeviceToken": device_token.token,
                "ProofKey": self.device_key.proof_key(),
            },
        });
        self.post(&self.endpoints.xsts_authorize_url, &request, true)
            .await?
            .json("XSTS authorize")
    }

    /// POST a JSON body, signing it with the device key when `signed` is set.
    async fn post(
        &self,
        url: &str,
        body: &Value,
        signed: bool,
    ) -> Result<ProviderResponse, IdentityError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| IdentityError::NetworkFailure(format!("invalid endpoint '{url}': {e}")))?;
        let body = body.to_string().into_bytes();

        let mut request = self
            .http
            .post(url.clone())
            .timeout(self.endpoints.request_timeout)
            .header("Content-Type", "application/json")
            .header("x-xbl-contract-version", "1");

        if signed {
            let path_and_query = match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            };
            let signature =
                self.device_key
                    .sign("POST", &path_and_query, "", &body, filetime_now())?;
            request = request.header("Signature", signature);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;

        debug!(url = %url.path(), %status, "Provider response");
        Ok(ProviderResponse {
            status,
            session_id,
            body,
        })
    }
}

impl std::fmt::Debug for IdentityAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityAcquirer")
            .field("device_key", &self.device_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_url_layout() {
        let url = build_resume_url(
            "https://sisu.xboxlive.com/client/v33/default/view/index.html?action=signup#frag",
            "ABCD",
            "ms-xal-0000000048183522://auth",
            "sid-1",
            "AAA+BB/C==",
            "st8",
        );
        assert_eq!(
            url,
            "https://sisu.xboxlive.com/client/v33/default/view/index.html?action=signup\
             &did=0xABCD&redirect=ms-xal-0000000048183522://auth&sid=sid-1\
             &sig=AAA%2BBB/C%3D%3D&state=st8"
        );
    }

    #[test]
    fn test_token_claims() {
        let token: XboxToken = serde_json::from_value(json!({
            "Token": "xsts",
            "NotAfter": "2030-01-01T00:00:00.1234567Z",
            "DisplayClaims": {"xui": [{"uhs": "12345"}]},
        }))
        .unwrap();

        assert_eq!(token.user_hash().unwrap(), "12345");
        assert_eq!(token.expires_at().unwrap(), 1_893_456_000);
        assert!(token.device_id().is_err());
    }
}
