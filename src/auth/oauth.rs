//! OAuth token exchange against the Microsoft account token endpoint.
//!
//! An account is configured with either a long-lived refresh token or a one-shot
//! authorization code. Both are exchanged for an access token plus a new refresh token,
//! which replaces the stored one.

use crate::auth::device::DeviceDescriptor;
use crate::auth::status_error;
use crate::config::EndpointConfig;
use crate::error::IdentityError;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Scope requested for every grant.
pub const XBOX_SCOPE: &str = "service::user.auth.xboxlive.com::MBI_SSL";

/// Tokens longer than this are refresh tokens regardless of prefix.
const REFRESH_TOKEN_MIN_LEN: usize = 500;

/// Legacy refresh-token prefixes.
const REFRESH_TOKEN_PREFIXES: [&str; 2] = ["M.", "0.A"];

/// Which OAuth grant a stored token is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenGrant {
    RefreshToken,
    AuthorizationCode,
}

impl TokenGrant {
    /// Decide the grant from the token's shape alone.
    pub fn classify(token: &str) -> Self {
        if REFRESH_TOKEN_PREFIXES.iter().any(|p| token.starts_with(p))
            || token.len() > REFRESH_TOKEN_MIN_LEN
        {
            TokenGrant::RefreshToken
        } else {
            TokenGrant::AuthorizationCode
        }
    }

    pub fn grant_type(self) -> &'static str {
        match self {
            TokenGrant::RefreshToken => "refresh_token",
            TokenGrant::AuthorizationCode => "authorization_code",
        }
    }

    /// Form field carrying the token.
    pub fn token_field(self) -> &'static str {
        match self {
            TokenGrant::RefreshToken => "refresh_token",
            TokenGrant::AuthorizationCode => "code",
        }
    }
}

/// Successful exchange result.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OAuthTokens(..)")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, endpoints: &EndpointConfig) -> Self {
        Self {
            http,
            token_url: endpoints.oauth_token_url.clone(),
            redirect_uri: endpoints.oauth_redirect_uri.clone(),
        }
    }

    /// Exchange a refresh token or authorization code for fresh tokens.
    #[instrument(skip(self, token), fields(device = device.device_type))]
    pub async fn exchange(
        &self,
        device: &DeviceDescriptor,
        token: &str,
    ) -> Result<OAuthTokens, IdentityError> {
        let grant = TokenGrant::classify(token);
        debug!(grant = grant.grant_type(), "Exchanging OAuth grant");

        let form = [
            ("client_id", device.app_id),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", XBOX_SCOPE),
            ("grant_type", grant.grant_type()),
            (grant.token_field(), token),
        ];

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: TokenResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(status_error(status, "OAuth token")),
            Err(e) => return Err(IdentityError::MalformedResponse(e.to_string())),
        };

        if let Some(error) = parsed.error {
            let description = parsed.error_description.unwrap_or_default();
            return Err(IdentityError::Unauthenticated(format!("{error}: {description}")));
        }
        if !status.is_success() {
            return Err(status_error(status, "OAuth token"));
        }

        match (parsed.access_token, parsed.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok(OAuthTokens {
                access_token,
                refresh_token,
            }),
            _ => Err(IdentityError::MalformedResponse(
                "OAuth response lacks access_token or refresh_token".into(),
            )),
        }
    }
}

/// Source of the Microsoft account access token handed to the identity flow.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Key under which this account's identity tokens are cached.
    fn account_id(&self) -> &str;

    async fn access_token(&self) -> Result<String, IdentityError>;
}

/// A fixed access token.
pub struct StaticCredential {
    account_id: String,
    access_token: String,
}

impl StaticCredential {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn access_token(&self) -> Result<String, IdentityError> {
        Ok(self.access_token.clone())
    }
}

/// An account backed by a rotating refresh token.
pub struct Account {
    account_id: String,
    device: DeviceDescriptor,
    refresh_token: Mutex<String>,
    oauth: OAuthClient,
}

impl Account {
    pub fn new(
        account_id: impl Into<String>,
        device: DeviceDescriptor,
        refresh_token: impl Into<String>,
        oauth: OAuthClient,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            device,
            refresh_token: Mutex::new(refresh_token.into()),
            oauth,
        }
    }

    /// The refresh token currently held, for persisting between runs.
    pub async fn refresh_token(&self) -> String {
        self.refresh_token.lock().await.clone()
    }
}

#[async_trait]
impl CredentialProvider for Account {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn access_token(&self) -> Result<String, IdentityError> {
        // Held across the exchange so two callers never spend the same refresh token.
        let mut stored = self.refresh_token.lock().await;
        let tokens = self.oauth.exchange(&self.device, &stored).await?;
        *stored = tokens.refresh_token;
        Ok(tokens.access_token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_classify_refresh_tokens() {
        assert_eq!(TokenGrant::classify("M.R3_BAY.abc"), TokenGrant::RefreshToken);
        assert_eq!(TokenGrant::classify("0.Axyz"), TokenGrant::RefreshToken);
        assert_eq!(TokenGrant::classify(&"q".repeat(600)), TokenGrant::RefreshToken);
    }

    #[test]
    fn test_classify_authorization_code() {
        let code = "Mabcdefghijklmnopqrstuvwxyz0123456789ABC";
        assert_eq!(code.len(), 40);
        assert_eq!(TokenGrant::classify(code), TokenGrant::AuthorizationCode);
        assert_eq!(TokenGrant::classify(&"q".repeat(500)), TokenGrant::AuthorizationCode);
    }

    #[tokio::test]
    async fn test_account_rotates_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth20_token.srf"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=0000000048183522"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "refresh_token": "M.rotated",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(reqwest::Client::new(), &EndpointConfig::with_base(&server.uri()));
        let account = Account::new("alice", DeviceDescriptor::ANDROID, "M.original", oauth);

        assert_eq!(account.access_token().await.unwrap(), "access-1");
        assert_eq!(account.refresh_token().await, "M.rotated");
    }

    #[tokio::test]
    async fn test_error_body_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth20_token.srf"))
            .and(body_string_contains("code=short-code"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "The provided value for 'code' is not valid.",
            })))
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(reqwest::Client::new(), &EndpointConfig::with_base(&server.uri()));
        let err = oauth
            .exchange(&DeviceDescriptor::NINTENDO, "short-code")
            .await
            .unwrap_err();

        match err {
            IdentityError::Unauthenticated(msg) => assert!(msg.starts_with("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
