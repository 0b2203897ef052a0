//! OAuth2 against the Mendeley token endpoint.
//!
//! [`OAuthClient`] implements [`TokenSource`] with the refresh-token grant, which is all a
//! batch needs. It also covers the one-time bootstrap used by the `authorize` command:
//! building the consent URL and trading the pasted authorization code for a refresh token.

use std::time::Duration;

use async_trait::async_trait;
use mendeley_uploader_core::contract::{AccessToken, ApiError, TokenSource};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::load_config::{AppConfig, Credentials};
use crate::mendeley::{error_from_response, transport_error};

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const SCOPE: &str = "all";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

pub struct OAuthClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl OAuthClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.api_base_url.clone(), config.credentials.clone())
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url)
    }

    /// The consent page the user opens to grant access.
    pub fn authorization_url(&self) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &format!("{}/oauth/authorize", self.base_url),
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", SCOPE),
            ],
        )
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ApiError> {
        let response = self
            .http
            .post(self.token_url())
            .form(form)
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ApiError::InvalidResponse(format!("token response: {e}")))
        } else {
            let err = error_from_response(response).await;
            tracing::error!(status = status.as_u16(), error = %err, "Token endpoint refused the request");
            Err(err)
        }
    }

    /// Trade an authorization code from the consent redirect for a token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ApiError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ApiError::InvalidResponse(
                "no authorization code provided".to_string(),
            ));
        }
        tracing::info!("Exchanging authorization code for tokens");
        let tokens = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .await?;
        if tokens.refresh_token.is_none() {
            tracing::warn!("Token response did not include a refresh token");
        }
        Ok(tokens)
    }
}

#[async_trait]
impl TokenSource for OAuthClient {
    async fn access_token(&self) -> Result<AccessToken, ApiError> {
        let refresh_token = self
            .credentials
            .refresh_token
            .as_deref()
            .ok_or(ApiError::MissingRefreshToken)?;

        let tokens = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", SCOPE),
            ])
            .await?;
        tracing::debug!(expires_in = ?tokens.expires_in, "Received access token");
        Ok(AccessToken::new(tokens.access_token))
    }
}
