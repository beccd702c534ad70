//! OAuth client credentials exchange against the ArcGIS token endpoint.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::utils::{check_status, ServerError, ServiceFault};

pub const DEFAULT_AUTH_ENDPOINT: &str = "https://www.arcgis.com/sharing/oauth2/token";

/// Requested token lifetime, in minutes.
const REQUESTED_EXPIRATION_MINUTES: u32 = 1440;

/// Shaved off the reported lifetime when computing the cache expiry, so a
/// token handed out as valid is never already expired on the server side.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
#[error("please specify client_id and client_secret")]
pub struct ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
    #[error("service error {code}: {message}")]
    Service { code: u16, message: String },
}

pub struct ClientCredentials {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    authendpoint: String,
}

impl ClientCredentials {
    /// Both `client_id` and `client_secret` are required.
    pub fn new(
        client: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(ConfigError);
        }
        Ok(Self {
            client,
            client_id,
            client_secret,
            authendpoint: DEFAULT_AUTH_ENDPOINT.to_owned(),
        })
    }

    pub fn with_authendpoint(mut self, authendpoint: impl Into<String>) -> Self {
        self.authendpoint = authendpoint.into();
        self
    }

    /// Perform the client credentials flow.
    pub async fn perform(&self) -> Result<AuthResponse, Error> {
        let expiration = REQUESTED_EXPIRATION_MINUTES.to_string();
        let params = &[
            ("client_secret", self.client_secret.as_str()),
            ("client_id", self.client_id.as_str()),
            ("grant_type", "client_credentials"),
            ("expiration", expiration.as_str()),
            ("f", "json"),
        ];
        let params =
            serde_urlencoded::to_string(params).expect("string pairs always urlencode");

        let req = self
            .client
            .post(&self.authendpoint)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(params)
            .build()?;

        let res = self.client.execute(req).await?;
        check_status(&res)?;
        // The endpoint reports service-level failures inside a 200 body.
        match res.json().await? {
            TokenResponse::Failed { error } => Err(Error::Service {
                code: error.code,
                message: error.into_message(),
            }),
            TokenResponse::Issued(issued) => Ok(issued),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Failed { error: ServiceFault },
    Issued(AuthResponse),
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    /// The issued access token.
    pub access_token: String,
    /// How long the token is valid, in seconds.
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub expires_at: Instant,
}

impl From<AuthResponse> for Token {
    fn from(issued: AuthResponse) -> Self {
        let AuthResponse {
            access_token,
            expires_in,
        } = issued;
        let lifetime = Duration::from_secs(expires_in).saturating_sub(SAFETY_MARGIN);
        Self {
            access_token,
            expires_at: Instant::now() + lifetime,
        }
    }
}

#[async_trait::async_trait]
impl super::TokenProvider for ClientCredentials {
    type Token = Token;
    type Error = Error;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
        let issued = self.perform().await?;
        Ok(issued.into())
    }
}

impl super::Token for Token {
    fn access_token(&self) -> &str {
        self.access_token.as_str()
    }
}

impl super::ExpiringToken for Token {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}
