//! Token acquisition and caching for authenticated geocoding requests.

pub mod client_credentials;
pub mod token_manager;

pub use client_credentials::{ClientCredentials, ConfigError};
pub use token_manager::TokenManager;

/// Supplies a bearer token for authenticated requests. The network exchange
/// lives behind this seam so callers can be tested without a real endpoint.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    type Token: Token;
    type Error: Send + Sync;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error>;
}

pub trait Token: Send {
    fn access_token(&self) -> &str;
}

pub trait ExpiringToken: Token {
    fn expires_at(&self) -> tokio::time::Instant;
}
