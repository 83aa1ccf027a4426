pub mod config;
pub mod error;
pub mod oauth;

pub use config::{load_config, AuthConfig};
pub use error::AuthError;
pub use oauth::{
    AuthenticatedClient, CredentialProvider, CredentialRecord, CredentialStatus, FileTokenStore,
    MemoryTokenStore, RevocationOutcome, TokenStore,
};

/// One-shot convenience: load config from the usual places and return a
/// valid access token.
pub async fn access_token() -> Result<String, AuthError> {
    let provider = CredentialProvider::new(load_config(None)?)?;
    provider.access_token().await
}
