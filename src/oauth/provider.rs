use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};

use crate::config::{default_credentials_path, AuthConfig, Endpoints};
use crate::error::AuthError;
use crate::oauth::consent::{BrowserOpener, ConsentFlow, PrintUrl, SystemBrowser};
use crate::oauth::discovery::resolve_endpoints;
use crate::oauth::record::CredentialRecord;
use crate::oauth::store::{FileTokenStore, TokenStore};
use crate::oauth::token::TokenClient;

/// A currently valid credential, ready to attach to API calls.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    record: CredentialRecord,
    http: reqwest::Client,
}

impl AuthenticatedClient {
    fn new(record: CredentialRecord) -> Result<Self, AuthError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", record.access_token))
            .map_err(|e| AuthError::TokenExchange(format!("Access token is not a valid header value: {e}")))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self { record, http })
    }

    pub fn access_token(&self) -> &str {
        &self.record.access_token
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.record.access_token)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.record.expires_at
    }

    /// HTTP client that sends `Authorization: Bearer <token>` on every request.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// What `revoke_auth` managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationOutcome {
    /// Provider confirmed revocation and the local record is gone.
    Revoked,
    /// Local record cleared; remote call skipped or failed.
    LocalOnly,
    /// Nothing was stored.
    NothingStored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    NotAuthenticated,
    Valid,
    Expired,
}

/// Snapshot of the stored credential, computed without network I/O.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub state: CredentialState,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub scope: Vec<String>,
}

impl CredentialStatus {
    pub async fn inspect(store: &dyn TokenStore, skew: chrono::Duration) -> Self {
        match store.load().await {
            None => Self {
                state: CredentialState::NotAuthenticated,
                expires_at: None,
                has_refresh_token: false,
                scope: Vec::new(),
            },
            Some(record) => Self {
                state: if record.is_fresh(Utc::now(), skew) {
                    CredentialState::Valid
                } else {
                    CredentialState::Expired
                },
                expires_at: Some(record.expires_at),
                has_refresh_token: record.can_refresh(),
                scope: record.scope.into_iter().collect(),
            },
        }
    }
}

/// The entry point for everything that needs a credential.
///
/// Construct one per process and share it by reference or `Arc`. Calls are
/// serialised, so at most one refresh or consent flow is in flight and
/// concurrent callers wait for its outcome.
pub struct CredentialProvider {
    config: AuthConfig,
    store: Arc<dyn TokenStore>,
    tokens: TokenClient,
    consent: ConsentFlow,
    endpoints: OnceCell<Endpoints>,
    lifecycle: Mutex<()>,
}

impl CredentialProvider {
    /// Provider backed by the credential file from `config` (or the default
    /// per-user location) and the system browser.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let path = config
            .credentials_path
            .clone()
            .unwrap_or_else(default_credentials_path);
        let opener: Arc<dyn BrowserOpener> = if config.open_browser {
            Arc::new(SystemBrowser)
        } else {
            Arc::new(PrintUrl)
        };
        Self::with_parts(config, Arc::new(FileTokenStore::new(path)), opener)
    }

    pub fn with_parts(
        config: AuthConfig,
        store: Arc<dyn TokenStore>,
        opener: Arc<dyn BrowserOpener>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let tokens = TokenClient::new(
            &config.client_id,
            config.client_secret.as_deref(),
            config.request_timeout(),
        )?;
        let consent = ConsentFlow::new(config.clone(), opener);
        Ok(Self {
            config,
            store,
            tokens,
            consent,
            endpoints: OnceCell::new(),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    async fn endpoints(&self) -> Result<&Endpoints, AuthError> {
        self.endpoints
            .get_or_try_init(|| resolve_endpoints(&self.config, self.tokens.http()))
            .await
    }

    /// Return a usable credential, refreshing or re-consenting as needed.
    ///
    /// A fresh cached record is returned after a single local read.
    pub async fn get_authenticated_client(&self) -> Result<AuthenticatedClient, AuthError> {
        let _guard = self.lifecycle.lock().await;
        let record = self.current_record().await?;
        AuthenticatedClient::new(record)
    }

    /// Shorthand for callers that only need the bearer string.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.get_authenticated_client().await?.access_token().to_string())
    }

    async fn current_record(&self) -> Result<CredentialRecord, AuthError> {
        if let Some(record) = self.store.load().await {
            if record.is_fresh(Utc::now(), self.config.expiry_skew()) {
                tracing::debug!(expires_at = %record.expires_at, "using cached access token");
                return Ok(record);
            }

            match record.refresh_token.as_deref() {
                Some(refresh_token) => match self.refresh(&record, refresh_token).await {
                    Ok(refreshed) => return Ok(refreshed),
                    // Only a provider rejection of the grant says anything
                    // about the refresh token. Discovery, storage and network
                    // errors leave the record in place.
                    Err(e @ AuthError::RefreshFailure { transient: false, .. }) => {
                        tracing::warn!("refresh token no longer usable, clearing cached credential: {e}");
                        self.store.clear().await?;
                    }
                    Err(e) => return Err(e),
                },
                None => {
                    tracing::info!("access token expired and no refresh token stored");
                    self.store.clear().await?;
                }
            }
        } else {
            tracing::debug!("no cached credential");
        }

        self.run_consent().await
    }

    async fn refresh(
        &self,
        record: &CredentialRecord,
        refresh_token: &str,
    ) -> Result<CredentialRecord, AuthError> {
        let endpoints = self.endpoints().await?;
        tracing::debug!("refreshing access token");
        let response = self.tokens.refresh(&endpoints.token, refresh_token).await?;
        let refreshed = response.refreshed(record, Utc::now());
        self.store.save(&refreshed).await?;
        tracing::info!(expires_at = %refreshed.expires_at, "access token refreshed");
        Ok(refreshed)
    }

    async fn run_consent(&self) -> Result<CredentialRecord, AuthError> {
        let endpoints = self.endpoints().await?;
        self.consent
            .run(endpoints, &self.tokens, self.store.as_ref())
            .await
    }

    /// Run a consent flow even if a usable credential is cached. The old
    /// record stays in place unless the new flow succeeds.
    pub async fn login(&self) -> Result<AuthenticatedClient, AuthError> {
        let _guard = self.lifecycle.lock().await;
        let record = self.run_consent().await?;
        AuthenticatedClient::new(record)
    }

    /// Best-effort remote revocation, then unconditional local clearing.
    pub async fn revoke_auth(&self) -> Result<RevocationOutcome, AuthError> {
        let _guard = self.lifecycle.lock().await;
        let Some(record) = self.store.load().await else {
            self.store.clear().await?;
            return Ok(RevocationOutcome::NothingStored);
        };

        let remote = self.revoke_remote(&record).await;
        self.store.clear().await?;

        match remote {
            Ok(true) => Ok(RevocationOutcome::Revoked),
            Ok(false) => Ok(RevocationOutcome::LocalOnly),
            Err(e) => {
                tracing::warn!("remote revocation failed, local credential cleared anyway: {e}");
                Ok(RevocationOutcome::LocalOnly)
            }
        }
    }

    async fn revoke_remote(&self, record: &CredentialRecord) -> Result<bool, AuthError> {
        let endpoints = self.endpoints().await?;
        let Some(revocation) = endpoints.revocation.as_deref() else {
            tracing::debug!("no revocation endpoint configured, skipping remote revocation");
            return Ok(false);
        };
        let (token, hint) = match record.refresh_token.as_deref() {
            Some(rt) => (rt, "refresh_token"),
            None => (record.access_token.as_str(), "access_token"),
        };
        self.tokens.revoke(revocation, token, hint).await?;
        Ok(true)
    }

    /// Report what is stored, without touching the network.
    pub async fn status(&self) -> CredentialStatus {
        CredentialStatus::inspect(self.store.as_ref(), self.config.expiry_skew()).await
    }
}
