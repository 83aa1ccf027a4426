//! One interactive authorization round-trip: state generation, loopback
//! listener, browser hand-off, callback correlation, code exchange and
//! persistence.
//!
//! The listener runs in its own task and resolves a oneshot exactly once; the
//! flow races that signal against the consent timeout. Dropping the flow
//! future aborts the task, which closes the socket.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{redirect_uri, AuthConfig, Endpoints};
use crate::error::AuthError;
use crate::oauth::callback::{failure_page, success_page, CallbackServer};
use crate::oauth::pkce::{generate_pkce, generate_state, PkceChallenge};
use crate::oauth::record::CredentialRecord;
use crate::oauth::store::TokenStore;
use crate::oauth::token::TokenClient;

/// Hands the consent URL to the user.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Platform default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        webbrowser::open(url).map_err(|e| e.to_string())
    }
}

/// Only prints the URL, for headless machines.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintUrl;

impl BrowserOpener for PrintUrl {
    fn open(&self, url: &str) -> Result<(), String> {
        eprintln!("Open this URL in a browser to authorize:\n\n  {url}\n");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

/// In-memory bookkeeping for the flow in progress. Never persisted.
#[derive(Debug)]
pub struct FlowSession {
    state: String,
    started_at: DateTime<Utc>,
    status: FlowStatus,
}

impl FlowSession {
    pub fn new() -> Self {
        Self {
            state: generate_state(),
            started_at: Utc::now(),
            status: FlowStatus::Pending,
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    fn finish(&mut self, status: FlowStatus) {
        self.status = status;
        let elapsed = Utc::now() - self.started_at;
        tracing::debug!(?status, elapsed_ms = elapsed.num_milliseconds(), "consent flow finished");
    }
}

impl Default for FlowSession {
    fn default() -> Self {
        Self::new()
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Build the provider consent URL.
pub fn build_consent_url(
    config: &AuthConfig,
    authorization_endpoint: &str,
    redirect_uri: &str,
    state: &str,
    pkce: Option<&PkceChallenge>,
) -> Result<String, AuthError> {
    let mut url = reqwest::Url::parse(authorization_endpoint).map_err(|e| {
        AuthError::Configuration(format!(
            "Invalid authorization endpoint '{authorization_endpoint}': {e}"
        ))
    })?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(" "));
        }
        if let Some(pkce) = pkce {
            query
                .append_pair("code_challenge", &pkce.code_challenge)
                .append_pair("code_challenge_method", "S256");
        }
    }
    Ok(url.into())
}

/// Drives consent flows for one client registration.
pub struct ConsentFlow {
    config: AuthConfig,
    opener: Arc<dyn BrowserOpener>,
}

impl ConsentFlow {
    pub fn new(config: AuthConfig, opener: Arc<dyn BrowserOpener>) -> Self {
        Self { config, opener }
    }

    /// Run one flow to completion. The store is written only after a
    /// successful code exchange.
    pub async fn run(
        &self,
        endpoints: &Endpoints,
        tokens: &TokenClient,
        store: &dyn TokenStore,
    ) -> Result<CredentialRecord, AuthError> {
        let mut session = FlowSession::new();
        let server = CallbackServer::bind(self.config.callback_port).await?;
        let port = server.port().unwrap_or(self.config.callback_port);
        let redirect_uri = redirect_uri(port);
        let pkce = self.config.use_pkce.then(generate_pkce);
        let url = build_consent_url(
            &self.config,
            &endpoints.authorization,
            &redirect_uri,
            session.state(),
            pkce.as_ref(),
        )?;

        let (tx, rx) = oneshot::channel();
        let _listener = AbortOnDrop(tokio::spawn(server.serve(session.state().to_string(), tx)));
        tracing::info!(port, "waiting for OAuth consent");

        if let Err(e) = self.opener.open(&url) {
            tracing::warn!("Could not open browser automatically: {e}");
            eprintln!("Open this URL in a browser to authorize:\n\n  {url}\n");
        }

        let timeout = self.config.consent_timeout();
        let callback = match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                session.finish(FlowStatus::TimedOut);
                return Err(AuthError::ConsentTimeout(timeout));
            }
            Ok(Err(_)) => {
                session.finish(FlowStatus::Failed);
                return Err(AuthError::Io(std::io::Error::other(
                    "OAuth callback listener stopped unexpectedly",
                )));
            }
            Ok(Ok(Err(e))) => {
                session.finish(FlowStatus::Failed);
                return Err(e);
            }
            Ok(Ok(Ok(callback))) => callback,
        };

        let exchanged = tokens
            .exchange_code(
                &endpoints.token,
                &callback.code,
                &redirect_uri,
                pkce.as_ref().map(|p| p.code_verifier.as_str()),
            )
            .await;
        let response = match exchanged {
            Ok(response) => response,
            Err(e) => {
                callback
                    .respond("502 Bad Gateway", &failure_page(&e.to_string()))
                    .await;
                session.finish(FlowStatus::Failed);
                return Err(e);
            }
        };

        let record = response.into_record(Utc::now(), &self.config.scopes);
        if record.refresh_token.is_none() {
            tracing::warn!("provider issued no refresh token; the next expiry will need consent again");
        }
        if let Err(e) = store.save(&record).await {
            callback
                .respond("500 Internal Server Error", &failure_page(&e.to_string()))
                .await;
            session.finish(FlowStatus::Failed);
            return Err(e);
        }

        callback.respond("200 OK", &success_page()).await;
        session.finish(FlowStatus::Completed);
        tracing::info!("OAuth consent completed");
        Ok(record)
    }
}
