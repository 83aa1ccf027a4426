use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AuthError;
use crate::oauth::record::{parse_scope, CredentialRecord};

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Upper bound on a provider-supplied `expires_in` (ten years).
const MAX_EXPIRES_IN_SECS: i64 = 10 * 365 * 24 * 3600;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Raw token response from the OAuth server.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .clamp(0, MAX_EXPIRES_IN_SECS);
        now.checked_add_signed(chrono::Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Build a record from an authorization-code grant. Falls back to the
    /// requested scopes when the provider does not echo them.
    pub fn into_record(self, now: DateTime<Utc>, requested: &[String]) -> CredentialRecord {
        let expires_at = self.expires_at(now);
        let scope = match self.scope.as_deref() {
            Some(s) => parse_scope(s),
            None => requested.iter().cloned().collect::<BTreeSet<_>>(),
        };
        CredentialRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scope,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }
    }

    /// Merge a refresh-grant response into the previous record. The previous
    /// refresh token and scope survive unless the provider sends new ones.
    pub fn refreshed(self, previous: &CredentialRecord, now: DateTime<Utc>) -> CredentialRecord {
        let expires_at = self.expires_at(now);
        CredentialRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at,
            scope: self
                .scope
                .as_deref()
                .map(parse_scope)
                .unwrap_or_else(|| previous.scope.clone()),
            token_type: self
                .token_type
                .unwrap_or_else(|| previous.token_type.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Why a token endpoint call did not produce a body.
#[derive(Debug)]
enum PostError {
    /// Network failure or server-side trouble; worth trying again later.
    Transient(String),
    /// The provider looked at the request and said no.
    Rejected { status: u16, detail: String },
}

impl PostError {
    fn describe(&self) -> String {
        match self {
            PostError::Transient(msg) => msg.clone(),
            PostError::Rejected { status, detail } => format!("status {status}: {detail}"),
        }
    }
}

fn rejection_detail(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error,
            error_description: Some(desc),
        }) => format!("{error} ({desc})"),
        Ok(OAuthErrorBody { error, .. }) => error,
        Err(_) if body.trim().is_empty() => "<no body>".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// HTTP client for the provider's token and revocation endpoints.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
}

impl TokenClient {
    pub fn new(
        client_id: &str,
        client_secret: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.map(str::to_string),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn form<'a>(&'a self, pairs: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut form = pairs.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form
    }

    async fn post_once(&self, url: &str, form: &[(&str, &str)]) -> Result<String, PostError> {
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| PostError::Transient(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(body);
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(PostError::Transient(format!(
                "{url} returned status {status}: {}",
                rejection_detail(&body)
            )));
        }
        Err(PostError::Rejected {
            status: status.as_u16(),
            detail: rejection_detail(&body),
        })
    }

    /// POST a form, retrying exactly once on a transient failure.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, PostError> {
        match self.post_once(url, form).await {
            Err(PostError::Transient(msg)) => {
                tracing::debug!("retrying token endpoint call after transient failure: {msg}");
                tokio::time::sleep(RETRY_DELAY).await;
                self.post_once(url, form).await
            }
            other => other,
        }
    }

    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, AuthError> {
        let mut pairs = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            pairs.push(("code_verifier", verifier));
        }

        let body = self
            .post_form(token_endpoint, &self.form(&pairs))
            .await
            .map_err(|e| AuthError::TokenExchange(e.describe()))?;

        serde_json::from_str(&body).map_err(|e| {
            AuthError::TokenExchange(format!("Failed to parse token response: {e}"))
        })
    }

    pub async fn refresh(
        &self,
        token_endpoint: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        let pairs = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let body = self
            .post_form(token_endpoint, &self.form(&pairs))
            .await
            .map_err(|e| AuthError::RefreshFailure {
                transient: matches!(e, PostError::Transient(_)),
                detail: e.describe(),
            })?;

        // A 200 that is not a token response (captive portals, proxies) is
        // not a verdict on the refresh token.
        serde_json::from_str(&body).map_err(|e| AuthError::RefreshFailure {
            transient: true,
            detail: format!("Failed to parse refresh response: {e}"),
        })
    }

    /// RFC 7009 revocation.
    pub async fn revoke(
        &self,
        revocation_endpoint: &str,
        token: &str,
        token_type_hint: &str,
    ) -> Result<(), AuthError> {
        let pairs = [("token", token), ("token_type_hint", token_type_hint)];
        self.post_form(revocation_endpoint, &self.form(&pairs))
            .await
            .map(|_| ())
            .map_err(|e| AuthError::Revocation(e.describe()))
    }
}
