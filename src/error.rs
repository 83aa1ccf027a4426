use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timed out waiting for OAuth consent after {}s. Run the command again to retry.", .0.as_secs())]
    ConsentTimeout(Duration),

    #[error("OAuth callback state did not match the pending consent flow; the redirect was rejected")]
    ConsentStateMismatch,

    #[error("{}", format_denied(.error, .description.as_deref()))]
    ConsentDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("{}", format_refresh(.transient, .detail))]
    RefreshFailure { transient: bool, detail: String },

    #[error("OAuth discovery failed: {0}")]
    Discovery(String),

    #[error("Token revocation failed: {0}")]
    Revocation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_denied(error: &str, description: Option<&str>) -> String {
    match description {
        Some(d) => format!("Authorization denied by provider: {error} ({d})"),
        None => format!("Authorization denied by provider: {error}"),
    }
}

fn format_refresh(transient: &bool, detail: &str) -> String {
    if *transient {
        format!("Token refresh failed (temporary, retry later): {detail}")
    } else {
        format!("Token refresh failed, re-consent required: {detail}")
    }
}

impl AuthError {
    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration_error",
            AuthError::ConsentTimeout(_) => "consent_timeout",
            AuthError::ConsentStateMismatch => "consent_state_mismatch",
            AuthError::ConsentDenied { .. } => "consent_denied",
            AuthError::TokenExchange(_) => "token_exchange_failure",
            AuthError::RefreshFailure { .. } => "refresh_failure",
            AuthError::Discovery(_) => "discovery_error",
            AuthError::Revocation(_) => "revocation_error",
            AuthError::Io(_) => "io_error",
        }
    }

    /// Which lifecycle step produced the error.
    pub fn step(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration",
            AuthError::ConsentTimeout(_)
            | AuthError::ConsentStateMismatch
            | AuthError::ConsentDenied { .. } => "consent",
            AuthError::TokenExchange(_) => "code_exchange",
            AuthError::RefreshFailure { .. } => "refresh",
            AuthError::Discovery(_) => "discovery",
            AuthError::Revocation(_) => "revocation",
            AuthError::Io(_) => "storage",
        }
    }

    /// Whether retrying the top-level operation will need the user to consent
    /// in the browser again.
    pub fn requires_reconsent(&self) -> bool {
        match self {
            AuthError::ConsentTimeout(_)
            | AuthError::ConsentStateMismatch
            | AuthError::ConsentDenied { .. }
            | AuthError::TokenExchange(_) => true,
            AuthError::RefreshFailure { transient, .. } => !transient,
            AuthError::Configuration(_)
            | AuthError::Discovery(_)
            | AuthError::Revocation(_)
            | AuthError::Io(_) => false,
        }
    }

    /// Whether the same call is worth retrying without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::RefreshFailure { transient: true, .. })
    }

    /// Produce a structured JSON error object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "step": self.step(),
                "message": self.to_string(),
                "requiresReconsent": self.requires_reconsent(),
            }
        })
    }
}
