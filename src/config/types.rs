use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub const DEFAULT_CALLBACK_PORT: u16 = 8976;
pub const CALLBACK_PATH: &str = "/oauth/callback";
/// Largest accepted `expirySkewSecs` (one day).
pub const MAX_EXPIRY_SKEW_SECS: u64 = 24 * 3600;

/// Client registration and tuning knobs for one OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Base URL used for `.well-known` discovery when endpoints are omitted.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    #[serde(default = "default_consent_timeout_secs")]
    pub consent_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_expiry_skew_secs")]
    pub expiry_skew_secs: u64,
    #[serde(default = "default_true")]
    pub use_pkce: bool,
    #[serde(default = "default_true")]
    pub open_browser: bool,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

fn default_callback_port() -> u16 {
    DEFAULT_CALLBACK_PORT
}

fn default_consent_timeout_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_expiry_skew_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            issuer: None,
            authorization_endpoint: None,
            token_endpoint: None,
            revocation_endpoint: None,
            scopes: Vec::new(),
            callback_port: default_callback_port(),
            consent_timeout_secs: default_consent_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            expiry_skew_secs: default_expiry_skew_secs(),
            use_pkce: true,
            open_browser: true,
            credentials_path: None,
        }
    }
}

/// Loopback redirect URI for a listener bound on `port`.
pub fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{port}{CALLBACK_PATH}")
}

impl AuthConfig {
    pub fn redirect_uri(&self) -> String {
        redirect_uri(self.callback_port)
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn expiry_skew(&self) -> chrono::Duration {
        let secs = self.expiry_skew_secs.min(MAX_EXPIRY_SKEW_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    /// Reject configs that cannot possibly complete a flow.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration(
                "clientId is not set (config file or TOKENKEEPER_CLIENT_ID)".into(),
            ));
        }
        if self.issuer.is_none()
            && (self.authorization_endpoint.is_none() || self.token_endpoint.is_none())
        {
            return Err(AuthError::Configuration(
                "either issuer or both authorizationEndpoint and tokenEndpoint must be set".into(),
            ));
        }
        if self.expiry_skew_secs > MAX_EXPIRY_SKEW_SECS {
            return Err(AuthError::Configuration(format!(
                "expirySkewSecs {} is larger than the maximum of {MAX_EXPIRY_SKEW_SECS}",
                self.expiry_skew_secs
            )));
        }
        for (name, value) in [
            ("issuer", &self.issuer),
            ("authorizationEndpoint", &self.authorization_endpoint),
            ("tokenEndpoint", &self.token_endpoint),
            ("revocationEndpoint", &self.revocation_endpoint),
        ] {
            if let Some(url) = value {
                reqwest::Url::parse(url).map_err(|e| {
                    AuthError::Configuration(format!("{name} '{url}' is not a valid URL: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

/// Provider endpoints after discovery has filled any gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorization: String,
    pub token: String,
    pub revocation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_config_applies_defaults() {
        let json = r#"{
            "clientId": "abc.apps",
            "authorizationEndpoint": "https://accounts.example.com/o/oauth2/auth",
            "tokenEndpoint": "https://oauth2.example.com/token"
        }"#;
        let cfg: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.client_id, "abc.apps");
        assert_eq!(cfg.callback_port, DEFAULT_CALLBACK_PORT);
        assert_eq!(cfg.consent_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.expiry_skew(), chrono::Duration::seconds(60));
        assert!(cfg.use_pkce);
        assert!(cfg.open_browser);
        assert!(cfg.scopes.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn redirect_uri_uses_callback_port() {
        let cfg = AuthConfig {
            callback_port: 9123,
            ..AuthConfig::default()
        };
        assert_eq!(cfg.redirect_uri(), "http://127.0.0.1:9123/oauth/callback");
    }

    #[test]
    fn validate_rejects_missing_client_id() {
        let cfg = AuthConfig {
            issuer: Some("https://auth.example.com".into()),
            ..AuthConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
        assert!(err.to_string().contains("clientId"));
    }

    #[test]
    fn validate_rejects_missing_endpoints_without_issuer() {
        let cfg = AuthConfig {
            client_id: "id".into(),
            token_endpoint: Some("https://auth.example.com/token".into()),
            ..AuthConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_url() {
        let cfg = AuthConfig {
            client_id: "id".into(),
            authorization_endpoint: Some("not a url".into()),
            token_endpoint: Some("https://auth.example.com/token".into()),
            ..AuthConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("authorizationEndpoint"));
    }

    #[test]
    fn oversized_expiry_skew_is_rejected_and_clamped() {
        let cfg = AuthConfig {
            client_id: "id".into(),
            issuer: Some("https://auth.example.com".into()),
            expiry_skew_secs: u64::MAX,
            ..AuthConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("expirySkewSecs"));
        assert_eq!(
            cfg.expiry_skew(),
            chrono::Duration::seconds(MAX_EXPIRY_SKEW_SECS as i64)
        );
    }
}
