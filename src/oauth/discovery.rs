use serde::Deserialize;

use crate::config::{AuthConfig, Endpoints};
use crate::error::AuthError;

#[derive(Debug, Deserialize)]
pub struct OAuthMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

const WELL_KNOWN_PATHS: [&str; 2] = [
    ".well-known/oauth-authorization-server",
    ".well-known/openid-configuration",
];

fn build_discovery_url(issuer: &str, well_known: &str) -> String {
    format!("{}/{well_known}", issuer.trim_end_matches('/'))
}

/// Fetch authorization server metadata, trying RFC 8414 first and OpenID
/// Connect discovery second.
pub async fn discover_oauth_metadata(
    http: &reqwest::Client,
    issuer: &str,
) -> Result<OAuthMetadata, AuthError> {
    let mut failures = Vec::new();
    for well_known in WELL_KNOWN_PATHS {
        let url = build_discovery_url(issuer, well_known);
        let resp = match http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                failures.push(format!("{url}: {e}"));
                continue;
            }
        };
        if !resp.status().is_success() {
            failures.push(format!("{url}: status {}", resp.status()));
            continue;
        }
        return resp.json::<OAuthMetadata>().await.map_err(|e| {
            AuthError::Discovery(format!("Failed to parse OAuth metadata from {url}: {e}"))
        });
    }
    Err(AuthError::Discovery(failures.join("; ")))
}

/// Use configured endpoints where present, discovering only when something
/// required is missing.
pub async fn resolve_endpoints(
    config: &AuthConfig,
    http: &reqwest::Client,
) -> Result<Endpoints, AuthError> {
    if let (Some(authorization), Some(token)) =
        (&config.authorization_endpoint, &config.token_endpoint)
    {
        return Ok(Endpoints {
            authorization: authorization.clone(),
            token: token.clone(),
            revocation: config.revocation_endpoint.clone(),
        });
    }

    let issuer = config.issuer.as_deref().ok_or_else(|| {
        AuthError::Configuration(
            "authorizationEndpoint/tokenEndpoint missing and no issuer to discover them".into(),
        )
    })?;
    let metadata = discover_oauth_metadata(http, issuer).await?;
    tracing::debug!(issuer, "discovered OAuth endpoints");

    Ok(Endpoints {
        authorization: config
            .authorization_endpoint
            .clone()
            .unwrap_or(metadata.authorization_endpoint),
        token: config
            .token_endpoint
            .clone()
            .unwrap_or(metadata.token_endpoint),
        revocation: config
            .revocation_endpoint
            .clone()
            .or(metadata.revocation_endpoint),
    })
}
