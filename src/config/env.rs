use crate::error::AuthError;

use super::types::AuthConfig;

/// Expand environment variable references in a string.
///
/// Supported syntaxes:
/// - `${VAR}` - replaced with env var value; error if unset
/// - `${VAR:-fallback}` - replaced with env var value, or fallback if unset or empty
///
/// A `$` not followed by `{` is kept literally.
pub fn expand_env_vars(input: &str) -> Result<String, AuthError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }

        chars.next(); // consume '{'
        let mut var_expr = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            var_expr.push(c);
        }
        if !found_close {
            return Err(AuthError::Configuration(format!(
                "Unclosed variable reference: ${{{var_expr}"
            )));
        }

        match var_expr.split_once(":-") {
            Some((name, fallback)) => match std::env::var(name) {
                Ok(val) if !val.is_empty() => result.push_str(&val),
                _ => result.push_str(fallback),
            },
            None => {
                let val = std::env::var(&var_expr).map_err(|_| {
                    AuthError::Configuration(format!(
                        "Environment variable '{var_expr}' is not set"
                    ))
                })?;
                result.push_str(&val);
            }
        }
    }

    Ok(result)
}

fn expand_opt(value: &mut Option<String>) -> Result<(), AuthError> {
    if let Some(v) = value {
        *v = expand_env_vars(v)?;
    }
    Ok(())
}

/// Expand environment variables in every string field of an `AuthConfig`.
pub fn expand_auth_config(config: &mut AuthConfig) -> Result<(), AuthError> {
    config.client_id = expand_env_vars(&config.client_id)?;
    expand_opt(&mut config.client_secret)?;
    expand_opt(&mut config.issuer)?;
    expand_opt(&mut config.authorization_endpoint)?;
    expand_opt(&mut config.token_endpoint)?;
    expand_opt(&mut config.revocation_endpoint)?;
    for scope in &mut config.scopes {
        *scope = expand_env_vars(scope)?;
    }
    if let Some(path) = &config.credentials_path {
        let expanded = expand_env_vars(&path.to_string_lossy())?;
        config.credentials_path = Some(expanded.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_dollar_brace_var() {
        std::env::set_var("TOKENKEEPER_TEST_VAR1", "hello");
        let result = expand_env_vars("prefix-${TOKENKEEPER_TEST_VAR1}-suffix").unwrap();
        assert_eq!(result, "prefix-hello-suffix");
        std::env::remove_var("TOKENKEEPER_TEST_VAR1");
    }

    #[test]
    fn expand_unset_errors() {
        std::env::remove_var("TOKENKEEPER_TEST_UNSET_XYZ");
        let err = expand_env_vars("${TOKENKEEPER_TEST_UNSET_XYZ}").unwrap_err();
        assert!(err.to_string().contains("TOKENKEEPER_TEST_UNSET_XYZ"));
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn expand_fallback_when_unset() {
        std::env::remove_var("TOKENKEEPER_TEST_FB_UNSET");
        let result = expand_env_vars("${TOKENKEEPER_TEST_FB_UNSET:-default_val}").unwrap();
        assert_eq!(result, "default_val");
    }

    #[test]
    fn expand_fallback_when_empty() {
        std::env::set_var("TOKENKEEPER_TEST_FB_EMPTY", "");
        let result = expand_env_vars("${TOKENKEEPER_TEST_FB_EMPTY:-fallback}").unwrap();
        assert_eq!(result, "fallback");
        std::env::remove_var("TOKENKEEPER_TEST_FB_EMPTY");
    }

    #[test]
    fn unclosed_reference_errors() {
        let err = expand_env_vars("${OOPS").unwrap_err();
        assert!(err.to_string().contains("Unclosed"));
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand_env_vars("cost $5").unwrap(), "cost $5");
    }

    #[test]
    fn expand_auth_config_expands_secret_and_endpoints() {
        std::env::set_var("TOKENKEEPER_TEST_SECRET", "s3cret");
        std::env::set_var("TOKENKEEPER_TEST_HOST", "https://auth.example.com");

        let mut cfg = AuthConfig {
            client_id: "plain-id".into(),
            client_secret: Some("${TOKENKEEPER_TEST_SECRET}".into()),
            token_endpoint: Some("${TOKENKEEPER_TEST_HOST}/token".into()),
            scopes: vec!["${TOKENKEEPER_TEST_SCOPE_UNSET:-read}".into()],
            ..AuthConfig::default()
        };
        expand_auth_config(&mut cfg).unwrap();

        assert_eq!(cfg.client_id, "plain-id");
        assert_eq!(cfg.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            cfg.token_endpoint.as_deref(),
            Some("https://auth.example.com/token")
        );
        assert_eq!(cfg.scopes, vec!["read"]);

        std::env::remove_var("TOKENKEEPER_TEST_SECRET");
        std::env::remove_var("TOKENKEEPER_TEST_HOST");
    }
}
