pub mod token_server;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokenkeeper::oauth::BrowserOpener;
use tokenkeeper::{AuthConfig, CredentialRecord};

/// What the fake user does with the consent page.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Consent {
    Approve(&'static str),
    ForgeState(&'static str),
    Deny,
    Ignore,
}

/// Browser stand-in: instead of showing the consent page, it follows the
/// redirect the provider would have issued.
pub struct ScriptedBrowser {
    consent: Consent,
    opened: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedBrowser {
    pub fn new(consent: Consent) -> Arc<Self> {
        Arc::new(Self {
            consent,
            opened: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.urls.lock().unwrap().last().cloned()
    }
}

impl BrowserOpener for ScriptedBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        let query: HashMap<String, String> = reqwest::Url::parse(url)
            .map_err(|e| e.to_string())?
            .query_pairs()
            .into_owned()
            .collect();
        let redirect = query["redirect_uri"].clone();
        let state = query["state"].clone();

        let callback = match &self.consent {
            Consent::Approve(code) => format!("{redirect}?code={code}&state={state}"),
            Consent::ForgeState(code) => format!("{redirect}?code={code}&state=forged-{state}"),
            Consent::Deny => format!("{redirect}?error=access_denied&state={state}"),
            Consent::Ignore => return Ok(()),
        };
        tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });
        Ok(())
    }
}

/// Config pointing the token and revocation endpoints at a mock server and
/// the listener at an ephemeral port.
#[allow(dead_code)]
pub fn test_config(server_uri: &str) -> AuthConfig {
    AuthConfig {
        client_id: "test-client".into(),
        authorization_endpoint: Some("https://auth.example.test/authorize".into()),
        token_endpoint: Some(format!("{server_uri}/token")),
        revocation_endpoint: Some(format!("{server_uri}/revoke")),
        scopes: vec!["read".into(), "write".into()],
        callback_port: 0,
        consent_timeout_secs: 10,
        request_timeout_secs: 5,
        ..AuthConfig::default()
    }
}

#[allow(dead_code)]
pub fn stored_record(access: &str, expires_in: Duration, refresh: Option<&str>) -> CredentialRecord {
    CredentialRecord {
        access_token: access.into(),
        refresh_token: refresh.map(str::to_string),
        expires_at: Utc::now() + expires_in,
        scope: ["read".to_string()].into_iter().collect(),
        token_type: "Bearer".into(),
    }
}
