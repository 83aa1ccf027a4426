use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::config::CALLBACK_PATH;
use crate::error::AuthError;

const MAX_REQUEST_HEAD: usize = 8192;
/// Browsers open speculative connections that never send a request.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// A redirect that passed the state check. The browser connection stays open
/// so the final page can reflect the outcome of the code exchange.
#[derive(Debug)]
pub struct ValidCallback {
    pub code: String,
    stream: TcpStream,
}

impl ValidCallback {
    pub async fn respond(mut self, status: &str, html: &str) {
        if let Err(e) = write_response(&mut self.stream, status, html).await {
            tracing::debug!("could not deliver callback page to browser: {e}");
        }
    }
}

/// What a single HTTP request to the listener amounts to.
#[derive(Debug)]
enum Route {
    Callback(Result<String, AuthError>),
    NotFound,
    MethodNotAllowed,
}

/// Loopback listener for the provider's redirect.
#[derive(Debug)]
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            AuthError::Configuration(format!(
                "Cannot listen for the OAuth redirect on 127.0.0.1:{port}: {e}"
            ))
        })?;
        Ok(Self { listener })
    }

    pub fn port(&self) -> Option<u16> {
        self.listener.local_addr().ok().map(|a| a.port())
    }

    /// Serve until the first request to the callback route, then resolve
    /// `done` and drop the listener. Stray requests (favicon, probes) get a
    /// 404 and the server keeps waiting.
    pub async fn serve(
        self,
        expected_state: String,
        done: oneshot::Sender<Result<ValidCallback, AuthError>>,
    ) {
        let outcome = loop {
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => break Err(AuthError::Io(e)),
            };
            let read = tokio::time::timeout(HEAD_READ_TIMEOUT, read_request_head(&mut stream));
            let head = match read.await {
                Ok(Ok(head)) => head,
                Ok(Err(e)) => {
                    tracing::debug!(%peer, "dropping unreadable request: {e}");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(%peer, "dropping idle connection");
                    continue;
                }
            };

            match route(&head, &expected_state) {
                Route::NotFound => {
                    let _ = write_response(&mut stream, "404 Not Found", &page("Not found", "")).await;
                }
                Route::MethodNotAllowed => {
                    let _ = write_response(
                        &mut stream,
                        "405 Method Not Allowed",
                        &page("Method not allowed", ""),
                    )
                    .await;
                }
                Route::Callback(Ok(code)) => break Ok(ValidCallback { code, stream }),
                Route::Callback(Err(err)) => {
                    tracing::warn!("rejected OAuth callback: {err}");
                    let _ = write_response(&mut stream, "400 Bad Request", &failure_page(&err.to_string()))
                        .await;
                    break Err(err);
                }
            }
        };
        drop(self.listener);
        let _ = done.send(outcome);
    }
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    if buf.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "empty request",
        ));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn route(head: &str, expected_state: &str) -> Route {
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or("/");

    let url = match reqwest::Url::parse(&format!("http://127.0.0.1{target}")) {
        Ok(url) => url,
        Err(_) => return Route::NotFound,
    };
    if url.path() != CALLBACK_PATH {
        return Route::NotFound;
    }
    if method != "GET" {
        return Route::MethodNotAllowed;
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    Route::Callback(check_callback(&params, expected_state))
}

/// State is checked before anything else so a forged redirect can neither
/// complete nor fail the pending flow with provider-looking errors.
fn check_callback(params: &HashMap<String, String>, expected_state: &str) -> Result<String, AuthError> {
    let state = params.get("state").map(String::as_str).unwrap_or_default();
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err(AuthError::ConsentStateMismatch);
    }
    if let Some(error) = params.get("error") {
        return Err(AuthError::ConsentDenied {
            error: error.clone(),
            description: params.get("error_description").cloned(),
        });
    }
    match params.get("code") {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => Err(AuthError::TokenExchange(
            "Callback carried no authorization code".into(),
        )),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{0}</title></head>\
         <body><h1>{0}</h1><p>{1}</p></body></html>",
        html_escape(title),
        html_escape(message)
    )
}

pub fn success_page() -> String {
    page(
        "Authentication successful",
        "You can close this window and return to the terminal.",
    )
}

pub fn failure_page(reason: &str) -> String {
    page("Authentication failed", reason)
}
