//! Installed-app consent flow: loopback callback listener, PKCE and the
//! consent URL the user opens in a browser.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{DriveError, Result};
use crate::models::ClientSecrets;

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Random CSRF state value.
pub fn random_state() -> String {
    random_urlsafe(16)
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the URL the user visits to grant `scopes`.
pub fn consent_url(
    secrets: &ClientSecrets,
    scopes: &[String],
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
        secrets.auth_uri,
        urlencoding::encode(&secrets.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    )
}

/// Local HTTP listener that receives the OAuth redirect.
pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl CallbackListener {
    /// Bind on an ephemeral loopback port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(DriveError::CallbackListener)?;
        let port = listener
            .local_addr()
            .map_err(DriveError::CallbackListener)?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);
        info!("OAuth callback listening on {}", redirect_uri);

        Ok(Self {
            listener,
            redirect_uri,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Accept requests until the authorization redirect arrives and return
    /// its `code`.
    ///
    /// Requests without `code` or `error` (favicon requests and the like)
    /// are answered with 404 and ignored. A connection that fails to read or
    /// answer is logged and skipped; only a failing `accept` ends the wait.
    pub async fn wait_for_code(&self, expected_state: &str) -> Result<String> {
        loop {
            let (mut socket, peer) = self.listener.accept().await?;
            debug!("Callback connection from {}", peer);

            let params = match read_request(&mut socket).await {
                Ok(Some(params)) => params,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Dropping callback connection from {}: {}", peer, e);
                    continue;
                }
            };

            let (status, message, outcome) = classify(&params, expected_state);
            if let Err(e) = respond(&mut socket, status, message).await {
                warn!("Could not answer callback from {}: {}", peer, e);
            }
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }
}

/// Read the request line, drain the headers and return the query
/// parameters. `None` for a request with no target.
async fn read_request(
    socket: &mut TcpStream,
) -> std::io::Result<Option<HashMap<String, String>>> {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    // Drain headers so the connection closes cleanly.
    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    Ok(line.split_whitespace().nth(1).map(parse_query))
}

/// Reply status and page for one callback request, plus the result of the
/// wait if this request settles it.
fn classify(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> (&'static str, &'static str, Option<Result<String>>) {
    if let Some(error) = params.get("error") {
        return (
            "400 Bad Request",
            "Authorization was denied.",
            Some(Err(DriveError::ConsentDenied(error.clone()))),
        );
    }

    let (Some(code), Some(state)) = (params.get("code"), params.get("state")) else {
        return ("404 Not Found", "Not found.", None);
    };

    if state != expected_state {
        return (
            "400 Bad Request",
            "Invalid state parameter.",
            Some(Err(DriveError::ConsentDenied("state mismatch".to_string()))),
        );
    }

    (
        "200 OK",
        "The authentication flow has completed. You may close this window.",
        Some(Ok(code.clone())),
    )
}

/// Split the query part of a request target into decoded key/value pairs.
fn parse_query(target: &str) -> HashMap<String, String> {
    let query = match target.split_once('?') {
        Some((_, q)) => q,
        None => return HashMap::new(),
    };

    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let value = value.replace('+', " ");
            let value = urlencoding::decode(&value).ok()?.into_owned();
            Some((key.to_string(), value))
        })
        .collect()
}

async fn respond(socket: &mut TcpStream, status: &str, message: &str) -> std::io::Result<()> {
    let body = format!(
        "<!DOCTYPE html><html><body><p>{}</p></body></html>",
        message
    );
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}
