//! Signaling token acquisition against the directory.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use gann_common::types::{normalize_id, Token};

use crate::error::{Error, Result};

/// Issues short-lived signaling bearer tokens.
///
/// Stateless per call: callers are expected to mint a fresh token per
/// session attempt rather than cache one here.
pub struct TokenService {
    http: Client,
    base_url: String,
    api_key: String,
}

impl TokenService {
    /// Creates a service against a directory base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Mints a signaling token for one agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] when the request fails or the response is
    /// missing or malformed, and [`Error::Validation`] for an empty agent id.
    pub async fn issue_signaling_token(&self, agent_id: &str) -> Result<Token> {
        let agent_id = normalize_id(agent_id)
            .ok_or_else(|| Error::validation("agent id must not be empty"))?;
        let url = format!("{}/.gann/ws/token", self.base_url.trim_end_matches('/'));
        debug!(%url, agent_id = %agent_id, "requesting signaling token");

        let response = self
            .http
            .post(&url)
            .header("GANN-API-KEY", &self.api_key)
            .header("GANN-AGENT-ID", &agent_id)
            .send()
            .await
            .map_err(|e| Error::Token(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Token(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Token(format!("token response is not JSON: {e}")))?;
        parse_token_response(&body)
    }
}

/// Extracts and validates `{ token, expires_at }` from a directory response.
pub(crate) fn parse_token_response(body: &Value) -> Result<Token> {
    let raw_token = body
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Token("token missing from response".to_string()))?;
    let raw_expires = body
        .get("expires_at")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Token("expires_at missing from response".to_string()))?;
    Token::new(raw_token, raw_expires).map_err(|e| Error::Token(e.to_string()))
}

/// Derives the signaling socket URL from a directory base URL.
///
/// `https` becomes `wss`, `http` becomes `ws`; the path gains `/.gann/ws`
/// and the token rides along URL-encoded in the query string.
///
/// # Errors
///
/// Returns [`Error::Validation`] for an unparseable base URL or a scheme
/// that is neither HTTP nor WebSocket.
pub fn signaling_ws_url(base_url: &str, token: &str) -> Result<String> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::validation(format!("invalid directory base url: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::validation(format!(
                "unsupported directory url scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::validation("failed to derive websocket scheme"))?;

    let path = format!("{}/.gann/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url.to_string())
}
