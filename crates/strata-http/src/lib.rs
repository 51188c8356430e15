//! reqwest-backed `Transport` for the Strata REST API.
//!
//! Owns everything the paging layer treats as a collaborator concern: URL
//! assembly, bearer-token injection, and mapping wire failures onto the
//! `TransportError` taxonomy. Token *issuing* (login, refresh) is external;
//! this crate only carries whatever token it was handed.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::StatusCode;
use strata_client::{ApiRequest, ApiResponse, ErrorEnvelope, Method, Transport, TransportError};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// HTTP transport against one API base URL.
///
/// Cloning is cheap and clones share the token slot, so a login flow can
/// update the token on one handle and every client built from the transport
/// picks it up.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self.token.read() {
            Ok(token) if token.is_some() => "<set>",
            Ok(_) => "<unset>",
            Err(_) => "<poisoned>",
        };
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("token", &token)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Base URL and token from `STRATA_BASE_URL` / `STRATA_ACCESS_TOKEN`,
    /// with the local default when unset.
    pub fn from_env() -> Self {
        let base_url = std::env::var("STRATA_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport = Self::new(base_url);
        if let Some(token) = std::env::var("STRATA_ACCESS_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            transport.set_token(token);
        }
        transport
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(token);
        self
    }

    /// Install or replace the bearer token sent with every request.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.into());
        }
    }

    pub fn clear_token(&self) {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.endpoint(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = self.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            TransportError::Network(format!("http {} failed: {err}", request.method.as_str()))
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::Network(format!("http read body failed: {err}")))?;

        if !status.is_success() {
            return Err(classify_failure(status, &text, &request.path));
        }
        serde_json::from_str(&text)
            .map_err(|err| TransportError::Decode(format!("response json decode failed: {err}")))
    }
}

/// Map a non-2xx response onto the transport taxonomy.
///
/// 404 and the API's `*_not_found` error-code family are the "resource
/// absent" class the paging layer tolerates as an empty page; everything
/// else is a hard API error carrying the envelope's code and description.
fn classify_failure(status: StatusCode, body: &str, path: &str) -> TransportError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let code = envelope
        .error
        .or(envelope.exception)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown")
                .to_string()
        });

    if status == StatusCode::NOT_FOUND || code.ends_with("_not_found") {
        return TransportError::NotFound {
            path: path.to_string(),
        };
    }

    TransportError::Api {
        status: status.as_u16(),
        code,
        description: envelope.error_description.unwrap_or_default(),
    }
}
