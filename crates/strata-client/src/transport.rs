use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// HTTP method of one API request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One request against the API, expressed independently of the wire client.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of one outgoing query parameter, if present.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// The response envelope every API call returns.
///
/// `entities` is the result page in server order; `cursor` is the opaque
/// forward-paging token, present iff a further page exists. Envelope fields
/// this SDK does not interpret are retained in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiResponse {
    pub fn first_entity(&self) -> Option<&Value> {
        self.entities.first()
    }

    pub fn has_cursor(&self) -> bool {
        self.cursor.is_some()
    }
}

/// The error body the API sends alongside a non-2xx status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub exception: Option<String>,
}

/// Transport-level failure taxonomy.
///
/// `NotFound` is the "resource absent / no results" class: collections that
/// have never had an entity written do not exist server-side, and the paging
/// layer treats this outcome as a legitimately empty page rather than an
/// error. Everything else surfaces to the caller with local state untouched.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("resource not found: {path}")]
    NotFound { path: String },

    #[error("api error {status}: {code}: {description}")]
    Api {
        status: u16,
        code: String,
        description: String,
    },

    #[error("network failure: {0}")]
    Network(String),

    #[error("response decode failed: {0}")]
    Decode(String),
}

/// Issues one API request and returns the parsed envelope.
///
/// Retries, TLS, auth-header injection, and credential refresh are entirely
/// the implementation's concern; the paging layer issues exactly one `send`
/// per fetch and never inspects anything below the parsed envelope.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}
