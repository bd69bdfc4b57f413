//! # Tessera HTTP Client
//!
//! Thin wrapper around the Tessera REST API for the MCP server.

use serde_json::Value;

/// Errors from the HTTP client layer.
#[derive(Debug)]
pub enum ClientError {
    /// Cannot reach the Tessera server.
    ConnectionFailed(String),
    /// 429 Too Many Requests.
    RateLimited,
    /// Server returned a 5xx error.
    ServerError(u16, String),
    /// Failed to parse response body.
    ParseError(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(url) => write!(f, "Cannot connect to Tessera at {url}"),
            Self::RateLimited => write!(f, "Rate limited: too many requests"),
            Self::ServerError(status, msg) => write!(f, "Server error ({status}): {msg}"),
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Clone)]
pub struct TesseraClient {
    http: reqwest::Client,
    base_url: String,
}

impl TesseraClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map transport status to errors. 4xx bodies are returned as-is: they
    /// carry `success: false` and the server's message.
    async fn handle_response(&self, resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status.as_u16(), body));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {e}", self.base_url)))?;
        self.handle_response(resp).await
    }

    /// GET /status
    pub async fn status(&self) -> Result<Value, ClientError> {
        self.send(self.http.get(self.url("/status"))).await
    }

    /// POST /store
    pub async fn store(&self, body: &Value) -> Result<Value, ClientError> {
        self.send(self.http.post(self.url("/store")).json(body)).await
    }

    /// POST /search
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Value, ClientError> {
        let body = serde_json::json!({ "query": query, "limit": limit });
        self.send(self.http.post(self.url("/search")).json(&body)).await
    }

    /// POST /graph
    pub async fn graph(&self, entity: &str, depth: Option<usize>) -> Result<Value, ClientError> {
        let body = serde_json::json!({ "entity": entity, "depth": depth });
        self.send(self.http.post(self.url("/graph")).json(&body)).await
    }

    /// GET /entities
    pub async fn entities(&self, pattern: Option<&str>) -> Result<Value, ClientError> {
        let mut req = self.http.get(self.url("/entities"));
        if let Some(p) = pattern {
            req = req.query(&[("pattern", p)]);
        }
        self.send(req).await
    }
}
