// src/services/transport.rs

//! The seam between the request engine and the network.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// HTTP method of an upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One upstream request, fixed for every retry of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Value of a body field or query parameter, rendered as a string.
    pub fn param(&self, key: &str) -> Option<String> {
        if let Some(value) = self.body.as_ref().and_then(|b| b.get(key)) {
            return Some(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

/// Raw HTTP outcome: status plus undecoded body text.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Connection-level failure (DNS, connect, reset, timeout).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timeout: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            message: "operation timed out".to_string(),
            timeout: true,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            timeout: e.is_timeout(),
            message: e.to_string(),
        }
    }
}

/// Sends one request and returns the raw response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn param_reads_body_then_query() {
        let post = ApiRequest::post_json("https://x/api", json!({"page": 2, "uri": "a/b"}));
        assert_eq!(post.param("page"), Some("2".to_string()));
        assert_eq!(post.param("uri"), Some("a/b".to_string()));
        assert_eq!(post.param("size"), None);

        let get = ApiRequest::get("https://x/web").with_query([("page", "3")]);
        assert_eq!(get.param("page"), Some("3".to_string()));
    }
}
