// src/error.rs

//! Unified error handling for the harvester.
//!
//! Two layers:
//! - [`FetchError`]: outcome taxonomy of a single logical upstream request.
//!   Callers match on variants (`NotFound` as "no data", `Cancelled`
//!   as fatal) instead of on messages.
//! - [`AppError`]: everything that can abort a flow or the CLI.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of one logical request issued through the request engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Network failure or timeout that persisted through every attempt.
    #[error("transport failure after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// Body could not be parsed as JSON. Never retried.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// Upstream kept throttling until the attempt budget ran out.
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    /// Upstream answered with an unrecognized business code.
    #[error("upstream error {code}: {message}")]
    Upstream { code: String, message: String },

    /// Non-success HTTP status that is not worth retrying.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The resource does not exist (HTTP 404).
    #[error("resource not found")]
    NotFound,

    /// The run was cancelled while the request was in flight.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Short stable label used in logs and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream_error",
            Self::Status(_) => "http_status",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Upstream request failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A harvest stage finished but could not complete its sweep
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a stage error with context.
    pub fn stage(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }
}
