// src/error.rs

//! Unified error handling for the monitor.
//!
//! `AppError` is what the control surface returns to callers. The pipeline
//! errors (`FetchError`, `ExtractionError`) never reach a caller as an `Err`
//! from a check; they are recorded on the rule instead.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or used
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rule rejected on create/update
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Operation referenced an unknown rule id
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Fetch stage of a check failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Extraction stage of a check failed
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
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

    /// Create an invalid rule error.
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::InvalidRule(message.into())
    }

    /// Create a not found error for a rule id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether this error reports an unknown rule id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Failure of the HTTP fetch stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unexpected HTTP status {0}")]
    HttpError(u16),

    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// Classify a transport error reported by reqwest.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let detail = err.to_string();
        if err.is_timeout() {
            Self::Timeout(detail)
        } else if err.is_connect() {
            Self::ConnectionFailed(detail)
        } else if err.is_builder() {
            Self::InvalidUrl(detail)
        } else if let Some(status) = err.status() {
            Self::HttpError(status.as_u16())
        } else {
            Self::Request(detail)
        }
    }
}

/// Failure of the extraction stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no match for '{0}'")]
    NoMatch(String),

    #[error("invalid expression '{expr}': {message}")]
    InvalidExpr { expr: String, message: String },

    #[error("body is not valid JSON: {0}")]
    ParseError(String),
}

impl ExtractionError {
    /// Create an invalid expression error.
    pub fn invalid_expr(expr: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidExpr {
            expr: expr.into(),
            message: message.to_string(),
        }
    }

    /// Create a no-match error.
    pub fn no_match(expr: impl Into<String>) -> Self {
        Self::NoMatch(expr.into())
    }
}
