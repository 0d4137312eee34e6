// src/models/check.rs

//! Outcome of one fetch-extract-compare cycle.

use thiserror::Error;

use crate::error::{AppError, ExtractionError, FetchError};

/// A pipeline failure, recorded on the rule instead of returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

impl From<CheckError> for AppError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Fetch(e) => AppError::Fetch(e),
            CheckError::Extraction(e) => AppError::Extraction(e),
        }
    }
}

/// Result of a single check. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// Extraction succeeded; `changed` is true when the value differs from
    /// the stored one (including the first successful check).
    Extracted { extracted: String, changed: bool },

    /// Fetch or extraction failed.
    Failed { error: CheckError, message: String },
}

impl CheckResult {
    pub fn failed(error: impl Into<CheckError>) -> Self {
        let error = error.into();
        let message = error.to_string();
        Self::Failed { error, message }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Extracted { .. })
    }

    pub fn changed(&self) -> bool {
        matches!(self, Self::Extracted { changed: true, .. })
    }

    pub fn extracted(&self) -> Option<&str> {
        match self {
            Self::Extracted { extracted, .. } => Some(extracted),
            Self::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Extracted { .. } => None,
            Self::Failed { message, .. } => Some(message),
        }
    }
}
