//! Machine-readable error codes and the reply error block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Machine-readable error codes carried in failure replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCommand,
    InvalidParams,
    AuthFailed,
    RateLimited,
    UnsafeInput,
    SessionNotFound,
    SessionNotOwned,
    ResourceExhausted,
    ElementNotFound,
    ElementNotVisible,
    ElementNotInteractable,
    Timeout,
    NavigationFailed,
    ExtractionFailed,
    Internal,
}

impl ErrorCode {
    /// Coarse error category for the reply's `error_type` field.
    pub fn error_type(self) -> &'static str {
        match self {
            ErrorCode::InvalidCommand | ErrorCode::InvalidParams => "validation",
            ErrorCode::AuthFailed => "authentication",
            ErrorCode::RateLimited => "rate_limit",
            ErrorCode::UnsafeInput => "security",
            ErrorCode::SessionNotFound | ErrorCode::SessionNotOwned => "session",
            ErrorCode::ResourceExhausted => "resource",
            ErrorCode::ElementNotFound
            | ErrorCode::ElementNotVisible
            | ErrorCode::ElementNotInteractable => "element",
            ErrorCode::Timeout => "timeout",
            ErrorCode::NavigationFailed => "navigation",
            ErrorCode::ExtractionFailed => "extraction",
            ErrorCode::Internal => "internal",
        }
    }
}

/// Error block carried by a failure reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    pub error_code: ErrorCode,
    pub error_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            error_code: code,
            error_type: code.error_type().to_string(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Field-level validation failures for incoming frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} out of range ({min}..={max})")]
    OutOfRange { field: &'static str, min: u64, max: u64 },

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

impl ValidationError {
    /// The offending field name, for the reply's details map.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(f) => f,
            ValidationError::OutOfRange { field, .. } => field,
            ValidationError::InvalidField { field, .. } => field,
        }
    }
}
