//! Transaction request/response types and request validation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$")
        .expect("email pattern compiles")
});

/// Inbound body of `POST /transactions`.
///
/// Missing fields deserialize to empty/zero so that they are reported by
/// [`TransactionRequest::validate`] with a field-specific message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub description: String,
}

/// Rule that rejected a transaction. The display text is shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("email is required")]
    MissingEmail,
    #[error("invalid email format")]
    InvalidEmail,
    #[error("amount must be greater than 0")]
    NonPositiveAmount,
    #[error("description is required")]
    MissingDescription,
}

impl TransactionRequest {
    /// Check the request. Rules run in order and the first failure wins.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.trim().is_empty() {
            return Err(ValidationError::MissingEmail);
        }

        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail);
        }

        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(ValidationError::NonPositiveAmount);
        }

        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingDescription);
        }

        Ok(())
    }
}

/// Syntactic address check only; the domain is never resolved.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Body returned by `POST /transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub status: ResponseStatus,
    pub message: String,
}

impl TransactionResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
        }
    }
}
