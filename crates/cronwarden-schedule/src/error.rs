//! Schedule errors.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::field::Field;

/// A problem with a single token of a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field the token belongs to.
    pub field: Field,
    /// The offending token, as written.
    pub token: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    pub fn new(field: Field, token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            token: token.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.field, self.token, self.message)
    }
}

/// Schedule error types.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// One or more fields failed validation.
    #[error("Invalid schedule expression: {}", join_errors(.errors))]
    InvalidScheduleExpression { errors: Vec<FieldError> },

    /// The expression does not have exactly five fields.
    #[error("Invalid schedule expression '{expression}': expected 5 fields, found {found}")]
    WrongFieldCount { expression: String, found: usize },

    /// Unknown IANA timezone name.
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    /// No matching fire time inside the search horizon.
    #[error("No fire time within {horizon_days} days of {from}")]
    HorizonExceeded {
        from: DateTime<Utc>,
        horizon_days: u32,
    },
}

impl ScheduleError {
    /// Field level errors, if this is a validation failure.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ScheduleError::InvalidScheduleExpression { errors } => errors,
            _ => &[],
        }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
