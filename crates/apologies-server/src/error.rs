//! Request-level errors.
//!
//! A [`RequestError`] is client-attributable: it fails the request
//! atomically, leaves state untouched, and becomes a single
//! REQUEST_FAILED event on the offending connection. Transport errors
//! never produce one; they are handled by dropping the connection.

use apologies_protocol::FailureReason;

/// A failed request, with a typed reason and an optional comment.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    pub reason: FailureReason,
    pub comment: Option<String>,
}

impl RequestError {
    pub fn new(reason: FailureReason) -> Self {
        RequestError {
            reason,
            comment: None,
        }
    }

    pub fn with_comment(reason: FailureReason, comment: impl Into<String>) -> Self {
        RequestError {
            reason,
            comment: Some(comment.into()),
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.comment {
            Some(comment) => write!(f, "{:?}: {}", self.reason, comment),
            None => write!(f, "{:?}", self.reason),
        }
    }
}

impl std::error::Error for RequestError {}

pub type RequestResult<T> = Result<T, RequestError>;
