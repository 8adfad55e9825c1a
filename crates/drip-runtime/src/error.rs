//! Runtime error types.

use drip_filter::FilterError;
use thiserror::Error;

use crate::ids::StepId;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors raised by the automation engine.
///
/// Every variant falls in exactly one class: benign (the job is done),
/// transient (the queue retries the job) or fatal (the job is dropped and the
/// ledger is left untouched).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A referenced entity no longer exists.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity (`contact`, `step`, `automation`).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A step's configuration does not satisfy its subtype's schema.
    #[error("invalid configuration for step {step_id}: {message}")]
    InvalidConfiguration {
        /// Step with the invalid configuration.
        step_id: StepId,
        /// What is wrong.
        message: String,
    },

    /// An automation's steps do not form a valid graph.
    #[error("invalid automation graph: {0}")]
    InvalidGraph(String),

    /// A filter failed to compile.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// A store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// Enqueueing a job failed.
    #[error("queue error: {0}")]
    Queue(String),

    /// The email sender rejected or failed a send.
    #[error("email error: {0}")]
    Email(String),

    /// A payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Creates a not found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_configuration(step_id: StepId, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            step_id,
            message: message.into(),
        }
    }

    /// Creates an invalid graph error.
    pub fn invalid_graph(message: impl Into<String>) -> Self {
        Self::InvalidGraph(message.into())
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Creates an email error.
    pub fn email(message: impl Into<String>) -> Self {
        Self::Email(message.into())
    }

    /// Returns whether the error means the work is already gone.
    #[inline]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns whether retrying the job may succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Queue(_) | Self::Email(_))
    }

    /// Returns whether the error is a data-integrity failure.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !self.is_benign() && !self.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_exclusive() {
        let errors = [
            RuntimeError::not_found("contact", "c-1"),
            RuntimeError::invalid_configuration(StepId::new(), "missing tagId"),
            RuntimeError::invalid_graph("two triggers"),
            RuntimeError::store("connection reset"),
            RuntimeError::queue("stream unavailable"),
            RuntimeError::email("smtp 451"),
        ];

        for error in &errors {
            let classes = [error.is_benign(), error.is_transient(), error.is_fatal()];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{error}");
        }
    }

    #[test]
    fn test_messages() {
        let error = RuntimeError::not_found("step", "42");
        assert_eq!(error.to_string(), "step 42 not found");
        assert!(error.is_benign());
        assert!(RuntimeError::email("timeout").is_transient());
        assert!(RuntimeError::invalid_graph("cycle").is_fatal());
    }
}
