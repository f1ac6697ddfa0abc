//! Error types for reconciliation runs.
//!
//! Errors are categorized so callers can tell a broken desired-state
//! specification (never worth retrying) from a backend failure that may be
//! transient. Resource implementations return `anyhow::Result`; the engine
//! downcasts to [`Error`] to recover the category and treats anything else
//! as a backend failure.

use crate::target::BackendKind;
use crate::task::TaskKey;
use thiserror::Error;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The desired state itself is invalid (cycles, immutable changes, ...)
    Configuration,
    /// The backend reported a failure while discovering or applying
    Backend,
    /// The backend refused access to the resource
    Permission,
    /// The run was cancelled before the task finished
    Cancelled,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Invalid desired state",
            Self::Backend => "Backend failure",
            Self::Permission => "Permission denied",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Errors produced while building, validating or applying a task graph.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph contains at least one directed cycle
    #[error("dependency cycle between tasks: {}", join_keys(tasks))]
    Cycle {
        /// Every task participating in a cycle, sorted
        tasks: Vec<TaskKey>,
    },

    /// A task links to or depends on a task that is not part of the run
    #[error("{from} depends on {missing}, which is not part of this run")]
    MissingDependency {
        /// The task declaring the dependency
        from: TaskKey,
        /// The key it named
        missing: TaskKey,
    },

    /// Two tasks share a kind and name
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskKey),

    /// Tasks in the run do not implement the selected backend
    #[error("{backend} backend is not supported by: {}", join_keys(tasks))]
    UnsupportedBackend {
        /// The backend selected for the run
        backend: BackendKind,
        /// The tasks that cannot be rendered through it
        tasks: Vec<TaskKey>,
    },

    /// Discovery found more than one candidate for a task
    #[error("found {count} matches for {what}")]
    AmbiguousMatch {
        /// Description of what was searched for
        what: String,
        /// Number of candidates found
        count: usize,
    },

    /// A field required at creation time is unset
    #[error("field is required: {0}")]
    RequiredField(&'static str),

    /// A change was requested on a field that cannot change in place
    #[error("field cannot be changed: {0}")]
    CannotChangeField(&'static str),

    /// A task whose lifecycle requires an existing resource found none
    #[error("{0} was not found")]
    NotFound(TaskKey),

    /// A task whose lifecycle forbids changes does not match
    #[error("{key} does not match the desired state (changed: {})", fields.join(", "))]
    Drift {
        /// The drifting task
        key: TaskKey,
        /// Names of the fields that differ
        fields: Vec<&'static str>,
    },

    /// A link could not be resolved to an identifier
    #[error("{0} has no identifier yet")]
    UnresolvedLink(TaskKey),

    /// A template references a resource block that was never rendered
    #[error("{from} references {missing}, which was never rendered")]
    UnresolvedReference {
        /// The task whose block holds the reference
        from: TaskKey,
        /// The `type.name` address that is missing
        missing: String,
    },

    /// The backend denied access
    #[error("permission denied: {0}")]
    Permission(String),

    /// The backend reported a failure
    #[error("{message}")]
    Backend {
        /// Rendered error chain
        message: String,
        /// Whether retrying the same call may succeed
        retryable: bool,
    },

    /// Template serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Backend { .. } | Error::Json(_) => ErrorCategory::Backend,
            Error::Permission(_) => ErrorCategory::Permission,
            Error::Cancelled => ErrorCategory::Cancelled,
            _ => ErrorCategory::Configuration,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Backend { retryable: true, .. })
    }

    /// Shorthand for a non-retryable backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Recover a typed error from a resource's `anyhow` error.
    ///
    /// Anything that is not already an [`Error`] becomes a backend failure
    /// carrying the full context chain.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(typed) => typed,
            Err(other) => match other.root_cause().downcast_ref::<Error>() {
                Some(Error::Permission(msg)) => Error::Permission(format!("{other:#}: {msg}")),
                Some(Error::Backend { retryable, .. }) => Error::Backend {
                    message: format!("{other:#}"),
                    retryable: *retryable,
                },
                _ => Error::backend(format!("{other:#}")),
            },
        }
    }
}

fn join_keys(keys: &[TaskKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_category_for_validation_errors() {
        assert_eq!(
            Error::RequiredField("Name").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::CannotChangeField("CIDR").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(Error::Cancelled.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_classify_keeps_typed_errors() {
        let err = anyhow::Error::new(Error::RequiredField("Network"));
        assert!(matches!(
            Error::classify(err),
            Error::RequiredField("Network")
        ));
    }

    #[test]
    fn test_classify_wraps_foreign_errors() {
        let err = anyhow::anyhow!("connection reset").context("error creating subnet");
        match Error::classify(err) {
            Error::Backend { message, retryable } => {
                assert!(message.contains("error creating subnet"));
                assert!(message.contains("connection reset"));
                assert!(!retryable);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_sees_through_context() {
        let err: anyhow::Result<()> = Err(Error::Permission("list subnets".into()).into());
        let err = err.context("finding subnet").unwrap_err();
        assert_eq!(Error::classify(err).category(), ErrorCategory::Permission);
    }

    #[test]
    fn test_cycle_message_names_every_task() {
        let err = Error::Cycle {
            tasks: vec![
                TaskKey::new("A", "a"),
                TaskKey::new("B", "b"),
                TaskKey::new("C", "c"),
            ],
        };
        assert_eq!(err.to_string(), "dependency cycle between tasks: A/a, B/b, C/c");
    }
}
