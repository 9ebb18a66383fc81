//! Error types for the request processing engine.
//!
//! [`EngineError`] is the single failure type that flows through filters,
//! handlers and the error chain. Its variants follow the failure taxonomy the
//! [`RequestProcessor`](crate::RequestProcessor) uses to decide how a failure
//! is converted into a response:
//!
//! | Variant | Outcome at the processor boundary |
//! |---|---|
//! | `WriterAlreadyClosed` | Logged only, the response is unusable |
//! | `ResourceNotFound` | Error chain with status 404 and the message |
//! | `HandlerNotFound` | Error chain with status 404 and the message |
//! | `Domain` | Unwrapped to the innermost cause, error chain with that failure |
//! | `AccessDenied` | Error chain with status 403, no message |
//! | `Io` | Returned to the transport unchanged |
//! | anything else | Error chain with the failure as-is |

use std::fmt;
use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Which nesting bound a request exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecursionKind {
    /// Nested include/forward dispatches (content frames).
    Include,
    /// Nested handler invocations.
    Call,
}

impl fmt::Display for RecursionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => f.write_str("include"),
            Self::Call => f.write_str("call"),
        }
    }
}

/// Standard error type for the engine.
///
/// # Example
///
/// ```
/// use pylon_engine::EngineError;
///
/// let inner = EngineError::other(std::io::Error::other("disk gone"));
/// let wrapped = EngineError::domain_with_cause("render failed", inner);
///
/// let root = wrapped.into_root_cause();
/// assert_eq!(root.code(), "UNCLASSIFIED");
/// ```
#[derive(Error, Debug)]
pub enum EngineError {
    /// The response writer was closed before the request finished.
    #[error("Writer has already been closed")]
    WriterAlreadyClosed,

    /// The requested resource does not exist.
    #[error("{message}")]
    ResourceNotFound {
        /// Path of the missing resource.
        resource: String,
        /// Human-readable message passed to the error handler.
        message: String,
    },

    /// No handler could be resolved for a resource.
    #[error("No handler found for {path}")]
    HandlerNotFound {
        /// Path of the resource that has no handler.
        path: String,
    },

    /// The caller lacks the rights for the requested action.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Detail kept for logs; never sent to the client.
        message: String,
    },

    /// An engine-level failure, optionally wrapping the failure that caused it.
    #[error("{message}")]
    Domain {
        /// Human-readable error message.
        message: String,
        /// The wrapped failure.
        #[source]
        cause: Option<Box<EngineError>>,
    },

    /// An include/forward or handler call chain nested too deeply.
    #[error("Too many {kind} recursions (limit {limit}) while dispatching {path}")]
    TooManyRecursions {
        /// Which bound was exceeded.
        kind: RecursionKind,
        /// The configured limit.
        limit: usize,
        /// Path of the resource whose dispatch was refused.
        path: String,
    },

    /// A response or context operation was used out of order.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other failure raised by a filter or handler.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Creates a resource-not-found error for the given path.
    #[must_use]
    pub fn resource_not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::ResourceNotFound {
            message: format!("{resource} not found"),
            resource,
        }
    }

    /// Creates a handler-not-found error for the given path.
    #[must_use]
    pub fn handler_not_found(path: impl Into<String>) -> Self {
        Self::HandlerNotFound { path: path.into() }
    }

    /// Creates an access-denied error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a domain error without a cause.
    #[must_use]
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a domain error wrapping another failure.
    #[must_use]
    pub fn domain_with_cause(message: impl Into<String>, cause: EngineError) -> Self {
        Self::Domain {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Creates a recursion-limit error.
    #[must_use]
    pub fn too_many_recursions(kind: RecursionKind, limit: usize, path: impl Into<String>) -> Self {
        Self::TooManyRecursions {
            kind,
            limit,
            path: path.into(),
        }
    }

    /// Creates an illegal-state error.
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Wraps an arbitrary error as an unclassified failure.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(anyhow::Error::new(error))
    }

    /// Strips `Domain` wrappers until the innermost cause is reached.
    ///
    /// A `Domain` error without a cause is returned as-is.
    #[must_use]
    pub fn into_root_cause(self) -> Self {
        let mut current = self;
        loop {
            match current {
                Self::Domain {
                    cause: Some(cause), ..
                } => current = *cause,
                other => return other,
            }
        }
    }

    /// Returns a machine-readable code for logs and metrics labels.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::WriterAlreadyClosed => "WRITER_CLOSED",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::HandlerNotFound { .. } => "HANDLER_NOT_FOUND",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::Domain { .. } => "DOMAIN",
            Self::TooManyRecursions { .. } => "TOO_MANY_RECURSIONS",
            Self::IllegalState(_) => "ILLEGAL_STATE",
            Self::Io(_) => "TRANSPORT",
            Self::Other(_) => "UNCLASSIFIED",
        }
    }
}
