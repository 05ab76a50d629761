//! Error types for the `TensorLoom` compiler core.
//!
//! The error surface is a closed set: every public API either returns a
//! successful result or one of the four kinds below. Passes propagate errors
//! outward; the [`Schedule`](crate::schedule::Schedule) façade converts any
//! internal error into [`Error::InvalidSchedule`] carrying the failing
//! operation's signature and restores the prior AST.

/// `TensorLoom` error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The IR violates a structural invariant (nested same-name definition,
    /// indexing with the wrong rank, unresolved name).
    #[error("Invalid program: {message}")]
    InvalidProgram { message: String },

    /// A transformation was rejected by legality analysis (dependency
    /// violation, pattern mismatch, unprovable divisibility).
    #[error("Invalid schedule: {op}: {cause}")]
    InvalidSchedule {
        /// Textual signature of the failing operation
        op: String,
        cause: String,
    },

    /// An introspection query returned no match or an ambiguous match.
    #[error("Unexpected query: {message}")]
    UnexpectedQuery { message: String },

    /// A broken invariant inside a pass. The tree may be inconsistent.
    #[error("Internal assertion failed: {message}")]
    InternalAssertion { message: String },
}

impl Error {
    /// Shorthand for an [`Error::InvalidProgram`].
    pub fn program(message: impl Into<String>) -> Self {
        Error::InvalidProgram {
            message: message.into(),
        }
    }

    /// Shorthand for an [`Error::InvalidSchedule`] without an operation
    /// signature yet. The Schedule façade fills `op` in on the way out.
    pub fn schedule(cause: impl Into<String>) -> Self {
        Error::InvalidSchedule {
            op: String::new(),
            cause: cause.into(),
        }
    }

    /// Shorthand for an [`Error::UnexpectedQuery`].
    pub fn query(message: impl Into<String>) -> Self {
        Error::UnexpectedQuery {
            message: message.into(),
        }
    }

    /// Shorthand for an [`Error::InternalAssertion`].
    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalAssertion {
            message: message.into(),
        }
    }

    /// Attach an operation signature, turning any error into a schedule
    /// rejection. `InternalAssertion` is kept as-is: a poisoned tree must not
    /// be reported as a recoverable rejection.
    pub fn with_op(self, op: &str) -> Self {
        match self {
            Error::InternalAssertion { .. } => self,
            Error::InvalidSchedule { cause, .. } => Error::InvalidSchedule {
                op: op.to_string(),
                cause,
            },
            other => Error::InvalidSchedule {
                op: op.to_string(),
                cause: other.to_string(),
            },
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
