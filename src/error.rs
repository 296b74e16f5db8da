//! Error taxonomy for plan construction.
//!
//! Every error is a programming-contract violation detected synchronously at
//! the call that broke the precondition. Nothing is retried.

use thiserror::Error;

/// Errors raised while building or finalizing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("shape error: {0}")]
    Shape(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("no substitution rule named `{0}` is registered")]
    NameLookup(String),
    #[error("cannot broadcast shapes {left} and {right}: axis {axis} differs")]
    Broadcast {
        left: String,
        right: String,
        axis: usize,
    },
    #[error("the stack has already been finalized")]
    Finalized,
    #[error("array `{0}` belongs to a different stack")]
    ForeignArray(String),
    #[error("name `{0}` is already in use")]
    DuplicateName(String),
}

impl Error {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }

    pub(crate) fn index(msg: impl Into<String>) -> Self {
        Error::Index(msg.into())
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        Error::Type(msg.into())
    }
}

/// Result type for plan operations.
pub type Result<T> = std::result::Result<T, Error>;
