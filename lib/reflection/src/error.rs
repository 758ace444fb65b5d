use thiserror::Error as ThisError;

use crate::{traps::Trap, value::Value};

/// Convenient alias, which defaults to [`Error`] as [`Err`]-Variant.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error variants returned by the object runtime.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("{0}")]
    Unique(String),

    #[error("Cannot perform '{trap}' on a revoked proxy")]
    Revoked { trap: Trap },

    #[error("Proxy invariant violated in '{trap}': {reason}")]
    InvariantViolation { trap: Trap, reason: String },

    #[error("Value is not callable")]
    NotCallable,

    #[error("Value is not a constructor")]
    NotConstructible,

    #[error("Expected an object, found a primitive")]
    NotAnObject,

    /// A value thrown by user code (an accessor, function body or
    /// listener) that is not itself an error. It crosses trap boundaries
    /// unchanged.
    #[error("Uncaught thrown value: {0:?}")]
    Thrown(Value),

    /// An error raised by a proxy handler. Handlers living in downstream
    /// crates box their own error types through this variant.
    #[error("{0}")]
    Host(Box<dyn std::error::Error + 'static>),
}

impl Error {
    /// Boxes a foreign error so a proxy handler can raise it through a
    /// trap boundary.
    pub fn host<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Error::Host(Box::new(error))
    }

    /// Returns the boxed handler error, if this is one.
    pub fn as_host(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Host(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Unique(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Unique(s)
    }
}
