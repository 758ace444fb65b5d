use reflection::Trap;
use thiserror::Error as ThisError;

use crate::graph::GraphName;

/// Convenient alias, which defaults to [`Error`] as [`Err`]-Variant.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error variants returned by the mediation engine.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("{0}")]
    Unique(String),

    #[error("Cannot wrap or bind a primitive where an object is required")]
    PrimitiveWrap,

    #[error("Unknown graph: {0}")]
    UnknownGraph(GraphName),

    #[error("Graph entry is dead: {0}")]
    DeadGraph(GraphName),

    #[error("The original value of this cylinder was never set")]
    OriginalNotSet,

    #[error("Graph ownership violation: {0}")]
    GraphOwnership(String),

    #[error("Graph is already initialized: {0}")]
    DuplicateGraph(GraphName),

    #[error("The '{0}' trap is disabled for this proxy")]
    TrapDisabled(Trap),

    #[error("Operation on a revoked object graph")]
    Revoked,

    #[error("Rule conflict: {0}")]
    RuleConflict(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Reflection(#[from] reflection::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
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

// Membrane errors raised inside a trap cross the proxy layer boxed as
// handler errors; reflection errors pass through unchanged.
impl From<Error> for reflection::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Reflection(inner) => inner,
            other => reflection::Error::host(other),
        }
    }
}

/// Extracts the membrane error boxed inside a trap failure, if any.
pub fn as_membrane_error(error: &reflection::Error) -> Option<&Error> {
    error.as_host().and_then(|host| host.downcast_ref::<Error>())
}
