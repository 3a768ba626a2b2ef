//! Store error taxonomy.

use statekit_core::ConfigError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store specification is malformed.
    #[error("invalid store specification: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown getter '{0}'")]
    UnknownGetter(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// A getter body failed; the error is passed through unchanged.
    #[error(transparent)]
    Getter(anyhow::Error),

    /// An action body failed; state was left as it was.
    #[error(transparent)]
    Action(anyhow::Error),

    #[error("store has been disposed")]
    Disposed,

    /// A pending action was dropped by its executor before it settled.
    #[error("action '{0}' was aborted before it settled")]
    Aborted(String),
}

impl StoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// The error raised by a user getter or action body, if that is what
    /// this is.
    pub fn user_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Getter(err) | Self::Action(err) => Some(err),
            _ => None,
        }
    }
}
