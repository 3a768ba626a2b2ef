//! Error model shared by all statekit crates.

use std::rc::Rc;

use thiserror::Error;

/// Result type for configuration lookups.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration-time failure.
///
/// Raised while reading a [`Config`](crate::Config) or while validating a
/// store specification. These are fatal for the call that triggered them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration root was not a JSON object.
    #[error("configuration data must be an object")]
    NotAnObject,

    /// A mandatory value was absent.
    #[error("Erroneous attribute '{path}' (Mandatory value not available)")]
    MissingValue { path: String },

    /// A value was present but did not satisfy its rule.
    #[error("Erroneous attribute '{path}' (Invalid value - {rule}!)")]
    InvalidValue { path: String, rule: String },

    /// A key of an object did not satisfy the key rule.
    #[error("Key '{key}' {rule}")]
    InvalidKey { key: String, rule: String },

    /// A getter/action name is malformed or collides with a reserved member.
    #[error("member name '{0}' is not allowed")]
    IllegalMemberName(String),

    /// A getter/action name was declared twice.
    #[error("member '{0}' is declared more than once")]
    DuplicateMember(String),
}

impl ConfigError {
    pub fn missing(path: impl Into<String>) -> Self {
        Self::MissingValue { path: path.into() }
    }

    pub fn invalid(path: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            rule: rule.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            rule: rule.into(),
        }
    }

    pub fn illegal_member(name: impl Into<String>) -> Self {
        Self::IllegalMemberName(name.into())
    }
}

/// Error signal carried through event streams.
///
/// Cloneable because a subject hands the same error to every subscriber.
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    /// An operator or constructor received an argument it cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A deferred result lost its producer before the stream terminated.
    #[error("stream was dropped before it terminated")]
    Aborted,

    /// A user callback or a source failed.
    #[error("{0}")]
    Failed(Rc<anyhow::Error>),
}

impl StreamError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Rc::new(err.into()))
    }

    /// The wrapped user error, if this is a [`StreamError::Failed`].
    pub fn as_failure(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Failure while applying a transformation plan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The plan (or a nested plan) has the wrong shape.
    #[error("illegal transformation plan: {0}")]
    IllegalPlan(String),

    /// Unknown `$` modifier, or a modifier mixed with other keys.
    #[error("illegal modifier '{0}'")]
    IllegalModifier(String),

    /// A modifier was applied to a value of the wrong type.
    #[error("modifier {modifier} can only be applied on {expected}")]
    TypeMismatch {
        modifier: &'static str,
        expected: &'static str,
    },
}

impl TransformError {
    pub fn illegal_plan(msg: impl Into<String>) -> Self {
        Self::IllegalPlan(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_messages_keep_the_attribute_format() {
        let err = ConfigError::invalid("nested|number", "must be numeric or null");
        assert_eq!(
            err.to_string(),
            "Erroneous attribute 'nested|number' (Invalid value - must be numeric or null!)"
        );
        assert_eq!(
            ConfigError::missing("string1").to_string(),
            "Erroneous attribute 'string1' (Mandatory value not available)"
        );
    }

    #[test]
    fn stream_failure_exposes_the_user_error() {
        let err = StreamError::failed(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.as_failure().map(|e| e.to_string()), Some("boom".into()));
        assert!(StreamError::Aborted.as_failure().is_none());
    }
}
