use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::EngineError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OgmError>;

/// Endpoint of a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The start node.
    From,
    /// The end node.
    To,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::From => write!(f, "from"),
            Side::To => write!(f, "to"),
        }
    }
}

/// Errors raised by query chains, entity persistence and the transport.
///
/// Validation failures are not represented here: they land in the entity's
/// [`Errors`](crate::entity::Errors) collection and surface as `Ok(false)`.
#[derive(Debug, Error)]
pub enum OgmError {
    /// `save_strict` was called and the save returned false.
    #[error("relationship is invalid: {0}")]
    InvalidRelationship(String),
    /// An endpoint's labels do not satisfy the relationship's class constraint.
    #[error("{side} node labels {found:?} do not include expected model '{expected}'")]
    ClassMismatch {
        /// Which endpoint failed the check.
        side: Side,
        /// Label of the declared model.
        expected: String,
        /// Labels carried by the endpoint.
        found: Vec<String>,
    },
    /// Bad argument to `count`, `exists` or `match_to`.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Bad argument to `update_all` or `limit`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// `branch` was called without a transform.
    #[error("branch requires a transform")]
    MissingTransform,
    /// The operation needs a persisted entity.
    #[error("{0} is not persisted")]
    NotPersisted(String),
    /// No model registered under this name.
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    /// The model does not declare this association.
    #[error("model '{model}' has no association '{association}'")]
    UnknownAssociation {
        /// Model the lookup ran against.
        model: String,
        /// Requested association name.
        association: String,
    },
    /// Transport or transaction failure, propagated unmodified.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OgmError {
    /// Builds an [`OgmError::InvalidParameter`].
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        OgmError::InvalidParameter(msg.into())
    }

    /// Builds an [`OgmError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        OgmError::InvalidArgument(msg.into())
    }
}
