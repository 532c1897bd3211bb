//! Construction-time error taxonomy.
//!
//! Per-request failures never surface here: handlers report them through
//! [`Flow::Stop`](crate::pipeline::Flow). Everything in this module is raised
//! while a pipeline is being built or validated, and refuses start (or reload).

use thiserror::Error;

/// A handler could not be built from its configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Required field is empty or absent.
    #[error("{component}: missing required field `{field}`")]
    MissingField { component: String, field: &'static str },

    /// Field is present but its value is out of range or malformed.
    #[error("{component}: invalid `{field}`: {reason}")]
    InvalidValue {
        component: String,
        field: &'static str,
        reason: String,
    },

    /// Strategy tag did not normalize to a known strategy.
    #[error("unknown authentication strategy `{0}`")]
    UnknownStrategy(String),

    /// Route references something that does not exist.
    #[error("route `{route}`: {reason}")]
    Route { route: String, reason: String },
}

impl BuildError {
    pub fn missing(component: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            component: component.into(),
            field,
        }
    }

    pub fn invalid(component: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            component: component.into(),
            field,
            reason: reason.into(),
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
