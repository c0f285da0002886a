use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A textual value did not name a known variant.
    Parse { kind: &'static str, value: String },
    /// A scan status change that the state machine does not allow.
    InvalidTransition { from: &'static str, to: &'static str },
    InvalidHash(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Parse { kind, value } => {
                write!(f, "unknown {kind}: {value:?}")
            }
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid scan transition {from} -> {to}")
            }
            ModelError::InvalidHash(value) => {
                write!(f, "invalid issue hash: {value:?}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
