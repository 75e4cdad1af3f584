use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A value failed its schema check. `field` names the offending field
    /// using the serialized (camelCase) spelling.
    Invalid { field: String, reason: String },
}

impl ModelError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Prefix the field path, used when a nested value fails validation.
    pub fn within(self, parent: &str) -> Self {
        match self {
            ModelError::Invalid { field, reason } => ModelError::Invalid {
                field: format!("{parent}.{field}"),
                reason,
            },
        }
    }
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Invalid { field, reason } => {
                write!(f, "invalid {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
