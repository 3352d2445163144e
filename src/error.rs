//! Error types for latente operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Main error type for latente operations.
///
/// Covers shape mismatches between data and model configuration, invalid
/// hyperparameters, class-conditioning misuse, and I/O failures during
/// weight serialization.
///
/// # Examples
///
/// ```
/// use latente::error::LatenteError;
///
/// let err = LatenteError::DimensionMismatch {
///     expected: "(28, 28)".to_string(),
///     actual: "(32, 32)".to_string(),
/// };
/// assert!(err.to_string().contains("dimension mismatch"));
/// ```
#[derive(Debug)]
pub enum LatenteError {
    /// Input data dimensions don't match the model configuration.
    DimensionMismatch {
        /// Expected dimensions description
        expected: String,
        /// Actual dimensions found
        actual: String,
    },

    /// Invalid hyperparameter value provided.
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A class label is required because the model was built with
    /// class conditioning, but none was supplied.
    MissingClassLabel,

    /// A class label was supplied to a model built without class
    /// conditioning.
    UnexpectedClassLabel {
        /// The label that was supplied
        label: usize,
    },

    /// I/O error (file not found, permission denied, etc.).
    Io(std::io::Error),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for LatenteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatenteError::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {expected}, got {actual}")
            }
            LatenteError::InvalidHyperparameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid hyperparameter '{param}' = {value}: must satisfy {constraint}"
                )
            }
            LatenteError::MissingClassLabel => {
                write!(
                    f,
                    "model is class-conditioned: a class label must be supplied"
                )
            }
            LatenteError::UnexpectedClassLabel { label } => {
                write!(
                    f,
                    "class label {label} supplied to a model built without class conditioning"
                )
            }
            LatenteError::Io(e) => write!(f, "I/O error: {e}"),
            LatenteError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            LatenteError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LatenteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LatenteError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LatenteError {
    fn from(e: std::io::Error) -> Self {
        LatenteError::Io(e)
    }
}

impl From<serde_json::Error> for LatenteError {
    fn from(e: serde_json::Error) -> Self {
        LatenteError::Serialization(e.to_string())
    }
}

/// Convenience Result type for latente operations.
pub type Result<T> = std::result::Result<T, LatenteError>;
