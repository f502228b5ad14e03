use thiserror::Error;

/// Custom error type for the NeuroGraph engine.
///
/// Variants fall into the families callers usually branch on: structural errors
/// (shapes, indices, load layout), numeric instability, resource exhaustion and
/// unsupported operator capabilities. Nothing is retried internally.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum NeuroGraphError {
    #[error("Shape mismatch during operation {operation}: expected {expected}, got {actual}")]
    ShapeMismatch {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("Structural mismatch while loading {what}: expected {expected}, got {actual}")]
    StructuralLoadMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Index out of bounds: index {index} for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreationError { data_len: usize, shape: Vec<usize> },

    #[error("Backward called on a non-scalar node without an explicit seed gradient.")]
    BackwardNonScalar,

    #[error("Backward requested for node {index}, which has not been evaluated forward yet")]
    BackwardBeforeForward { index: usize },

    #[error("Expression refers to a computation graph that no longer exists")]
    GraphDropped,

    #[error("Numeric instability (NaN or Inf) in {phase} of {operation} at node {index}")]
    NumericInstability {
        operation: String,
        index: usize,
        phase: String,
    },

    #[error("Scratch arena exhausted: requested {requested} elements, {available} available")]
    ResourceExhausted { requested: usize, available: usize },

    #[error("Unsupported operation: {0}")]
    NotSupported(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Failed to acquire {lock_type} lock: {reason}")]
    LockError { lock_type: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for NeuroGraphError {
    fn from(err: std::io::Error) -> Self {
        NeuroGraphError::Io(err.to_string())
    }
}

impl From<bincode::Error> for NeuroGraphError {
    fn from(err: bincode::Error) -> Self {
        NeuroGraphError::Serialization(err.to_string())
    }
}

/// Builds a `ShapeMismatch` from anything printable.
pub(crate) fn shape_mismatch(
    operation: &str,
    expected: impl std::fmt::Display,
    actual: impl std::fmt::Display,
) -> NeuroGraphError {
    NeuroGraphError::ShapeMismatch {
        operation: operation.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
