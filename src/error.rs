use thiserror::Error;

/// Errors surfaced by the screening analysis routines.
///
/// Nothing here is retried or recovered internally; every failure is handed
/// straight back to the caller.
#[derive(Error, Debug)]
pub enum ScreenError {
    /// An operation needs a prior `fit` or `transform` that has not happened.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    Dimensionality {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A feature, treatment or concentration label could not be resolved.
    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Linear algebra failure: {0}")]
    LinAlg(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, ScreenError>;
