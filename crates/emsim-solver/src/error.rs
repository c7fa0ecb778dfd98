//! Error types for emsim-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{quantity} is not available in the {formulation} formulation")]
    UnsupportedOperation {
        quantity: String,
        formulation: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("singular system matrix{}", frequency_suffix(.frequency))]
    SingularMatrix { frequency: Option<f64> },

    #[error("invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Core(#[from] emsim_core::Error),
}

impl Error {
    /// Attach the frequency at which a factorization failed.
    pub fn at_frequency(self, frequency: f64) -> Self {
        match self {
            Error::SingularMatrix { frequency: None } => Error::SingularMatrix {
                frequency: Some(frequency),
            },
            other => other,
        }
    }
}

fn frequency_suffix(frequency: &Option<f64>) -> String {
    match frequency {
        Some(f) => format!(" at {} Hz", f),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
