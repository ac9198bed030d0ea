//! Error and warning types for the subpopulation pipeline.

use thiserror::Error;

/// Fatal errors surfaced by the pipeline stages.
#[derive(Error, Debug)]
pub enum SubpopError {
    /// Malformed or empty input data (zero genes, zero cells, mismatched labels).
    #[error("invalid input: {0}")]
    Input(String),

    /// Invalid parameter or parameter combination.
    #[error("invalid configuration for `{param}`: {reason}")]
    Configuration { param: &'static str, reason: String },

    /// A linear algebra routine failed on otherwise valid input.
    #[error("numerical error: {0}")]
    Numerical(String),

    #[error(transparent)]
    Matrix(#[from] anyhow::Error),
}

impl SubpopError {
    pub(crate) fn config(param: &'static str, reason: impl Into<String>) -> Self {
        SubpopError::Configuration {
            param,
            reason: reason.into(),
        }
    }

    pub(crate) fn input(reason: impl Into<String>) -> Self {
        SubpopError::Input(reason.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SubpopError::Configuration { .. })
    }
}

/// Degenerate numerical outcomes. These are reported alongside partial results
/// instead of failing the stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// No gene lies above the noise line.
    EmptyFilteredGeneSet { offset: f64 },
    /// Fewer than two genes are available to fit the noise trend.
    InsufficientTrendGenes { available: usize },
    /// The factorization hit its iteration cap; the basis is the last iterate.
    FactorizationNotConverged {
        iterations: usize,
        relative_error: f64,
    },
}

impl std::fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degeneracy::EmptyFilteredGeneSet { offset } => {
                write!(f, "no genes passed the noise filter (offset {})", offset)
            }
            Degeneracy::InsufficientTrendGenes { available } => write!(
                f,
                "noise trend needs at least two expressed genes, found {}",
                available
            ),
            Degeneracy::FactorizationNotConverged {
                iterations,
                relative_error,
            } => write!(
                f,
                "factorization stopped at the iteration cap ({}) with relative error {:.3e}",
                iterations, relative_error
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubpopError>;
