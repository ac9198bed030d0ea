pub mod assembler;
pub mod clustering;
pub mod config;
pub mod dense;
pub mod dimred;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod sparse;
pub mod statistics;
pub mod svd;
mod utils;

pub use utils::Direction;
pub use utils::FloatOps;
pub use utils::Normalize;
pub use utils::NumericOps;
pub use utils::SampleIdentifier;

pub use config::SubpopConfig;
pub use error::{Degeneracy, Result, SubpopError};
pub use pipeline::{SubpopulationAnalysis, SubpopulationResult};
