//! # spiart: sequence-context classifiers for non-canonical peptides
//!
//! spiart scores immunopeptidomics identifications from non-canonical
//! sources (cryptic ORFs, spliced peptides) by training gradient-boosted
//! classifiers that separate genuine identifications from composition-matched
//! background peptides.
//!
//! ## Features
//!
//! - Sequence-context features of every peptide occurrence in its parent
//! - Background sampling matched to each dataset's residue composition
//! - Leakage-aware cross-validation with fold groups over proteins or peptides
//! - Iterative self-training for spliced peptides
//! - TreeSHAP attributions and scoring of multi-mapped peptides
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use spiart::config::PipelineConfig;
//! use spiart::training::run_training;
//!
//! let config = PipelineConfig::from_file("config.toml").unwrap();
//! let result = run_training(&config).unwrap();
//! println!("{} peptides scored", result.unique.rows.len());
//! ```

pub mod background;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod predict;
pub mod training;
pub mod utils;

/// Re-export commonly used types
pub use config::PipelineConfig;
pub use data::loader::DataLoader;
pub use data::{FeatureRow, FeatureTable, Identification, ModelKind, Stratum};
pub use error::{PipelineError, PipelineResult};
pub use model::{Gbdt, GbdtParams};
pub use training::{TrainingConfig, TrainingResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - classifiers for non-canonical peptide identifications",
        NAME, VERSION
    )
}
