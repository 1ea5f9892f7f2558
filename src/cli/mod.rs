use crate::config::PipelineConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// spiart: sequence-context classifiers for non-canonical peptide identifications
#[derive(Parser, Debug)]
#[command(name = "spiart")]
#[command(about = "Background-matched classifiers for non-canonical peptide identifications")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run configuration (TOML)
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build frequency profiles, sampling ratios and remapped background pools
    Background(BackgroundArgs),

    /// Assemble and featurize the training and multi-mapped tables
    Preprocess,

    /// Train the cross-validated fold models
    Train(TrainArgs),

    /// Score multi-mapped peptides with the saved fold models
    Score,

    /// Run every step in order
    All(AllArgs),
}

/// Background arguments
#[derive(Args, Debug)]
pub struct BackgroundArgs {
    /// Only this peptide length (default: every configured length)
    #[arg(long = "pep-length")]
    pub pep_length: Option<usize>,
}

impl BackgroundArgs {
    pub fn lengths(&self, config: &PipelineConfig) -> Vec<usize> {
        match self.pep_length {
            Some(length) => vec![length],
            None => config.peptide_lengths.clone(),
        }
    }
}

/// Training overrides of the configuration file
#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// Number of cross-validation folds
    #[arg(long)]
    pub folds: Option<usize>,

    /// Grid points sampled by the hyperparameter search (0 disables it)
    #[arg(long)]
    pub search_iterations: Option<usize>,

    /// Self-training rounds of the spliced model
    #[arg(long)]
    pub rounds: Option<usize>,

    /// Worker threads
    #[arg(long)]
    pub cores: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(folds) = self.folds {
            config.training.n_folds = folds;
        }
        if let Some(iterations) = self.search_iterations {
            config.training.search_iterations = iterations;
        }
        if let Some(rounds) = self.rounds {
            config.training.self_training_rounds = rounds;
        }
        if let Some(cores) = self.cores {
            config.n_cores = cores;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}

/// Full-run arguments
#[derive(Args, Debug)]
pub struct AllArgs {
    /// Reuse the existing background pools
    #[arg(long)]
    pub skip_background: bool,

    #[command(flatten)]
    pub train: TrainArgs,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity; `RUST_LOG` takes precedence
pub fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from(["spiart", "-c", "run.toml", "background", "--pep-length", "9"]);
        assert_eq!(cli.config, PathBuf::from("run.toml"));
        match cli.command {
            Commands::Background(args) => assert_eq!(args.pep_length, Some(9)),
            _ => panic!("Expected Background command"),
        }
    }

    #[test]
    fn test_train_overrides() {
        let cli = Cli::parse_from(["spiart", "train", "--folds", "5", "--search-iterations", "0", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        match cli.command {
            Commands::Train(args) => {
                assert_eq!(args.folds, Some(5));
                assert_eq!(args.search_iterations, Some(0));
                assert_eq!(args.rounds, None);
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_all_flattens_train_args() {
        let cli = Cli::parse_from(["spiart", "all", "--skip-background", "--seed", "7"]);
        match cli.command {
            Commands::All(args) => {
                assert!(args.skip_background);
                assert_eq!(args.train.seed, Some(7));
            }
            _ => panic!("Expected All command"),
        }
    }
}
