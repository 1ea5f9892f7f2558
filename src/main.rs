use anyhow::{Context, Result};
use spiart::background::{create_background, load_reference};
use spiart::cli::{parse_args, setup_logging, AllArgs, BackgroundArgs, Commands, TrainArgs};
use spiart::config::PipelineConfig;
use spiart::data::preprocessing::Preprocessor;
use spiart::data::Identification;
use spiart::utils::format_duration;
use spiart::DataLoader;
use tracing::{error, info};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", spiart::info());

    let result = PipelineConfig::from_file(&cli.config).and_then(|config| match cli.command {
        Commands::Background(args) => run_background(&config, &args),
        Commands::Preprocess => run_preprocess(&config),
        Commands::Train(args) => run_train(config, &args),
        Commands::Score => run_score(&config),
        Commands::All(args) => run_all(config, &args),
    });

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_identifications(config: &PipelineConfig) -> Result<Vec<Identification>> {
    let identifications = DataLoader::new()
        .load_identifications(&config.peptides_table)
        .with_context(|| format!("Failed to load identifications from {:?}", config.peptides_table))?;
    info!("Loaded {} identifications", identifications.len());
    Ok(identifications)
}

fn run_background(config: &PipelineConfig, args: &BackgroundArgs) -> Result<()> {
    info!("Building background pools for {}", config.cell_line);
    config.prepare_dirs()?;
    let identifications = load_identifications(config)?;
    let remapper = load_reference(config).context("Failed to load reference proteomes")?;
    for length in args.lengths(config) {
        let ratios = create_background(config, length, &identifications, &remapper)?;
        info!("Length {}: {} datasets sampled", length, ratios.len());
    }
    Ok(())
}

fn run_preprocess(config: &PipelineConfig) -> Result<()> {
    info!("Assembling {} training tables", config.model);
    config.prepare_dirs()?;
    let identifications = load_identifications(config)?;
    let preprocessor = Preprocessor::new(config, &identifications);
    preprocessor.run().context("Failed to build training tables")?;
    preprocessor
        .run_multi_mapped()
        .context("Failed to build multi-mapped tables")?;
    Ok(())
}

fn run_train(mut config: PipelineConfig, args: &TrainArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;
    config.prepare_dirs()?;

    info!("Training {} model: {}", config.model, config.title);
    let result = spiart::training::run_training(&config).context("Training failed")?;

    info!("=== Training Results ===");
    info!("Final state: {}", result.state);
    info!("Peptides scored: {}", result.unique.rows.len());
    info!("Occurrence rows scored: {}", result.all.rows.len());
    info!("Training time: {}", format_duration(result.duration_secs));
    info!("Models saved to: {:?}", config.models_dir());
    Ok(())
}

fn run_score(config: &PipelineConfig) -> Result<()> {
    info!("Scoring multi-mapped {} peptides", config.model);
    match spiart::predict::run_scoring(config).context("Scoring failed")? {
        Some(scored) => info!("Scored {} multi-mapped peptides", scored.rows.len()),
        None => info!("No multi-mapped peptides to score"),
    }
    Ok(())
}

fn run_all(mut config: PipelineConfig, args: &AllArgs) -> Result<()> {
    args.train.apply(&mut config);
    config.validate()?;
    if !args.skip_background {
        run_background(&config, &BackgroundArgs { pep_length: None })?;
    }
    run_preprocess(&config)?;
    run_train(config.clone(), &TrainArgs::default())?;
    run_score(&config)
}
