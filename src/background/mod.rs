//! Composition-matched background peptides.
//!
//! Per length: genuine canonical identifications give every eligible dataset
//! a per-position frequency profile and a sampling ratio; each profile seeds a
//! pool of random peptides which is remapped onto the reference. Training
//! negatives are later subsampled from these pools by [`BackgroundSampler`].

pub mod frequency;
pub mod remap;
pub mod sampler;

pub use frequency::{FrequencyProfile, SampleRatio};
pub use remap::{ExactRemapper, Remapper};
pub use sampler::{BackgroundSampler, DatasetPool};

use crate::config::PipelineConfig;
use crate::data::loader::{write_identifications, write_records, DataLoader};
use crate::data::{Identification, Stratum};
use crate::utils::random::{derive_seed, seeded_rng};
use crate::utils::{ensure_dir, file_exists, format_number, progress_bar, write_atomic};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Residues drawn for background peptides; Isoleucine is folded onto Leucine
pub const BACKGROUND_ALPHABET: &str = "ACDEFGHKLMNPQRSTVWY";

pub fn frequency_path(background_folder: &Path, length: usize, dataset: &str) -> PathBuf {
    background_folder
        .join("frequency")
        .join(length.to_string())
        .join(format!("{}.csv", dataset))
}

pub fn ratio_path(background_folder: &Path, length: usize) -> PathBuf {
    background_folder
        .join("sample_ratios")
        .join(format!("ratio_{}.csv", length))
}

pub fn random_path(background_folder: &Path, length: usize, dataset: &str) -> PathBuf {
    background_folder
        .join("random")
        .join(length.to_string())
        .join(format!("{}.csv", dataset))
}

/// Remapped pool of one dataset; its presence marks the pool as complete
pub fn remapped_path(background_folder: &Path, length: usize, dataset: &str) -> PathBuf {
    background_folder
        .join("remapped")
        .join(length.to_string())
        .join(dataset)
        .join("peptides.csv")
}

#[derive(Serialize)]
struct RandomPeptide<'a> {
    peptide: &'a str,
}

/// Build an [`ExactRemapper`] over the configured antigen tables.
///
/// Cryptic tables that do not exist are skipped.
pub fn load_reference(config: &PipelineConfig) -> Result<ExactRemapper> {
    let loader = DataLoader::new();
    let canonical = loader.load_antigens(config.antigen_table(Stratum::Canonical), Stratum::Canonical)?;
    let mut cryptic = Vec::new();
    for stratum in Stratum::CRYPTIC {
        let path = config.antigen_table(stratum);
        if !file_exists(&path) {
            warn!("No {} antigen table at {:?}", stratum, path);
            continue;
        }
        cryptic.push(loader.load_antigens(&path, stratum)?);
    }
    Ok(ExactRemapper::new(
        &canonical,
        &cryptic,
        config.background.seed_length,
        config.spliced.max_intervening,
    )?)
}

/// Generate the frequency profiles, sampling ratios and remapped pools of one
/// peptide length.
///
/// Pools whose remapped file already exists are not regenerated. Datasets
/// without genuine canonical identifications at this length get nothing.
pub fn create_background(
    config: &PipelineConfig,
    length: usize,
    identifications: &[Identification],
    remapper: &dyn Remapper,
) -> Result<Vec<SampleRatio>> {
    let folder = &config.background_folder;
    let by_dataset = frequency::canonical_peptides_by_dataset(
        identifications,
        &config.cell_line,
        length,
        |d| config.is_eligible_dataset(d),
    );
    if by_dataset.is_empty() {
        warn!("No genuine canonical peptides of length {}, skipping background", length);
        return Ok(Vec::new());
    }

    let counts: BTreeMap<String, usize> = by_dataset
        .iter()
        .map(|(dataset, peptides)| (dataset.clone(), peptides.len()))
        .collect();
    let ratios = frequency::sample_ratios(&counts);
    ensure_dir(folder.join("sample_ratios"))?;
    write_records(ratio_path(folder, length), &ratios)?;

    let bar = progress_bar(by_dataset.len() as u64, &format!("Background pools, length {}", length));
    for (dataset, peptides) in &by_dataset {
        bar.inc(1);
        let remapped = remapped_path(folder, length, dataset);
        if file_exists(&remapped) {
            info!("Remapped pool for {} (length {}) exists, skipping", dataset, length);
            continue;
        }
        let Some(profile) =
            FrequencyProfile::from_peptides(dataset, length, peptides.iter().copied())
        else {
            continue;
        };
        let profile_path = frequency_path(folder, length, dataset);
        ensure_dir(profile_path.parent().unwrap_or(folder))?;
        profile.write(&profile_path)?;

        let mut rng = seeded_rng(derive_seed(config.seed, &format!("{}_{}", dataset, length)));
        let drawn = profile.draw(config.background.pool_size, &mut rng)?;
        let random = random_path(folder, length, dataset);
        ensure_dir(random.parent().unwrap_or(folder))?;
        let rows: Vec<RandomPeptide> = drawn.iter().map(|p| RandomPeptide { peptide: p }).collect();
        write_records(&random, &rows)?;

        let pool: Vec<Identification> = remapper
            .remap(&drawn)
            .with_context(|| format!("Failed to remap pool of {}", dataset))?
            .into_iter()
            .map(|mapping| Identification {
                stratum_label: mapping
                    .realized_stratum()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                mapping,
                cell_lines: Vec::new(),
                datasets: vec![dataset.clone()],
                discoverable: true,
            })
            .collect();
        write_atomic(&remapped, |tmp| write_identifications(tmp, &pool))?;
        info!(
            "{}: {} distinct random peptides of length {} remapped",
            dataset,
            format_number(pool.len()),
            length
        );
    }
    bar.finish_with_message(format!("Background pools, length {} done", length));
    Ok(ratios)
}
