//! Assembly of labeled training tables.
//!
//! Genuine identifications become positives, sampled background peptides
//! become negatives, and both are joined with their parents and featurized.
//! Canonical and cryptic strata write one table per stratum and length;
//! spliced peptides are featurized in fixed-size batches on a worker pool.

use crate::background::{BackgroundSampler, DatasetPool};
use crate::config::PipelineConfig;
use crate::data::loader::{read_records, write_feature_table, DataLoader};
use crate::data::{
    AntigenStore, FeatureSchema, FeatureTable, Identification, MappedPeptide, ModelKind,
    SplicedOccurrence, Stratum,
};
use crate::error::PipelineError;
use crate::features::{FeatureExtractor, SplicedFeatureExtractor};
use crate::utils::{ensure_dir, file_exists, format_number, progress_bar, write_atomic};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One (peptide, parent) pair awaiting featurization
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub peptide: String,
    pub protein_id: String,
    pub label: u8,
    /// How a spliced peptide is produced from its parent
    pub spliced: Option<SplicedOccurrence>,
}

/// Which identifications count as positives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositiveSet {
    /// Unambiguously attributed to the stratum
    Exclusive,
    /// Multi-mapped peptides with a parent in the stratum
    MultiMapped,
}

fn is_positive(identification: &Identification, stratum: Stratum, set: PositiveSet) -> bool {
    let mapping = &identification.mapping;
    let label = identification.stratum_label.as_str();
    match (set, stratum) {
        (PositiveSet::MultiMapped, _) => {
            identification.is_multi_mapped() && mapping.n_proteins(stratum) > 0
        }
        (PositiveSet::Exclusive, Stratum::Canonical) => label == Stratum::Canonical.as_str(),
        (PositiveSet::Exclusive, Stratum::Spliced) => label == Stratum::Spliced.as_str(),
        (PositiveSet::Exclusive, _) => {
            label == "cryptic"
                && mapping.n_proteins(stratum) > 0
                && !mapping.has_reserved_source()
        }
    }
}

/// Identifications of one cell line and length attributed to `stratum`,
/// one candidate per parent (or per spliced occurrence).
pub fn gather_positives(
    identifications: &[Identification],
    stratum: Stratum,
    cell_line: &str,
    length: usize,
    set: PositiveSet,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for identification in identifications {
        let in_scope = identification.peptide().len() == length
            && identification.cell_lines.iter().any(|c| c == cell_line);
        // Spliced identifications carry no discoverability flag of their own
        let discoverable = stratum == Stratum::Spliced || identification.discoverable;
        if !(in_scope && discoverable && is_positive(identification, stratum, set)) {
            continue;
        }
        candidates.extend(candidates_for(&identification.mapping, stratum, 1));
    }
    candidates
}

fn candidates_for(mapping: &MappedPeptide, stratum: Stratum, label: u8) -> Vec<Candidate> {
    match stratum {
        Stratum::Spliced => mapping
            .spliced
            .iter()
            .map(|occurrence| Candidate {
                peptide: mapping.peptide.clone(),
                protein_id: occurrence.protein_id.clone(),
                label,
                spliced: Some(occurrence.clone()),
            })
            .collect(),
        _ => mapping
            .proteins_in(stratum)
            .iter()
            .map(|protein_id| Candidate {
                peptide: mapping.peptide.clone(),
                protein_id: protein_id.clone(),
                label,
                spliced: None,
            })
            .collect(),
    }
}

/// Background candidates from sampled pools
pub fn gather_negatives(pools: &[DatasetPool], stratum: Stratum) -> Vec<Candidate> {
    pools
        .iter()
        .flat_map(|pool| pool.peptides.iter())
        .flat_map(|mapping| candidates_for(mapping, stratum, 0))
        .collect()
}

/// Positives first, then negatives, so a pair seen in both stays positive.
///
/// Contiguous candidates are unique per `(peptide, proteinID)`. Spliced
/// candidates are unique per occurrence, and a background peptide that is
/// also a positive is dropped entirely.
pub fn merge_candidates(positives: Vec<Candidate>, negatives: Vec<Candidate>) -> Vec<Candidate> {
    let positive_peptides: HashSet<String> =
        positives.iter().map(|c| c.peptide.clone()).collect();
    let mut seen = HashSet::new();
    positives
        .into_iter()
        .chain(negatives.into_iter().filter(|c| {
            c.spliced.is_none() || !positive_peptides.contains(&c.peptide)
        }))
        .filter(|c| {
            let indices = c.spliced.as_ref().map(|o| (o.sr1_index, o.sr2_index));
            seen.insert((c.peptide.clone(), c.protein_id.clone(), indices))
        })
        .collect()
}

/// Featurize contiguous candidates; parents missing from `antigens` are
/// skipped and rows that fail extraction are logged and dropped.
pub fn featurize_contiguous(
    extractor: &FeatureExtractor,
    antigens: &AntigenStore,
    candidates: &[Candidate],
) -> Result<FeatureTable> {
    let mut table = FeatureTable::new(extractor.schema().clone());
    let mut missing = 0usize;
    for candidate in candidates {
        let Some(parent) = antigens.get(&candidate.protein_id) else {
            missing += 1;
            continue;
        };
        match extractor.extract(&candidate.peptide, parent, candidate.label) {
            Ok(rows) => table.extend(rows)?,
            Err(e) if e.is_row_level() => warn!(
                "Dropping {} in {}: {}",
                candidate.peptide, candidate.protein_id, e
            ),
            Err(e) => return Err(e.into()),
        }
    }
    if missing > 0 {
        debug!("{} candidates without a {} parent", missing, antigens.stratum);
    }
    Ok(table)
}

/// Featurize spliced candidates, same dropping rules as the contiguous case
pub fn featurize_spliced(
    extractor: &SplicedFeatureExtractor,
    antigens: &AntigenStore,
    candidates: &[Candidate],
) -> Result<FeatureTable> {
    let mut table = FeatureTable::new(extractor.schema().clone());
    for candidate in candidates {
        let (Some(parent), Some(occurrence)) =
            (antigens.get(&candidate.protein_id), candidate.spliced.as_ref())
        else {
            continue;
        };
        match extractor.extract(&candidate.peptide, occurrence, parent, candidate.label) {
            Ok(row) => table.push(row)?,
            Err(e) if e.is_row_level() => warn!(
                "Dropping {} in {}: {}",
                candidate.peptide, candidate.protein_id, e
            ),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(table)
}

/// Batch of the row at `row_index`
pub fn batch_id(row_index: usize, batch_size: usize) -> usize {
    row_index / batch_size.max(1)
}

/// Fixed-size worker pool over fixed-size batches.
///
/// A batch's id depends only on its rows' positions, so re-running over the
/// same input maps every row to the same batch.
pub struct BatchPool {
    pool: rayon::ThreadPool,
    batch_size: usize,
}

impl BatchPool {
    pub fn new(workers: usize, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::configuration("batch size must be positive").into());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("Failed to build worker pool")?;
        Ok(Self { pool, batch_size })
    }

    pub fn n_batches(&self, n_items: usize) -> usize {
        n_items.div_ceil(self.batch_size)
    }

    /// Run `task(batch_id, batch)` for every batch; the first error aborts
    pub fn run<T, F>(&self, items: &[T], task: F) -> Result<()>
    where
        T: Sync,
        F: Fn(usize, &[T]) -> Result<()> + Send + Sync,
    {
        self.pool.install(|| {
            items
                .par_chunks(self.batch_size)
                .enumerate()
                .try_for_each(|(id, batch)| task(id, batch))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ScoredPeptide {
    peptide: String,
    #[serde(rename = "proteinID")]
    protein_id: String,
    label: u8,
}

/// Genuine canonical peptides per parent from a finished canonical run
pub fn load_canonical_peptides(path: &Path) -> Result<HashMap<String, BTreeSet<String>>> {
    let scored: Vec<ScoredPeptide> = read_records(path)?;
    let mut by_protein: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in scored.into_iter().filter(|r| r.label == 1) {
        by_protein.entry(row.protein_id).or_default().insert(row.peptide);
    }
    info!("{} canonical parents with known peptides", by_protein.len());
    Ok(by_protein)
}

/// Path of a spliced batch file
pub fn batch_path(dir: &Path, length: usize, label: u8, batch: usize) -> PathBuf {
    dir.join(length.to_string())
        .join(format!("df_{}_{}.csv", label, batch))
}

/// Path of a contiguous training table
pub fn stratum_path(dir: &Path, stratum: Stratum, length: usize) -> PathBuf {
    dir.join(format!("{}_{}.csv", stratum, length))
}

/// Builds the training and multi-mapped tables of one run
pub struct Preprocessor<'a> {
    config: &'a PipelineConfig,
    identifications: &'a [Identification],
    loader: DataLoader,
}

impl<'a> Preprocessor<'a> {
    pub fn new(config: &'a PipelineConfig, identifications: &'a [Identification]) -> Self {
        Self {
            config,
            identifications,
            loader: DataLoader::new(),
        }
    }

    fn antigens(&self, stratum: Stratum) -> Result<Option<AntigenStore>> {
        let path = self.config.antigen_table(stratum);
        if !file_exists(&path) {
            warn!("No antigen table for {} at {:?}", stratum, path);
            return Ok(None);
        }
        let parent_stratum = match stratum {
            Stratum::Spliced => Stratum::Canonical,
            other => other,
        };
        Ok(Some(self.loader.load_antigens(&path, parent_stratum)?))
    }

    fn spliced_extractor(&self) -> Result<SplicedFeatureExtractor> {
        let results = self
            .config
            .canonical_results
            .as_ref()
            .ok_or_else(|| PipelineError::configuration("spliced runs need canonical_results"))?;
        let canonical = load_canonical_peptides(&results.join("unique_peps_scored.csv"))?;
        Ok(SplicedFeatureExtractor::new(&self.config.extra_features(), canonical))
    }

    /// Write every training table of the configured model
    pub fn run(&self) -> Result<()> {
        let training_dir = self.config.training_dir();
        ensure_dir(&training_dir)?;
        let sampler = BackgroundSampler::new(self.config);

        if self.config.model == ModelKind::Spliced {
            let Some(antigens) = self.antigens(Stratum::Spliced)? else {
                return Ok(());
            };
            let extractor = self.spliced_extractor()?;
            let pool = BatchPool::new(self.config.n_cores, self.config.spliced.batch_size)?;
            for &length in &self.config.peptide_lengths {
                let positives = gather_positives(
                    self.identifications,
                    Stratum::Spliced,
                    &self.config.cell_line,
                    length,
                    PositiveSet::Exclusive,
                );
                let pools = sampler.sample(Stratum::Spliced, length)?;
                let negatives = gather_negatives(&pools, Stratum::Spliced);
                let candidates = merge_candidates(positives, negatives);
                self.write_spliced_batches(&training_dir, length, &candidates, &extractor, &antigens, &pool)?;
            }
            return Ok(());
        }

        for &stratum in self.config.model.strata() {
            let Some(antigens) = self.antigens(stratum)? else {
                continue;
            };
            let extractor = FeatureExtractor::new(stratum, &self.config.extra_features())?;
            for &length in &self.config.peptide_lengths {
                let positives = gather_positives(
                    self.identifications,
                    stratum,
                    &self.config.cell_line,
                    length,
                    PositiveSet::Exclusive,
                );
                let pools = sampler.sample(stratum, length)?;
                let negatives = gather_negatives(&pools, stratum);
                if positives.is_empty() && negatives.is_empty() {
                    info!("No {} peptides of length {}, skipping", stratum, length);
                    continue;
                }
                let candidates = merge_candidates(positives, negatives);
                let table = featurize_contiguous(&extractor, &antigens, &candidates)?;
                if table.is_empty() {
                    continue;
                }
                let path = stratum_path(&training_dir, stratum, length);
                write_feature_table(&path, &table)?;
                info!(
                    "{} {}-mers: {} rows ({} positive) written to {:?}",
                    stratum,
                    length,
                    format_number(table.len()),
                    format_number(table.positive_count()),
                    path
                );
            }
        }
        Ok(())
    }

    /// Featurize the multi-mapped identifications for later scoring
    pub fn run_multi_mapped(&self) -> Result<()> {
        let dir = self.config.multi_mapped_dir();
        ensure_dir(&dir)?;

        if self.config.model == ModelKind::Spliced {
            let Some(antigens) = self.antigens(Stratum::Spliced)? else {
                return Ok(());
            };
            let extractor = self.spliced_extractor()?;
            let pool = BatchPool::new(self.config.n_cores, self.config.spliced.batch_size)?;
            for &length in &self.config.peptide_lengths {
                let candidates = gather_positives(
                    self.identifications,
                    Stratum::Spliced,
                    &self.config.cell_line,
                    length,
                    PositiveSet::MultiMapped,
                );
                self.write_spliced_batches(&dir, length, &candidates, &extractor, &antigens, &pool)?;
            }
            return Ok(());
        }

        for &stratum in self.config.model.strata() {
            let Some(antigens) = self.antigens(stratum)? else {
                continue;
            };
            let extractor = FeatureExtractor::new(stratum, &self.config.extra_features())?;
            for &length in &self.config.peptide_lengths {
                let candidates = gather_positives(
                    self.identifications,
                    stratum,
                    &self.config.cell_line,
                    length,
                    PositiveSet::MultiMapped,
                );
                let table = featurize_contiguous(&extractor, &antigens, &candidates)?;
                if !table.is_empty() {
                    write_feature_table(stratum_path(&dir, stratum, length), &table)?;
                    info!("{} multi-mapped {} {}-mers", table.len(), stratum, length);
                }
            }
        }
        Ok(())
    }

    /// Featurize spliced candidates batch by batch into `df_{label}_{batch}`
    /// files; batches whose file exists are not recomputed.
    fn write_spliced_batches(
        &self,
        dir: &Path,
        length: usize,
        candidates: &[Candidate],
        extractor: &SplicedFeatureExtractor,
        antigens: &AntigenStore,
        pool: &BatchPool,
    ) -> Result<()> {
        ensure_dir(dir.join(length.to_string()))?;
        for label in [1u8, 0] {
            let labelled: Vec<Candidate> =
                candidates.iter().filter(|c| c.label == label).cloned().collect();
            if labelled.is_empty() {
                continue;
            }
            let bar = progress_bar(
                pool.n_batches(labelled.len()) as u64,
                &format!("Spliced {}-mers, label {}", length, label),
            );
            pool.run(&labelled, |batch, rows| {
                let path = batch_path(dir, length, label, batch);
                if !file_exists(&path) {
                    let table = featurize_spliced(extractor, antigens, rows)?;
                    write_atomic(&path, |tmp| write_feature_table(tmp, &table))?;
                }
                bar.inc(1);
                Ok(())
            })?;
            bar.finish();
            info!(
                "{} spliced {}-mers with label {} in {} batches",
                format_number(labelled.len()),
                length,
                label,
                pool.n_batches(labelled.len())
            );
        }
        Ok(())
    }
}

/// Every table a training run reads for `model`, in a stable order
pub fn training_files(config: &PipelineConfig, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for &length in &config.peptide_lengths {
        if config.model == ModelKind::Spliced {
            let length_dir = dir.join(length.to_string());
            if !length_dir.is_dir() {
                continue;
            }
            let mut batches: Vec<(u8, usize, PathBuf)> = std::fs::read_dir(&length_dir)
                .with_context(|| format!("Failed to list {:?}", length_dir))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter_map(|path| {
                    let (label, batch) = parse_batch_name(&path)?;
                    Some((label, batch, path))
                })
                .collect();
            batches.sort();
            files.extend(batches.into_iter().map(|(_, _, path)| path));
        } else {
            for &stratum in config.model.strata() {
                let path = stratum_path(dir, stratum, length);
                if file_exists(&path) {
                    files.push(path);
                }
            }
        }
    }
    Ok(files)
}

/// `(label, batch)` of a `df_{label}_{batch}.csv` file name
fn parse_batch_name(path: &Path) -> Option<(u8, usize)> {
    let stem = path.file_name()?.to_str()?.strip_suffix(".csv")?;
    let mut parts = stem.strip_prefix("df_")?.splitn(2, '_');
    let label = parts.next()?.parse().ok()?;
    let batch = parts.next()?.parse().ok()?;
    Some((label, batch))
}

/// Concatenate tables written with one schema
pub fn load_tables(files: &[PathBuf], schema: &FeatureSchema) -> Result<FeatureTable> {
    let loader = DataLoader::new();
    let mut combined: Option<FeatureTable> = None;
    for file in files {
        let table = loader
            .load_feature_table(file, &schema.numeric)
            .with_context(|| format!("Failed to load {:?}", file))?;
        match combined.as_mut() {
            Some(all) => {
                if all.schema != table.schema {
                    return Err(PipelineError::input_shape(format!(
                        "{:?} has different columns than earlier tables",
                        file
                    ))
                    .into());
                }
                all.extend(table.rows().iter().cloned())?;
            }
            None => combined = Some(table),
        }
    }
    Ok(combined.unwrap_or_else(|| FeatureTable::new(schema.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AntigenRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identification(
        peptide: &str,
        label: &str,
        strata: &[(Stratum, &str)],
        spliced: Vec<SplicedOccurrence>,
    ) -> Identification {
        let mut mapping = MappedPeptide::new(peptide);
        for (stratum, protein) in strata {
            mapping
                .proteins
                .entry(*stratum)
                .or_default()
                .push(protein.to_string());
        }
        mapping.spliced = spliced;
        Identification {
            mapping,
            stratum_label: label.to_string(),
            cell_lines: vec!["K562".to_string()],
            datasets: vec!["K562_a".to_string()],
            discoverable: true,
        }
    }

    fn occurrence(protein: &str, sr1: &str, sr1_index: usize, sr2_index: usize) -> SplicedOccurrence {
        SplicedOccurrence {
            protein_id: protein.to_string(),
            sr1: sr1.to_string(),
            sr1_index,
            sr2_index,
            intervening: 1,
            is_forward: true,
        }
    }

    #[test]
    fn test_gather_canonical_positives() {
        let identifications = vec![
            identification("TAYLAKQRQ", "canonical", &[(Stratum::Canonical, "P1"), (Stratum::Canonical, "P2")], vec![]),
            identification("TAYLAKQR", "canonical", &[(Stratum::Canonical, "P1")], vec![]),
            identification("PEPTLDEKK", "cryptic", &[(Stratum::Intronic, "I1")], vec![]),
        ];
        let positives =
            gather_positives(&identifications, Stratum::Canonical, "K562", 9, PositiveSet::Exclusive);
        assert_eq!(positives.len(), 2);
        assert!(positives.iter().all(|c| c.label == 1 && c.peptide == "TAYLAKQRQ"));
        assert!(gather_positives(&identifications, Stratum::Canonical, "HeLa", 9, PositiveSet::Exclusive).is_empty());
    }

    #[test]
    fn test_cryptic_positives_exclude_reserved_sources() {
        let mut reserved = identification("PEPTLDEKR", "cryptic", &[(Stratum::Intronic, "I2")], vec![]);
        reserved.mapping.fusion_proteins = 1;
        let identifications = vec![
            identification("PEPTLDEKK", "cryptic", &[(Stratum::Intronic, "I1")], vec![]),
            reserved,
            identification("PEPTLDEKW", "cryptic", &[(Stratum::LncRna, "L1")], vec![]),
        ];
        let positives =
            gather_positives(&identifications, Stratum::Intronic, "K562", 9, PositiveSet::Exclusive);
        assert_eq!(positives.len(), 1);
        assert_eq!(positives[0].protein_id, "I1");
    }

    #[test]
    fn test_multi_mapped_positives() {
        let identifications = vec![
            identification("TAYLAKQRQ", "multi-mapped", &[(Stratum::Canonical, "P1"), (Stratum::Intronic, "I1")], vec![]),
            identification("TAYLAKQRW", "canonical", &[(Stratum::Canonical, "P3")], vec![]),
        ];
        let positives =
            gather_positives(&identifications, Stratum::Intronic, "K562", 9, PositiveSet::MultiMapped);
        assert_eq!(positives.len(), 1);
        assert_eq!(positives[0].protein_id, "I1");
    }

    #[test]
    fn test_spliced_candidates_per_occurrence() {
        let identifications = vec![identification(
            "TAYLSFVKS",
            "spliced",
            &[],
            vec![occurrence("P1", "TAYL", 2, 12), occurrence("P2", "TAY", 0, 5)],
        )];
        let positives =
            gather_positives(&identifications, Stratum::Spliced, "K562", 9, PositiveSet::Exclusive);
        assert_eq!(positives.len(), 2);
        assert_eq!(positives[1].spliced.as_ref().unwrap().sr1, "TAY");
    }

    #[test]
    fn test_merge_keeps_positive_duplicate() {
        let candidate = |peptide: &str, protein: &str, label: u8| Candidate {
            peptide: peptide.to_string(),
            protein_id: protein.to_string(),
            label,
            spliced: None,
        };
        let merged = merge_candidates(
            vec![candidate("AAAAAAAAK", "P1", 1)],
            vec![
                candidate("AAAAAAAAK", "P1", 0),
                candidate("AAAAAAAAK", "P2", 0),
                candidate("AAAAAAAAR", "P1", 0),
                candidate("AAAAAAAAR", "P1", 0),
            ],
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].label, 1);
        assert_eq!(merged.iter().filter(|c| c.label == 0).count(), 2);
    }

    #[test]
    fn test_merge_drops_spliced_background_matching_positive() {
        let spliced = |peptide: &str, label: u8, sr1_index: usize| Candidate {
            peptide: peptide.to_string(),
            protein_id: "P1".to_string(),
            label,
            spliced: Some(occurrence("P1", "TAYL", sr1_index, 12)),
        };
        let merged = merge_candidates(
            vec![spliced("TAYLSFVKS", 1, 2)],
            vec![spliced("TAYLSFVKS", 0, 3), spliced("KAYLSFVKS", 0, 2), spliced("KAYLSFVKS", 0, 3)],
        );
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().filter(|c| c.label == 0).all(|c| c.peptide == "KAYLSFVKS"));
    }

    #[test]
    fn test_featurize_contiguous_skips_missing_parents() {
        let protein = "MKTAYLAKQRQLSFVKSHFSRQ";
        let record = AntigenRecord {
            protein_id: "P1".to_string(),
            protein_seq: protein.to_string(),
            rna_seq: "GCU".repeat(protein.len()),
            disorder: vec![0.5; protein.len()],
            ..Default::default()
        };
        let antigens = AntigenStore::new(Stratum::Canonical, vec![record]);
        let extractor = FeatureExtractor::new(Stratum::Canonical, &[]).unwrap();
        let candidates = vec![
            Candidate { peptide: "TAYLAKQRQ".to_string(), protein_id: "P1".to_string(), label: 1, spliced: None },
            Candidate { peptide: "TAYLAKQRQ".to_string(), protein_id: "P9".to_string(), label: 1, spliced: None },
            Candidate { peptide: "WWWWWWWWW".to_string(), protein_id: "P1".to_string(), label: 0, spliced: None },
            Candidate { peptide: "TAY*AKQRQ".to_string(), protein_id: "P1".to_string(), label: 0, spliced: None },
        ];
        let table = featurize_contiguous(&extractor, &antigens, &candidates).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].protein_id, "P1");
    }

    #[test]
    fn test_batch_ids_are_positional() {
        assert_eq!(batch_id(0, 1000), 0);
        assert_eq!(batch_id(999, 1000), 0);
        assert_eq!(batch_id(1000, 1000), 1);
        assert_eq!(batch_id(2500, 1000), 2);
    }

    #[test]
    fn test_batch_pool_covers_every_row() {
        let pool = BatchPool::new(3, 4).unwrap();
        let items: Vec<usize> = (0..10).collect();
        let seen = AtomicUsize::new(0);
        let batches = std::sync::Mutex::new(Vec::new());
        pool.run(&items, |id, batch| {
            seen.fetch_add(batch.len(), Ordering::SeqCst);
            for (offset, item) in batch.iter().enumerate() {
                assert_eq!(batch_id(*item, 4), id);
                assert_eq!(*item, id * 4 + offset);
            }
            batches.lock().unwrap().push(id);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        let mut ids = batches.into_inner().unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(pool.n_batches(10), 3);
        assert!(BatchPool::new(2, 0).is_err());
    }

    #[test]
    fn test_parse_batch_name() {
        assert_eq!(parse_batch_name(Path::new("out/9/df_1_12.csv")), Some((1, 12)));
        assert_eq!(parse_batch_name(Path::new("out/9/.tmp.df_1_12.csv")), None);
        assert_eq!(parse_batch_name(Path::new("out/9/notes.csv")), None);
    }

    #[test]
    fn test_load_canonical_peptides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unique_peps_scored.csv");
        std::fs::write(
            &path,
            "peptide,proteinID,label,prediction\nAAAK,P1,1,0.9\nCCCK,P1,1,0.8\nDDDK,P1,0,0.1\nEEEK,P2,1,0.7\n",
        )
        .unwrap();
        let by_protein = load_canonical_peptides(&path).unwrap();
        assert_eq!(by_protein["P1"].len(), 2);
        assert!(by_protein["P2"].contains("EEEK"));
    }
}
