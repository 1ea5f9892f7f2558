//! Depth-matched subsampling of remapped background pools.

use super::frequency::SampleRatio;
use super::remapped_path;
use crate::config::PipelineConfig;
use crate::data::loader::{read_records, DataLoader};
use crate::data::{MappedPeptide, Stratum};
use crate::utils::file_exists;
use crate::utils::random::{derive_seed, seeded_rng};
use anyhow::{Context, Result};
use rand::Rng;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Background peptides of one dataset that may stand in for one stratum
#[derive(Debug, Clone)]
pub struct DatasetPool {
    pub dataset: String,
    /// Sampling ratio of the dataset at this length
    pub ratio: f64,
    pub peptides: Vec<MappedPeptide>,
}

/// Number of pool peptides per unit of sampling ratio, minimized over the
/// datasets that have any; `None` when no dataset has eligible peptides
pub fn min_count(pools: &[DatasetPool]) -> Option<f64> {
    pools
        .iter()
        .filter(|pool| !pool.peptides.is_empty() && pool.ratio > 0.0)
        .map(|pool| pool.peptides.len() as f64 / pool.ratio)
        .min_by(|a, b| a.total_cmp(b))
}

/// Round `goal` up with probability equal to its fractional part
pub fn stochastic_round<R: Rng>(goal: f64, rng: &mut R) -> usize {
    let floor = goal.floor();
    let frac = goal - floor;
    if frac > 0.0 && rng.gen::<f64>() < frac {
        floor as usize + 1
    } else {
        floor as usize
    }
}

/// Subsample every pool to `min_count × ratio × scale` peptides.
///
/// Pools keep their input order; the realized count never exceeds what a
/// pool holds. The coin flips resolving fractional goals consume `rng` in
/// pool order, so identical inputs and seed give identical samples.
pub fn sample_pools<R: Rng>(pools: Vec<DatasetPool>, scale: f64, rng: &mut R) -> Vec<DatasetPool> {
    let Some(min) = min_count(&pools) else {
        return Vec::new();
    };
    pools
        .into_iter()
        .filter(|pool| !pool.peptides.is_empty())
        .map(|mut pool| {
            let goal = stochastic_round(min * pool.ratio * scale, rng);
            debug!(
                "{}: goal {} of {} available (ratio {:.3})",
                pool.dataset,
                goal,
                pool.peptides.len(),
                pool.ratio
            );
            if pool.peptides.len() > goal {
                let mut chosen: Vec<usize> =
                    rand::seq::index::sample(rng, pool.peptides.len(), goal).into_vec();
                chosen.sort_unstable();
                let mut peptides = std::mem::take(&mut pool.peptides);
                pool.peptides = chosen
                    .into_iter()
                    .map(|i| std::mem::take(&mut peptides[i]))
                    .collect();
            }
            pool
        })
        .filter(|pool| !pool.peptides.is_empty())
        .collect()
}

/// Draws background peptides for a stratum from the remapped pools on disk
pub struct BackgroundSampler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> BackgroundSampler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    fn ratios(&self, length: usize) -> Result<Vec<SampleRatio>> {
        let path = self
            .config
            .background_folder
            .join("sample_ratios")
            .join(format!("ratio_{}.csv", length));
        if !file_exists(&path) {
            warn!("No sampling ratios for length {}", length);
            return Ok(Vec::new());
        }
        read_records(&path)
    }

    /// Eligible peptides of one remapped pool, unique by peptide
    fn load_pool(&self, path: &Path, stratum: Stratum) -> Result<Vec<MappedPeptide>> {
        let mut seen = HashSet::new();
        Ok(DataLoader::new()
            .load_identifications(path)?
            .into_iter()
            .map(|identification| identification.mapping)
            .filter(|mapping| seen.insert(mapping.peptide.clone()))
            .filter(|mapping| mapping.is_background_for(stratum))
            .collect())
    }

    /// Depth-matched background peptides of one stratum and length, tagged
    /// with their dataset. Empty when no dataset has an eligible pool.
    pub fn sample(&self, stratum: Stratum, length: usize) -> Result<Vec<DatasetPool>> {
        let mut pools = Vec::new();
        for ratio in self.ratios(length)? {
            if !self.config.is_eligible_dataset(&ratio.dataset) {
                continue;
            }
            let path = remapped_path(&self.config.background_folder, length, &ratio.dataset);
            if !file_exists(&path) {
                warn!("Missing remapped pool for {}, length {}", ratio.dataset, length);
                continue;
            }
            let peptides = self
                .load_pool(&path, stratum)
                .with_context(|| format!("Failed to load pool {:?}", path))?;
            pools.push(DatasetPool {
                dataset: ratio.dataset,
                ratio: ratio.fraction,
                peptides,
            });
        }

        let scale = match stratum {
            Stratum::Spliced => self.config.background.spliced_sampling_fraction,
            _ => 1.0,
        };
        let mut rng = seeded_rng(derive_seed(
            self.config.seed,
            &format!("{}_{}", stratum, length),
        ));
        let sampled = sample_pools(pools, scale, &mut rng);
        info!(
            "Sampled {} {} background peptides of length {} from {} datasets",
            sampled.iter().map(|p| p.peptides.len()).sum::<usize>(),
            stratum,
            length,
            sampled.len()
        );
        Ok(sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pool(dataset: &str, ratio: f64, n: usize) -> DatasetPool {
        DatasetPool {
            dataset: dataset.to_string(),
            ratio,
            peptides: (0..n).map(|i| MappedPeptide::new(format!("{}{:06}", dataset, i))).collect(),
        }
    }

    #[test]
    fn test_min_count() {
        let pools = vec![pool("a", 1.0, 300), pool("b", 0.5, 100), pool("c", 0.25, 0)];
        assert_relative_eq!(min_count(&pools).unwrap(), 200.0);
        assert_eq!(min_count(&[pool("a", 1.0, 0)]), None);
    }

    #[test]
    fn test_empty_pools_give_empty_sample() {
        let mut rng = seeded_rng(1);
        assert!(sample_pools(vec![pool("a", 1.0, 0)], 1.0, &mut rng).is_empty());
        assert!(sample_pools(Vec::new(), 1.0, &mut rng).is_empty());
    }

    #[test]
    fn test_realized_count_never_exceeds_pool() {
        let mut rng = seeded_rng(7);
        for _ in 0..50 {
            let pools = vec![pool("a", 1.0, 40), pool("b", 0.3, 25), pool("c", 0.7, 3)];
            let sizes: Vec<usize> = pools.iter().map(|p| p.peptides.len()).collect();
            let sampled = sample_pools(pools, 1.0, &mut rng);
            for (sampled, available) in sampled.iter().zip(sizes) {
                assert!(sampled.peptides.len() <= available);
            }
        }
    }

    #[test]
    fn test_sampled_peptides_unique_and_from_pool() {
        let mut rng = seeded_rng(3);
        let sampled = sample_pools(vec![pool("a", 1.0, 100), pool("b", 0.5, 30)], 1.0, &mut rng);
        let a = &sampled[0];
        assert!(a.peptides.len() == 60 || a.peptides.len() == 61);
        let unique: HashSet<&str> = a.peptides.iter().map(|p| p.peptide.as_str()).collect();
        assert_eq!(unique.len(), a.peptides.len());
        assert!(a.peptides.iter().all(|p| p.peptide.starts_with('a')));
        assert_eq!(sampled[1].peptides.len(), 30);
    }

    #[test]
    fn test_expected_total_converges() {
        // min_count = 10 / 0.4 = 25; goals 25 × (1.0, 0.4, 0.33) × 0.1
        let ratios = [1.0, 0.4, 0.33];
        let expected: f64 = ratios.iter().map(|r| 25.0 * r * 0.1).sum();
        let mut rng = seeded_rng(11);
        let runs = 4000;
        let mut total = 0usize;
        for _ in 0..runs {
            let pools = vec![pool("a", 1.0, 1000), pool("b", 0.4, 10), pool("c", 0.33, 500)];
            total += sample_pools(pools, 0.1, &mut rng)
                .iter()
                .map(|p| p.peptides.len())
                .sum::<usize>();
        }
        let mean = total as f64 / runs as f64;
        assert!((mean - expected).abs() < 0.05, "mean {} expected {}", mean, expected);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let run = || {
            let mut rng = seeded_rng(42);
            sample_pools(vec![pool("a", 1.0, 90), pool("b", 0.55, 20)], 1.0, &mut rng)
                .into_iter()
                .flat_map(|p| p.peptides.into_iter().map(|m| m.peptide))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_stochastic_round_integer_goal() {
        let mut rng = seeded_rng(5);
        assert_eq!(stochastic_round(12.0, &mut rng), 12);
        assert_eq!(stochastic_round(0.0, &mut rng), 0);
    }
}
