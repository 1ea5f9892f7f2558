//! Per-position amino-acid frequency profiles of genuine canonical peptides.

use super::BACKGROUND_ALPHABET;
use crate::data::loader::{create_table, open_table};
use crate::data::{il_fold, Identification};
use anyhow::{Context, Result};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// Genuine-identification depth of one dataset at one length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRatio {
    pub dataset: String,
    pub count: usize,
    /// `count` over the largest count across datasets
    pub fraction: f64,
}

/// Frequency of every background residue at every peptide position
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyProfile {
    pub dataset: String,
    /// `frequencies[position][residue]`, residues in `BACKGROUND_ALPHABET` order
    pub frequencies: Vec<Vec<f64>>,
}

impl FrequencyProfile {
    /// Profile of equal-length peptides, `None` when there are none.
    ///
    /// Isoleucine is counted as Leucine; residues outside the alphabet are
    /// skipped.
    pub fn from_peptides<'p>(
        dataset: &str,
        length: usize,
        peptides: impl IntoIterator<Item = &'p str>,
    ) -> Option<Self> {
        let alphabet = BACKGROUND_ALPHABET.as_bytes();
        let mut counts = vec![vec![0.0; alphabet.len()]; length];
        let mut n = 0usize;
        for peptide in peptides {
            if peptide.len() != length {
                continue;
            }
            n += 1;
            for (position, residue) in il_fold(peptide).bytes().enumerate() {
                if let Some(idx) = alphabet.iter().position(|&a| a == residue) {
                    counts[position][idx] += 1.0;
                }
            }
        }
        if n == 0 {
            return None;
        }
        for column in &mut counts {
            column.iter_mut().for_each(|c| *c /= n as f64);
        }
        Some(Self {
            dataset: dataset.to_string(),
            frequencies: counts,
        })
    }

    pub fn length(&self) -> usize {
        self.frequencies.len()
    }

    /// Draw `n` peptides position by position, returning the distinct ones
    /// in first-drawn order.
    pub fn draw<R: Rng>(&self, n: usize, rng: &mut R) -> Result<Vec<String>> {
        let alphabet = BACKGROUND_ALPHABET.as_bytes();
        let distributions = self
            .frequencies
            .iter()
            .enumerate()
            .map(|(position, weights)| {
                WeightedIndex::new(weights).with_context(|| {
                    format!("{}: no residues observed at position {}", self.dataset, position + 1)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::with_capacity(n);
        let mut peptides = Vec::with_capacity(n);
        for _ in 0..n {
            let peptide: String = distributions
                .iter()
                .map(|dist| alphabet[dist.sample(rng)] as char)
                .collect();
            if seen.insert(peptide.clone()) {
                peptides.push(peptide);
            }
        }
        Ok(peptides)
    }

    /// Write as one row per residue and one column per position
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = create_table(path.as_ref())?;
        let mut header = vec!["residue".to_string()];
        header.extend((1..=self.length()).map(|p| p.to_string()));
        writer.write_record(&header)?;
        for (idx, residue) in BACKGROUND_ALPHABET.chars().enumerate() {
            let mut row = vec![residue.to_string()];
            row.extend(self.frequencies.iter().map(|column| column[idx].to_string()));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P, dataset: &str) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = open_table(path)?;
        let length = reader.headers()?.len().saturating_sub(1);
        let alphabet = BACKGROUND_ALPHABET.as_bytes();
        let mut frequencies = vec![vec![0.0; alphabet.len()]; length];
        for result in reader.records() {
            let record = result?;
            let residue = record.get(0).and_then(|r| r.bytes().next()).unwrap_or(b'-');
            let Some(idx) = alphabet.iter().position(|&a| a == residue) else {
                anyhow::bail!("{:?}: unexpected residue row '{}'", path, residue as char);
            };
            for (position, field) in record.iter().skip(1).enumerate() {
                frequencies[position][idx] = field
                    .parse()
                    .with_context(|| format!("{:?}: bad frequency '{}'", path, field))?;
            }
        }
        Ok(Self {
            dataset: dataset.to_string(),
            frequencies,
        })
    }
}

/// Unique genuine canonical peptides of one length per eligible dataset
pub fn canonical_peptides_by_dataset<'a>(
    identifications: &'a [Identification],
    cell_line: &str,
    length: usize,
    is_eligible: impl Fn(&str) -> bool,
) -> BTreeMap<String, BTreeSet<&'a str>> {
    let mut by_dataset: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for identification in identifications {
        let genuine = identification.stratum_label == "canonical"
            && identification.discoverable
            && identification.peptide().len() == length
            && identification.cell_lines.iter().any(|c| c == cell_line);
        if !genuine {
            continue;
        }
        for dataset in identification.datasets.iter().filter(|d| is_eligible(d.as_str())) {
            by_dataset
                .entry(dataset.clone())
                .or_default()
                .insert(identification.peptide());
        }
    }
    by_dataset
}

/// Sampling ratios relative to the deepest dataset
pub fn sample_ratios(counts: &BTreeMap<String, usize>) -> Vec<SampleRatio> {
    let max = counts.values().copied().max().unwrap_or(0);
    if max == 0 {
        return Vec::new();
    }
    counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(dataset, &count)| SampleRatio {
            dataset: dataset.clone(),
            count,
            fraction: count as f64 / max as f64,
        })
        .collect()
}
