//! Remapping of peptides onto the reference proteomes.

use crate::data::{il_fold, AntigenStore, MappedPeptide, SplicedOccurrence, Stratum};
use crate::error::{PipelineError, PipelineResult};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Locates peptides in the reference: which strata they map to and, for
/// spliced matches, how.
///
/// Implementations must be deterministic and free of side effects.
pub trait Remapper: Send + Sync {
    fn remap(&self, peptides: &[String]) -> PipelineResult<Vec<MappedPeptide>>;
}

/// IL-folded sequences of one stratum with a k-mer seed index
struct Proteome {
    ids: Vec<String>,
    sequences: Vec<Vec<u8>>,
    seeds: HashMap<Vec<u8>, Vec<(usize, usize)>>,
    seed_length: usize,
}

impl Proteome {
    fn new(store: &AntigenStore, seed_length: usize) -> Self {
        let mut ids = Vec::with_capacity(store.len());
        let mut sequences = Vec::with_capacity(store.len());
        let mut seeds: HashMap<Vec<u8>, Vec<(usize, usize)>> = HashMap::new();
        for (protein, record) in store.iter_sorted().into_iter().enumerate() {
            let sequence = il_fold(&record.protein_seq).into_bytes();
            for (offset, kmer) in sequence.windows(seed_length).enumerate() {
                if !kmer.contains(&b'*') {
                    seeds.entry(kmer.to_vec()).or_default().push((protein, offset));
                }
            }
            ids.push(record.protein_id.clone());
            sequences.push(sequence);
        }
        Self {
            ids,
            sequences,
            seeds,
            seed_length,
        }
    }

    /// Every `(protein, offset)` where `fragment` occurs
    fn occurrences(&self, fragment: &[u8]) -> Vec<(usize, usize)> {
        if fragment.len() >= self.seed_length {
            let Some(hits) = self.seeds.get(&fragment[..self.seed_length]) else {
                return Vec::new();
            };
            return hits
                .iter()
                .copied()
                .filter(|&(protein, offset)| matches_at(&self.sequences[protein], fragment, offset))
                .collect();
        }
        self.sequences
            .iter()
            .enumerate()
            .flat_map(|(protein, sequence)| {
                (0..=sequence.len().saturating_sub(fragment.len()))
                    .filter(move |&offset| matches_at(sequence, fragment, offset))
                    .map(move |offset| (protein, offset))
            })
            .collect()
    }

    fn proteins_containing(&self, peptide: &[u8]) -> Vec<String> {
        let proteins: BTreeSet<usize> = self
            .occurrences(peptide)
            .into_iter()
            .map(|(protein, _)| protein)
            .collect();
        proteins.into_iter().map(|p| self.ids[p].clone()).collect()
    }
}

fn matches_at(sequence: &[u8], fragment: &[u8], offset: usize) -> bool {
    !fragment.is_empty()
        && sequence
            .get(offset..offset + fragment.len())
            .is_some_and(|window| window == fragment)
}

/// Exact-match remapper over in-memory antigen stores.
///
/// Contiguous matches are searched in every stratum. Spliced matches are
/// searched in canonical parents only: the peptide is split into two
/// non-empty fragments, the longer one is located through the seed index and
/// the shorter one is looked for within `max_intervening` residues on either
/// side. A forward match with no intervening residues is a contiguous match
/// and is not reported as spliced.
pub struct ExactRemapper {
    canonical: Proteome,
    cryptic: BTreeMap<Stratum, Proteome>,
    max_intervening: usize,
}

impl ExactRemapper {
    pub fn new(
        canonical: &AntigenStore,
        cryptic: &[AntigenStore],
        seed_length: usize,
        max_intervening: usize,
    ) -> PipelineResult<Self> {
        if seed_length == 0 {
            return Err(PipelineError::configuration("seed length must be positive"));
        }
        if canonical.stratum != Stratum::Canonical {
            return Err(PipelineError::configuration(format!(
                "expected canonical antigens, got {}",
                canonical.stratum
            )));
        }
        let mut by_stratum = BTreeMap::new();
        for store in cryptic {
            if !store.stratum.is_cryptic() {
                return Err(PipelineError::configuration(format!(
                    "{} is not a cryptic stratum",
                    store.stratum
                )));
            }
            by_stratum.insert(store.stratum, Proteome::new(store, seed_length));
        }
        debug!(
            "Indexed {} canonical and {} cryptic strata",
            canonical.len(),
            by_stratum.len()
        );
        Ok(Self {
            canonical: Proteome::new(canonical, seed_length),
            cryptic: by_stratum,
            max_intervening,
        })
    }

    fn map_one(&self, peptide: &str) -> MappedPeptide {
        let folded = il_fold(peptide).into_bytes();
        let mut mapping = MappedPeptide::new(peptide);

        let canonical = self.canonical.proteins_containing(&folded);
        if !canonical.is_empty() {
            mapping.proteins.insert(Stratum::Canonical, canonical);
        }
        for (stratum, proteome) in &self.cryptic {
            let proteins = proteome.proteins_containing(&folded);
            if !proteins.is_empty() {
                mapping.proteins.insert(*stratum, proteins);
            }
        }
        mapping.spliced = self.spliced_occurrences(peptide, &folded);
        mapping
    }

    fn spliced_occurrences(&self, peptide: &str, folded: &[u8]) -> Vec<SplicedOccurrence> {
        let mut found = BTreeSet::new();
        for split in 1..folded.len() {
            let (sr1, sr2) = folded.split_at(split);
            let sr1_is_long = sr1.len() >= sr2.len();
            let (long, short) = if sr1_is_long { (sr1, sr2) } else { (sr2, sr1) };

            for (protein, long_at) in self.canonical.occurrences(long) {
                let sequence = &self.canonical.sequences[protein];
                for short_at in self.short_candidates(sequence.len(), long_at, long.len(), short.len()) {
                    if !matches_at(sequence, short, short_at) {
                        continue;
                    }
                    let (sr1_index, sr2_index) = if sr1_is_long {
                        (long_at, short_at)
                    } else {
                        (short_at, long_at)
                    };
                    let Some((intervening, is_forward)) =
                        junction(sr1_index, sr1.len(), sr2_index, sr2.len())
                    else {
                        continue;
                    };
                    if intervening > self.max_intervening || (is_forward && intervening == 0) {
                        continue;
                    }
                    found.insert((protein, split, sr1_index, sr2_index, intervening, is_forward));
                }
            }
        }
        found
            .into_iter()
            .map(|(protein, split, sr1_index, sr2_index, intervening, is_forward)| SplicedOccurrence {
                protein_id: self.canonical.ids[protein].clone(),
                sr1: peptide[..split].to_string(),
                sr1_index,
                sr2_index,
                intervening,
                is_forward,
            })
            .collect()
    }

    /// Start offsets for the short fragment that leave at most
    /// `max_intervening` residues to the long fragment on either side
    fn short_candidates(
        &self,
        sequence_len: usize,
        long_at: usize,
        long_len: usize,
        short_len: usize,
    ) -> impl Iterator<Item = usize> {
        let before_lo = long_at.saturating_sub(short_len + self.max_intervening);
        let before_hi = long_at.saturating_sub(short_len);
        let before = (before_lo..=before_hi).filter(move |&at| at + short_len <= long_at);
        let after_lo = long_at + long_len;
        let after_hi = (after_lo + self.max_intervening).min(sequence_len.saturating_sub(short_len));
        before.chain(after_lo..=after_hi)
    }
}

/// Gap between the fragments and whether SR1 comes first; `None` if they overlap
fn junction(sr1_index: usize, sr1_len: usize, sr2_index: usize, sr2_len: usize) -> Option<(usize, bool)> {
    if sr1_index + sr1_len <= sr2_index {
        Some((sr2_index - (sr1_index + sr1_len), true))
    } else if sr2_index + sr2_len <= sr1_index {
        Some((sr1_index - (sr2_index + sr2_len), false))
    } else {
        None
    }
}

impl Remapper for ExactRemapper {
    fn remap(&self, peptides: &[String]) -> PipelineResult<Vec<MappedPeptide>> {
        Ok(peptides.par_iter().map(|p| self.map_one(p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AntigenRecord;

    fn store(stratum: Stratum, proteins: &[(&str, &str)]) -> AntigenStore {
        let records = proteins
            .iter()
            .map(|(id, seq)| AntigenRecord {
                protein_id: id.to_string(),
                protein_seq: seq.to_string(),
                disorder: vec![0.0; seq.len()],
                ..Default::default()
            })
            .collect();
        AntigenStore::new(stratum, records)
    }

    fn remapper() -> ExactRemapper {
        let canonical = store(
            Stratum::Canonical,
            &[
                ("CAN1", "MKTAYLAKQRQLSFVKSHFSRQ"),
                ("CAN2", "MSDNGPQNQRNAPRLTFGGPSDSTGSNQ"),
            ],
        );
        let cryptic = vec![
            store(Stratum::Intronic, &[("INT1", "GGWWPEPTLDEKGG")]),
            store(Stratum::LncRna, &[("LNC1", "PEPTIDEK*RR")]),
        ];
        ExactRemapper::new(&canonical, &cryptic, 4, 25).unwrap()
    }

    #[test]
    fn test_contiguous_mapping_folds_isoleucine() {
        let mapped = remapper().remap(&["PEPTIDEK".to_string()]).unwrap();
        assert_eq!(mapped[0].proteins_in(Stratum::Intronic), ["INT1"]);
        assert_eq!(mapped[0].proteins_in(Stratum::LncRna), ["LNC1"]);
        assert!(mapped[0].proteins_in(Stratum::Canonical).is_empty());
        assert_eq!(mapped[0].realized_stratum(), None);
    }

    #[test]
    fn test_canonical_mapping() {
        let mapped = remapper().remap(&["TAYLAKQRQ".to_string()]).unwrap();
        assert_eq!(mapped[0].proteins_in(Stratum::Canonical), ["CAN1"]);
        assert_eq!(mapped[0].realized_stratum(), Some(Stratum::Canonical));
    }

    #[test]
    fn test_forward_spliced_mapping() {
        // TAYLA (2..7) + SFVK (12..16), 5 intervening residues
        let mapped = remapper().remap(&["TAYLASFVK".to_string()]).unwrap();
        let spliced = &mapped[0].spliced;
        assert!(spliced.contains(&SplicedOccurrence {
            protein_id: "CAN1".to_string(),
            sr1: "TAYLA".to_string(),
            sr1_index: 2,
            sr2_index: 12,
            intervening: 5,
            is_forward: true,
        }));
        assert_eq!(mapped[0].realized_stratum(), Some(Stratum::Spliced));
    }

    #[test]
    fn test_reverse_spliced_mapping() {
        // SFVKS (12..17) followed in the peptide by TAYL (2..6)
        let mapped = remapper().remap(&["SFVKSTAYL".to_string()]).unwrap();
        assert!(mapped[0].spliced.iter().any(|o| o.sr1 == "SFVKS"
            && o.sr1_index == 12
            && o.sr2_index == 2
            && o.intervening == 6
            && !o.is_forward));
    }

    #[test]
    fn test_gap_limit_and_contiguity() {
        let canonical = store(Stratum::Canonical, &[("CAN1", "MKTAYLAKQRQLSFVKSHFSRQ")]);
        let narrow = ExactRemapper::new(&canonical, &[], 4, 2).unwrap();
        let mapped = narrow.remap(&["TAYLASFVK".to_string()]).unwrap();
        assert!(mapped[0].spliced.iter().all(|o| o.intervening <= 2));
        assert!(mapped[0]
            .spliced
            .iter()
            .all(|o| !(o.is_forward && o.intervening == 0)));
    }

    #[test]
    fn test_rejects_non_cryptic_store() {
        let canonical = store(Stratum::Canonical, &[("CAN1", "MKT")]);
        let wrong = vec![store(Stratum::Canonical, &[("CAN2", "MKT")])];
        assert!(ExactRemapper::new(&canonical, &wrong, 4, 25).is_err());
    }
}
