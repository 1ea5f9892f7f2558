//! Occurrence search and positional context of peptides in parent sequences.

use crate::data::{
    il_fold, AntigenRecord, Flank, CANONICAL_START, START_CODONS, STOP_CODONS, STOP_MARKER,
};
use crate::error::{PipelineError, PipelineResult};
use crate::features::kozak::{kozak_score, KOZAK_UPSTREAM, KOZAK_WINDOW};
use crate::features::window_mean;

/// Every start offset of `peptide` in `parent`, with I and L folded on both
/// sides. Overlapping occurrences are all reported.
pub fn find_occurrences(peptide: &str, parent: &str) -> Vec<usize> {
    let needle = il_fold(peptide).into_bytes();
    let haystack = il_fold(parent).into_bytes();
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle.as_slice())
        .map(|(pos, _)| pos)
        .collect()
}

/// Start codons met while scanning 5' from a peptide start
#[derive(Debug, Clone, PartialEq)]
pub struct StartCodonScan {
    /// One flag per entry of `START_CODONS`
    pub upstream: [bool; START_CODONS.len()],
    /// Codons between the peptide start and the nearest in-frame AUG
    pub start_distance: Option<usize>,
    /// Kozak context of that AUG, when the window fits in the transcript
    pub kozak_score: Option<f64>,
}

/// Context of the stop-delimited fragment holding an occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentContext {
    pub length: usize,
    /// Residues immediately after the C-terminus, nearest first
    pub downstream: [Flank; 2],
    /// Residues immediately before the N-terminus, nearest first
    pub upstream: [Flank; 2],
}

/// One resolved (peptide, parent, offset) triple
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub position: usize,
    pub relative_position: f64,
    /// The parent's own residues at this offset
    pub il_peptide: String,
    pub local_disorder: Option<f64>,
    /// Codon of the peptide's last residue
    pub end_codon: Option<String>,
    /// Codon after the peptide's last residue
    pub post_codon: Option<String>,
    pub start_scan: StartCodonScan,
    /// Residues to the next `*`, or to the end of the parent
    pub stop_distance: usize,
    pub fragment: FragmentContext,
}

/// Resolves every occurrence of a peptide in one parent sequence.
pub struct SequenceContextResolver<'a> {
    parent: &'a AntigenRecord,
    il_protein: String,
}

impl<'a> SequenceContextResolver<'a> {
    pub fn new(parent: &'a AntigenRecord) -> PipelineResult<Self> {
        parent.validate()?;
        Ok(Self {
            parent,
            il_protein: il_fold(&parent.protein_seq),
        })
    }

    /// All occurrences of `peptide`; empty when it does not occur.
    pub fn resolve(&self, peptide: &str) -> PipelineResult<Vec<Occurrence>> {
        if peptide.bytes().any(|b| b == STOP_MARKER) {
            return Err(PipelineError::input_shape(format!(
                "peptide {} contains a stop marker",
                peptide
            )));
        }
        let protein = self.parent.protein_seq.as_bytes();
        let pep_len = peptide.len();

        find_occurrences(peptide, &self.il_protein)
            .into_iter()
            .map(|position| {
                let il_peptide = self.parent.protein_seq[position..position + pep_len].to_string();
                Ok(Occurrence {
                    position,
                    relative_position: position as f64 / protein.len() as f64,
                    il_peptide,
                    local_disorder: window_mean(&self.parent.disorder, position, pep_len),
                    end_codon: self.codon(position + pep_len - 1).map(str::to_string),
                    post_codon: self.codon(position + pep_len).map(str::to_string),
                    start_scan: self.scan_upstream(position)?,
                    stop_distance: self.stop_distance(position + pep_len),
                    fragment: fragment_context(protein, position, pep_len),
                })
            })
            .collect()
    }

    /// Codon translated into residue `residue_index`, if the transcript
    /// covers it completely
    fn codon(&self, residue_index: usize) -> Option<&str> {
        let start = residue_index.checked_mul(3)?;
        self.parent.rna_seq.get(start..start + 3).filter(|c| c.len() == 3)
    }

    /// Walk codon by codon from the peptide start towards the 5' end,
    /// stopping at the first in-frame stop codon.
    fn scan_upstream(&self, position: usize) -> PipelineResult<StartCodonScan> {
        let rna = &self.parent.rna_seq;
        let mut scan = StartCodonScan {
            upstream: [false; START_CODONS.len()],
            start_distance: None,
            kozak_score: None,
        };

        for idx in (0..=position).rev() {
            let Some(codon) = self.codon(idx) else {
                continue;
            };
            if STOP_CODONS.contains(&codon) {
                break;
            }
            let Some(codon_type) = START_CODONS.iter().position(|c| *c == codon) else {
                continue;
            };
            scan.upstream[codon_type] = true;

            if codon != CANONICAL_START || scan.start_distance.is_some() {
                continue;
            }
            scan.start_distance = Some(position - idx);

            let codon_start = idx * 3;
            if codon_start > KOZAK_UPSTREAM && codon_start + KOZAK_WINDOW - KOZAK_UPSTREAM < rna.len() {
                let window = &rna[codon_start - KOZAK_UPSTREAM..codon_start + KOZAK_WINDOW - KOZAK_UPSTREAM];
                scan.kozak_score = Some(kozak_score(window)?);
            }
        }
        Ok(scan)
    }

    fn stop_distance(&self, from: usize) -> usize {
        let rest = &self.il_protein.as_bytes()[from.min(self.il_protein.len())..];
        rest.iter()
            .position(|&b| b == STOP_MARKER)
            .unwrap_or(rest.len())
    }
}

/// Local context within the `*`-delimited fragment containing
/// `protein[position..position + len]`.
fn fragment_context(protein: &[u8], position: usize, len: usize) -> FragmentContext {
    let start = protein[..position]
        .iter()
        .rposition(|&b| b == STOP_MARKER)
        .map_or(0, |idx| idx + 1);
    let end = protein[position + len..]
        .iter()
        .position(|&b| b == STOP_MARKER)
        .map_or(protein.len(), |idx| position + len + idx);
    let fragment = &protein[start..end];
    let local = (position - start) as isize;
    let local_end = local + len as isize;

    FragmentContext {
        length: fragment.len(),
        downstream: [Flank::at(fragment, local_end), Flank::at(fragment, local_end + 1)],
        upstream: [Flank::at(fragment, local - 1), Flank::at(fragment, local - 2)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn antigen(protein: &str, rna: &str) -> AntigenRecord {
        AntigenRecord {
            protein_id: "P1".to_string(),
            protein_seq: protein.to_string(),
            rna_seq: rna.to_string(),
            disorder: (0..protein.len()).map(|i| i as f64 / 10.0).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_occurrences_folds_isoleucine() {
        assert_eq!(find_occurrences("PEPTLDE", "MPEPTIDEK"), vec![1]);
        assert_eq!(find_occurrences("PEPTIDE", "MPEPTLDEK"), vec![1]);
        assert_eq!(find_occurrences("AAA", "AAAAA"), vec![0, 1, 2]);
        assert!(find_occurrences("WWW", "MPEPTIDEK").is_empty());
        assert!(find_occurrences("MPEPTIDEKK", "MPEPTIDEK").is_empty());
    }

    #[test]
    fn test_occurrences_reslice_to_peptide() {
        let parent = "MLKPEPTIDEQRSPEPTLDEVV";
        for pos in find_occurrences("PEPTIDE", parent) {
            assert_eq!(il_fold(&parent[pos..pos + 7]), il_fold("PEPTIDE"));
        }
        assert_eq!(find_occurrences("PEPTIDE", parent).len(), 2);
    }

    #[test]
    fn test_multi_orf_example() {
        let protein = "MPEPTIDEXXXSTOP*REST";
        let record = antigen(protein, &"A".repeat(protein.len() * 3));
        let resolver = SequenceContextResolver::new(&record).unwrap();
        let occurrences = resolver.resolve("PEPTIDE").unwrap();

        assert_eq!(occurrences.len(), 1);
        let occ = &occurrences[0];
        assert_eq!(occ.position, 1);
        assert_eq!(occ.stop_distance, 7);
        assert_eq!(occ.fragment.length, 15);
        assert_eq!(occ.fragment.downstream[0], Flank::Residue(b'X'));
        assert_eq!(occ.fragment.downstream[1], Flank::Residue(b'X'));
        assert_eq!(occ.fragment.upstream[0], Flank::Residue(b'M'));
        assert_eq!(occ.fragment.upstream[1], Flank::OutOfBounds);
        assert_relative_eq!(occ.relative_position, 1.0 / 20.0);
        assert_relative_eq!(occ.local_disorder.unwrap(), (0.1 + 0.7) / 2.0);
    }

    #[test]
    fn test_fragment_flanks_at_fragment_end() {
        let protein = "MAAK*PEPTLDE*GG";
        let record = antigen(protein, &"A".repeat(protein.len() * 3));
        let resolver = SequenceContextResolver::new(&record).unwrap();
        let occ = &resolver.resolve("PEPTIDE").unwrap()[0];

        assert_eq!(occ.position, 5);
        assert_eq!(occ.fragment.length, 7);
        assert!(occ.fragment.downstream.iter().all(Flank::is_out_of_bounds));
        assert!(occ.fragment.upstream.iter().all(Flank::is_out_of_bounds));
        assert_eq!(occ.stop_distance, 0);
        assert_eq!(occ.il_peptide, "PEPTLDE");
    }

    #[test]
    fn test_no_stop_reads_to_end() {
        let protein = "MPEPTIDEKR";
        let record = antigen(protein, &"A".repeat(30));
        let resolver = SequenceContextResolver::new(&record).unwrap();
        let occ = &resolver.resolve("PEPTIDE").unwrap()[0];
        assert_eq!(occ.stop_distance, 2);
        assert_eq!(occ.fragment.length, 10);
    }

    #[test]
    fn test_codons_and_upstream_scan() {
        // codons: GCC AUG CUG AAA GGG UUU
        let protein = "AMLKGF";
        let rna = "GCCAUGCUGAAAGGGUUU";
        let record = antigen(protein, rna);
        let resolver = SequenceContextResolver::new(&record).unwrap();
        let occ = &resolver.resolve("KG").unwrap()[0];

        assert_eq!(occ.position, 3);
        assert_eq!(occ.end_codon.as_deref(), Some("GGG"));
        assert_eq!(occ.post_codon.as_deref(), Some("UUU"));
        assert_eq!(occ.start_scan.upstream, [true, true, false, false, false]);
        assert_eq!(occ.start_scan.start_distance, Some(2));
        // AUG at nt 3 is too close to the 5' end for a Kozak window
        assert_eq!(occ.start_scan.kozak_score, None);
    }

    #[test]
    fn test_scan_stops_at_stop_codon() {
        // codons: AUG UAA CUG AAA
        let protein = "M*LK";
        let rna = "AUGUAACUGAAA";
        let record = antigen(protein, rna);
        let resolver = SequenceContextResolver::new(&record).unwrap();
        let occ = &resolver.resolve("LK").unwrap()[0];

        assert_eq!(occ.start_scan.upstream, [false, true, false, false, false]);
        assert_eq!(occ.start_scan.start_distance, None);
        assert_eq!(occ.post_codon, None);
    }

    #[test]
    fn test_kozak_computed_for_nearest_aug() {
        // 5 codons of context, AUG at residue 5, peptide at residue 7
        let protein = "GGGGGMAKRSTVW";
        let rna = format!("{}{}{}", "GCC".repeat(5), "AUG", "GCC".repeat(7));
        let record = antigen(protein, &rna);
        let resolver = SequenceContextResolver::new(&record).unwrap();
        let occ = &resolver.resolve("KRS").unwrap()[0];

        assert_eq!(occ.start_scan.start_distance, Some(2));
        let window = &rna[15 - 10..15 + 13];
        assert_eq!(occ.start_scan.kozak_score, Some(kozak_score(window).unwrap()));
    }

    #[test]
    fn test_mismatched_disorder_is_input_shape_error() {
        let mut record = antigen("MPEPTIDE", &"A".repeat(24));
        record.disorder.pop();
        assert!(matches!(
            SequenceContextResolver::new(&record),
            Err(PipelineError::InputShape(_))
        ));
    }
}
