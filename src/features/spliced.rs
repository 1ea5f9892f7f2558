//! Junction features for spliced peptides.
//!
//! A spliced peptide is `SR1 + SR2`, two fragments of one parent ligated at
//! a junction. Flanks are named after the protease site convention: `p1`,
//! `p2` end SR1, `p_minus_1`, `p_minus_2` follow SR1 in the parent, and the
//! primed positions mirror this around the start of SR2.

use super::context::find_occurrences;
use super::{window_mean, RowBuilder};
use crate::data::schema::one_hot_column;
use crate::data::{
    il_fold, AntigenRecord, FeatureRow, FeatureSchema, Flank, ModelKind, SplicedOccurrence,
    AMINO_ACIDS,
};
use crate::error::{PipelineError, PipelineResult};
use std::collections::{BTreeSet, HashMap};

/// Residues around the splice junction of one spliced occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionFlanks {
    pub p2: Flank,
    pub p1: Flank,
    pub p_minus_1: Flank,
    pub p_minus_2: Flank,
    pub p_minus_2_prime: Flank,
    pub p_minus_1_prime: Flank,
    pub p1_prime: Flank,
    pub p2_prime: Flank,
}

impl JunctionFlanks {
    fn new(protein: &[u8], sr1_end: usize, sr2_index: usize) -> Self {
        let sr1_end = sr1_end as isize;
        let sr2_index = sr2_index as isize;
        Self {
            p2: Flank::at(protein, sr1_end - 2),
            p1: Flank::at(protein, sr1_end - 1),
            p_minus_1: Flank::at(protein, sr1_end),
            p_minus_2: Flank::at(protein, sr1_end + 1),
            p_minus_2_prime: Flank::at(protein, sr2_index - 2),
            p_minus_1_prime: Flank::at(protein, sr2_index - 1),
            p1_prime: Flank::at(protein, sr2_index),
            p2_prime: Flank::at(protein, sr2_index + 1),
        }
    }

    /// Flanks that receive an amino-acid one-hot, keyed by column prefix
    fn one_hot_positions(&self) -> [(&'static str, Flank); 6] {
        [
            ("p2", self.p2),
            ("p1", self.p1),
            ("p_neg_1", self.p_minus_1),
            ("p_neg_1_prime", self.p_minus_1_prime),
            ("p1_prime", self.p1_prime),
            ("p2_prime", self.p2_prime),
        ]
    }

    fn annotated(&self) -> [(&'static str, Flank); 8] {
        [
            ("p2", self.p2),
            ("p1", self.p1),
            ("p_minus_1", self.p_minus_1),
            ("p_minus_2", self.p_minus_2),
            ("p_minus_2_prime", self.p_minus_2_prime),
            ("p_minus_1_prime", self.p_minus_1_prime),
            ("p1_prime", self.p1_prime),
            ("p2_prime", self.p2_prime),
        ]
    }
}

/// Emits one row per spliced occurrence.
pub struct SplicedFeatureExtractor {
    schema: FeatureSchema,
    extra_numeric: Vec<String>,
    /// Known canonical identifications per canonical parent
    canonical_peptides: HashMap<String, BTreeSet<String>>,
}

impl SplicedFeatureExtractor {
    pub fn new(
        extra_numeric: &[String],
        canonical_peptides: HashMap<String, BTreeSet<String>>,
    ) -> Self {
        Self {
            schema: ModelKind::Spliced.schema(extra_numeric),
            extra_numeric: extra_numeric.to_vec(),
            canonical_peptides,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn extract(
        &self,
        peptide: &str,
        occurrence: &SplicedOccurrence,
        parent: &AntigenRecord,
        label: u8,
    ) -> PipelineResult<FeatureRow> {
        parent.validate()?;
        let protein = parent.protein_seq.as_bytes();
        let sr1_len = occurrence.sr1.len();
        if sr1_len == 0 || sr1_len >= peptide.len() {
            return Err(PipelineError::input_shape(format!(
                "{}: SR1 '{}' does not split the peptide into two fragments",
                peptide, occurrence.sr1
            )));
        }
        let sr2_len = peptide.len() - sr1_len;
        let sr1_end = occurrence.sr1_index + sr1_len;
        if sr1_end > protein.len() || occurrence.sr2_index + sr2_len > protein.len() {
            return Err(PipelineError::input_shape(format!(
                "{}: fragments at {}/{} exceed {} (length {})",
                peptide,
                occurrence.sr1_index,
                occurrence.sr2_index,
                parent.protein_id,
                protein.len()
            )));
        }
        let sr1 = &parent.protein_seq[occurrence.sr1_index..sr1_end];
        let sr2 = &parent.protein_seq[occurrence.sr2_index..occurrence.sr2_index + sr2_len];
        let flanks = JunctionFlanks::new(protein, sr1_end, occurrence.sr2_index);

        let mut row = RowBuilder::new(&self.schema);
        row.set("protLength", Some(protein.len() as f64));
        row.set("sr1_Index", Some(occurrence.sr1_index as f64));
        row.set("sr2_Index", Some(occurrence.sr2_index as f64));
        row.set("interveningSeqLengths", Some(occurrence.intervening as f64));
        row.set_flag("isForward", occurrence.is_forward);
        row.set(
            "sr1_localDisorder",
            window_mean(&parent.disorder, occurrence.sr1_index, sr1_len),
        );
        row.set(
            "sr2_localDisorder",
            window_mean(&parent.disorder, occurrence.sr2_index, sr2_len),
        );

        for (position, flank) in flanks.one_hot_positions() {
            for residue in AMINO_ACIDS.bytes() {
                row.set_flag(
                    &one_hot_column(position, residue as char),
                    flank.residue() == Some(residue),
                );
            }
        }

        let known = self.canonical_peptides.get(&parent.protein_id);
        row.set(
            "nCanonicalPeptides",
            Some(known.map_or(0, BTreeSet::len) as f64),
        );
        let starts = known
            .map(|peptides| canonical_starts(peptides, &parent.protein_seq))
            .unwrap_or_default();
        row.set("sr1_can_dist", nearest_distance(occurrence.sr1_index, &starts));
        row.set("sr2_can_dist", nearest_distance(occurrence.sr2_index, &starts));

        for column in ModelKind::Spliced.metadata_columns() {
            row.set(&column, parent.metadata_value(&column));
        }
        for column in &self.extra_numeric {
            row.set(column, parent.metadata_value(column));
        }

        row.annotate("geneID", parent.gene_id.clone().unwrap_or_default());
        row.annotate("sr1", sr1);
        row.annotate("sr2", sr2);
        for (name, flank) in flanks.annotated() {
            row.annotate(name, flank.as_char().to_string());
        }
        Ok(row.finish(peptide, &parent.protein_id, label))
    }
}

/// Start offsets of every known canonical peptide in the IL-folded parent
fn canonical_starts(peptides: &BTreeSet<String>, protein: &str) -> Vec<usize> {
    let il_protein = il_fold(protein);
    peptides
        .iter()
        .flat_map(|peptide| find_occurrences(peptide, &il_protein))
        .collect()
}

fn nearest_distance(index: usize, starts: &[usize]) -> Option<f64> {
    starts
        .iter()
        .map(|&start| index.abs_diff(start))
        .min()
        .map(|d| d as f64)
}
