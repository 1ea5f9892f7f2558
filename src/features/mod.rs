//! Sequence-context feature extraction for contiguous and spliced peptides.

pub mod context;
pub mod contiguous;
pub mod kozak;
pub mod spliced;

use crate::data::{FeatureRow, FeatureSchema};

pub use context::{find_occurrences, Occurrence, SequenceContextResolver};
pub use contiguous::FeatureExtractor;
pub use kozak::kozak_score;
pub use spliced::SplicedFeatureExtractor;

/// Kyte-Doolittle hydropathy, `None` for non-standard residues
fn kyte_doolittle(residue: u8) -> Option<f64> {
    let value = match residue {
        b'A' => 1.8,
        b'C' => 2.5,
        b'D' => -3.5,
        b'E' => -3.5,
        b'F' => 2.8,
        b'G' => -0.4,
        b'H' => -3.2,
        b'I' => 4.5,
        b'K' => -3.9,
        b'L' => 3.8,
        b'M' => 1.9,
        b'N' => -3.5,
        b'P' => -1.6,
        b'Q' => -3.5,
        b'R' => -4.5,
        b'S' => -0.8,
        b'T' => -0.7,
        b'V' => 4.2,
        b'W' => -0.9,
        b'Y' => -1.3,
        _ => return None,
    };
    Some(value)
}

/// Grand average of hydropathy; `None` if any residue is non-standard.
pub fn gravy(peptide: &str) -> Option<f64> {
    if peptide.is_empty() {
        return None;
    }
    let total: Option<f64> = peptide.bytes().map(kyte_doolittle).sum();
    total.map(|sum| sum / peptide.len() as f64)
}

/// Fractions of A, C, G and U over the whole transcript
pub fn nucleotide_fractions(rna: &str) -> [Option<f64>; 4] {
    if rna.is_empty() {
        return [None; 4];
    }
    let len = rna.len() as f64;
    let count = |base: u8| rna.bytes().filter(|&b| b == base).count() as f64 / len;
    [
        Some(count(b'A')),
        Some(count(b'C')),
        Some(count(b'G')),
        Some(count(b'U')),
    ]
}

/// Mean of a window, `None` when the window is empty or out of range
pub fn window_mean(values: &[f64], start: usize, len: usize) -> Option<f64> {
    let window = values.get(start..start.checked_add(len)?)?;
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

/// Fills one schema-complete row by column name.
///
/// Columns outside the schema are ignored, so one extractor serves models
/// whose schemas differ only in metadata columns.
pub(crate) struct RowBuilder<'s> {
    schema: &'s FeatureSchema,
    values: Vec<Option<f64>>,
    annotations: Vec<String>,
}

impl<'s> RowBuilder<'s> {
    pub(crate) fn new(schema: &'s FeatureSchema) -> Self {
        Self {
            schema,
            values: vec![None; schema.numeric.len()],
            annotations: vec![String::new(); schema.annotations.len()],
        }
    }

    pub(crate) fn set(&mut self, name: &str, value: Option<f64>) {
        if let Some(idx) = self.schema.index_of(name) {
            self.values[idx] = value;
        }
    }

    pub(crate) fn set_flag(&mut self, name: &str, flag: bool) {
        self.set(name, Some(if flag { 1.0 } else { 0.0 }));
    }

    pub(crate) fn annotate(&mut self, name: &str, value: impl Into<String>) {
        if let Some(idx) = self.schema.annotation_index_of(name) {
            self.annotations[idx] = value.into();
        }
    }

    pub(crate) fn finish(self, peptide: &str, protein_id: &str, label: u8) -> FeatureRow {
        FeatureRow {
            peptide: peptide.to_string(),
            protein_id: protein_id.to_string(),
            label,
            values: self.values,
            annotations: self.annotations,
        }
    }
}
