pub mod loader;
pub mod preprocessing;
pub mod schema;

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

pub use schema::{FeatureSchema, ModelKind};

/// Standard amino acids used for one-hot residue encodings
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Recognized translation start codons, in feature-column order
pub const START_CODONS: [&str; 5] = ["AUG", "CUG", "GUG", "AUC", "ACG"];

/// The canonical start codon, the only one with distance and Kozak context
pub const CANONICAL_START: &str = "AUG";

/// Translation stop codons
pub const STOP_CODONS: [&str; 3] = ["UAA", "UAG", "UGA"];

/// Stop marker embedded in multi-ORF protein sequences
pub const STOP_MARKER: u8 = b'*';

/// Sentinel written to tables for a flank that falls outside the sequence
pub const OUT_OF_BOUNDS: char = 'X';

/// Fold Isoleucine onto Leucine so the two are indistinguishable in searches.
pub fn il_fold(sequence: &str) -> String {
    sequence.replace('I', "L")
}

/// Physico-chemical residue groups used for terminal-residue one-hots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResidueGroup {
    Acidic,
    Basic,
    Hydrophobic,
    Polar,
    SpecialCase,
}

impl ResidueGroup {
    pub const ALL: [ResidueGroup; 5] = [
        ResidueGroup::Acidic,
        ResidueGroup::Basic,
        ResidueGroup::Hydrophobic,
        ResidueGroup::Polar,
        ResidueGroup::SpecialCase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResidueGroup::Acidic => "acidic",
            ResidueGroup::Basic => "basic",
            ResidueGroup::Hydrophobic => "hydrophobic",
            ResidueGroup::Polar => "polar",
            ResidueGroup::SpecialCase => "special-case",
        }
    }

    /// Group of a standard residue, `None` for anything else
    pub fn of(residue: u8) -> Option<Self> {
        match residue {
            b'D' | b'E' => Some(ResidueGroup::Acidic),
            b'K' | b'R' | b'H' => Some(ResidueGroup::Basic),
            b'M' | b'A' | b'V' | b'I' | b'L' | b'F' | b'Y' | b'W' => {
                Some(ResidueGroup::Hydrophobic)
            }
            b'N' | b'Q' | b'S' | b'T' | b'G' | b'C' => Some(ResidueGroup::Polar),
            b'P' => Some(ResidueGroup::SpecialCase),
            _ => None,
        }
    }
}

/// Source class of a peptide.
///
/// The declaration order is fixed: `index()` is the numeric encoding fed to
/// models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stratum {
    #[serde(rename = "canonical")]
    Canonical,
    #[serde(rename = "fiveUTR")]
    FiveUtr,
    #[serde(rename = "threeUTR")]
    ThreeUtr,
    #[serde(rename = "CDS_frameshift")]
    CdsFrameshift,
    #[serde(rename = "lncRNA")]
    LncRna,
    #[serde(rename = "intronic")]
    Intronic,
    #[serde(rename = "intergenic")]
    Intergenic,
    #[serde(rename = "spliced")]
    Spliced,
}

impl Stratum {
    pub const ALL: [Stratum; 8] = [
        Stratum::Canonical,
        Stratum::FiveUtr,
        Stratum::ThreeUtr,
        Stratum::CdsFrameshift,
        Stratum::LncRna,
        Stratum::Intronic,
        Stratum::Intergenic,
        Stratum::Spliced,
    ];

    pub const CRYPTIC: [Stratum; 6] = [
        Stratum::FiveUtr,
        Stratum::ThreeUtr,
        Stratum::CdsFrameshift,
        Stratum::LncRna,
        Stratum::Intronic,
        Stratum::Intergenic,
    ];

    /// Strata whose peptides are contiguous substrings of a parent
    pub const CONTIGUOUS: [Stratum; 7] = [
        Stratum::Canonical,
        Stratum::FiveUtr,
        Stratum::ThreeUtr,
        Stratum::CdsFrameshift,
        Stratum::LncRna,
        Stratum::Intronic,
        Stratum::Intergenic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stratum::Canonical => "canonical",
            Stratum::FiveUtr => "fiveUTR",
            Stratum::ThreeUtr => "threeUTR",
            Stratum::CdsFrameshift => "CDS_frameshift",
            Stratum::LncRna => "lncRNA",
            Stratum::Intronic => "intronic",
            Stratum::Intergenic => "intergenic",
            Stratum::Spliced => "spliced",
        }
    }

    pub fn index(&self) -> usize {
        Stratum::ALL.iter().position(|s| s == self).unwrap_or_default()
    }

    pub fn is_cryptic(&self) -> bool {
        Stratum::CRYPTIC.contains(self)
    }

    /// Stratum-specific numeric metadata carried over from the antigen table
    pub fn metadata_columns(&self) -> &'static [&'static str] {
        match self {
            Stratum::Canonical => &["ubiCounts", "acetylCounts"],
            Stratum::Spliced => &["ubiCounts", "acetylCounts"],
            Stratum::CdsFrameshift => &["codingStrand", "mismatches"],
            Stratum::Intergenic => &["deNovoAssembly"],
            Stratum::FiveUtr | Stratum::ThreeUtr | Stratum::LncRna | Stratum::Intronic => &[],
        }
    }
}

impl fmt::Display for Stratum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stratum {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stratum::ALL
            .iter()
            .find(|stratum| stratum.as_str() == s)
            .copied()
            .ok_or_else(|| PipelineError::UnknownStratum(s.to_string()))
    }
}

/// A residue next to a peptide or junction, or the fact that there is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flank {
    Residue(u8),
    OutOfBounds,
}

impl Flank {
    /// Residue at `index` of `sequence`, out of bounds for negative or
    /// past-the-end indices
    pub fn at(sequence: &[u8], index: isize) -> Self {
        if index < 0 {
            return Flank::OutOfBounds;
        }
        sequence
            .get(index as usize)
            .map_or(Flank::OutOfBounds, |&residue| Flank::Residue(residue))
    }

    pub fn residue(&self) -> Option<u8> {
        match self {
            Flank::Residue(residue) => Some(*residue),
            Flank::OutOfBounds => None,
        }
    }

    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, Flank::OutOfBounds)
    }

    pub fn as_char(&self) -> char {
        match self {
            Flank::Residue(residue) => *residue as char,
            Flank::OutOfBounds => OUT_OF_BOUNDS,
        }
    }
}

/// One parent sequence from the antigen reference store.
#[derive(Debug, Clone, Default)]
pub struct AntigenRecord {
    /// Parent identifier
    pub protein_id: String,
    /// Gene identifier, where the stratum defines one
    pub gene_id: Option<String>,
    /// Protein sequence, possibly containing `*` stop markers
    pub protein_seq: String,
    /// Source RNA, three nucleotides per residue
    pub rna_seq: String,
    /// Per-residue disorder predictions, aligned to `protein_seq`
    pub disorder: Vec<f64>,
    /// Whole-protein GRAVY score
    pub hydrophobicity: Option<f64>,
    /// Numeric extras: transcript expression, proteomics and stratum metadata
    pub metadata: BTreeMap<String, f64>,
}

impl AntigenRecord {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.protein_seq.is_empty() {
            return Err(PipelineError::input_shape(format!(
                "{}: empty protein sequence",
                self.protein_id
            )));
        }
        if self.disorder.len() != self.protein_seq.len() {
            return Err(PipelineError::input_shape(format!(
                "{}: {} disorder scores for a protein of length {}",
                self.protein_id,
                self.disorder.len(),
                self.protein_seq.len()
            )));
        }
        Ok(())
    }

    pub fn metadata_value(&self, name: &str) -> Option<f64> {
        self.metadata.get(name).copied().filter(|v| v.is_finite())
    }
}

/// Antigen records of one stratum keyed by parent identifier
#[derive(Debug, Clone)]
pub struct AntigenStore {
    pub stratum: Stratum,
    records: HashMap<String, AntigenRecord>,
}

impl AntigenStore {
    pub fn new(stratum: Stratum, records: Vec<AntigenRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.protein_id.clone(), record))
            .collect();
        Self { stratum, records }
    }

    pub fn get(&self, protein_id: &str) -> Option<&AntigenRecord> {
        self.records.get(protein_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in identifier order
    pub fn iter_sorted(&self) -> Vec<&AntigenRecord> {
        let mut records: Vec<&AntigenRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.protein_id.cmp(&b.protein_id));
        records
    }
}

/// One way a peptide can be produced by ligating two fragments of a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplicedOccurrence {
    pub protein_id: String,
    /// The N-terminal part of the peptide
    pub sr1: String,
    /// Offset of the SR1 fragment in the parent
    pub sr1_index: usize,
    /// Offset of the SR2 fragment in the parent
    pub sr2_index: usize,
    /// Residues between the two fragments
    pub intervening: usize,
    /// Whether SR1 precedes SR2 in the parent
    pub is_forward: bool,
}

/// Where a peptide maps in the reference: the remapping collaborator's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedPeptide {
    pub peptide: String,
    /// Parents per contiguous stratum
    pub proteins: BTreeMap<Stratum, Vec<String>>,
    pub spliced: Vec<SplicedOccurrence>,
    pub fusion_proteins: usize,
    pub mutation_proteins: usize,
    pub trembl_proteins: usize,
}

impl MappedPeptide {
    pub fn new(peptide: impl Into<String>) -> Self {
        Self {
            peptide: peptide.into(),
            ..Default::default()
        }
    }

    pub fn proteins_in(&self, stratum: Stratum) -> &[String] {
        self.proteins.get(&stratum).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn n_proteins(&self, stratum: Stratum) -> usize {
        match stratum {
            Stratum::Spliced => self.n_spliced_proteins(),
            _ => self.proteins_in(stratum).len(),
        }
    }

    pub fn n_cryptic_proteins(&self) -> usize {
        Stratum::CRYPTIC.iter().map(|s| self.proteins_in(*s).len()).sum()
    }

    pub fn n_spliced_proteins(&self) -> usize {
        let mut ids: Vec<&str> = self.spliced.iter().map(|o| o.protein_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Mutation, fusion and isoform-database hits are reserved for positives
    pub fn has_reserved_source(&self) -> bool {
        self.fusion_proteins > 0 || self.mutation_proteins > 0 || self.trembl_proteins > 0
    }

    /// The single stratum this peptide is attributed to, if unambiguous.
    ///
    /// Canonical wins over everything; otherwise exactly one cryptic stratum
    /// must match; spliced applies only without any contiguous match.
    pub fn realized_stratum(&self) -> Option<Stratum> {
        if self.n_proteins(Stratum::Canonical) > 0 {
            return Some(Stratum::Canonical);
        }
        let cryptic: Vec<Stratum> = Stratum::CRYPTIC
            .iter()
            .copied()
            .filter(|s| self.n_proteins(*s) > 0)
            .collect();
        match cryptic.as_slice() {
            [single] => Some(*single),
            [] if !self.spliced.is_empty() => Some(Stratum::Spliced),
            _ => None,
        }
    }

    /// Whether the peptide may stand in as a background example for `stratum`.
    pub fn is_background_for(&self, stratum: Stratum) -> bool {
        if self.has_reserved_source() || self.realized_stratum() != Some(stratum) {
            return false;
        }
        match stratum {
            Stratum::Spliced => true,
            _ => self.spliced.is_empty(),
        }
    }
}

/// A genuine identification from the assembled peptide store
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub mapping: MappedPeptide,
    /// Stratum label assigned by the database assembly, including
    /// `cryptic` and `multi-mapped`
    pub stratum_label: String,
    pub cell_lines: Vec<String>,
    pub datasets: Vec<String>,
    pub discoverable: bool,
}

impl Identification {
    pub fn peptide(&self) -> &str {
        &self.mapping.peptide
    }

    pub fn is_multi_mapped(&self) -> bool {
        self.stratum_label == "multi-mapped"
    }
}

/// One emitted training example: a peptide occurrence and its features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub peptide: String,
    pub protein_id: String,
    /// 1 = genuine identification, 0 = background
    pub label: u8,
    /// Numeric features in schema order; `None` is an explicit null
    pub values: Vec<Option<f64>>,
    /// String-valued context columns in schema order
    pub annotations: Vec<String>,
}

impl FeatureRow {
    pub fn value(&self, schema: &FeatureSchema, name: &str) -> Option<f64> {
        schema.index_of(name).and_then(|idx| self.values[idx])
    }

    pub fn annotation<'a>(&'a self, schema: &FeatureSchema, name: &str) -> Option<&'a str> {
        schema
            .annotation_index_of(name)
            .map(|idx| self.annotations[idx].as_str())
    }
}

/// Append-only collection of rows sharing one schema
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: FeatureRow) -> PipelineResult<()> {
        if row.values.len() != self.schema.numeric.len()
            || row.annotations.len() != self.schema.annotations.len()
        {
            return Err(PipelineError::input_shape(format!(
                "row for {} has {}/{} columns, schema has {}/{}",
                row.peptide,
                row.values.len(),
                row.annotations.len(),
                self.schema.numeric.len(),
                self.schema.annotations.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = FeatureRow>) -> PipelineResult<()> {
        for row in rows {
            self.push(row)?;
        }
        Ok(())
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positive_count(&self) -> usize {
        self.rows.iter().filter(|r| r.label == 1).count()
    }

    /// Keep the first row for every `(peptide, proteinID)` pair
    pub fn unique_by_peptide_protein(self) -> Self {
        let mut seen = std::collections::HashSet::new();
        let rows = self
            .rows
            .into_iter()
            .filter(|row| seen.insert((row.peptide.clone(), row.protein_id.clone())))
            .collect();
        Self {
            schema: self.schema,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(peptide: &str, strata: &[(Stratum, &str)]) -> MappedPeptide {
        let mut mapping = MappedPeptide::new(peptide);
        for (stratum, protein) in strata {
            mapping
                .proteins
                .entry(*stratum)
                .or_default()
                .push(protein.to_string());
        }
        mapping
    }

    fn spliced_occurrence(protein: &str) -> SplicedOccurrence {
        SplicedOccurrence {
            protein_id: protein.to_string(),
            sr1: "AAA".to_string(),
            sr1_index: 0,
            sr2_index: 10,
            intervening: 7,
            is_forward: true,
        }
    }

    #[test]
    fn test_stratum_round_trip() {
        for stratum in Stratum::ALL {
            assert_eq!(stratum.as_str().parse::<Stratum>().unwrap(), stratum);
        }
        assert!("multi-mapped".parse::<Stratum>().is_err());
        assert_eq!(Stratum::Canonical.index(), 0);
        assert_eq!(Stratum::Spliced.index(), 7);
    }

    #[test]
    fn test_residue_groups_cover_standard_amino_acids() {
        for residue in AMINO_ACIDS.bytes() {
            assert!(ResidueGroup::of(residue).is_some(), "{}", residue as char);
        }
        assert_eq!(ResidueGroup::of(b'X'), None);
        assert_eq!(ResidueGroup::of(b'P'), Some(ResidueGroup::SpecialCase));
    }

    #[test]
    fn test_flank_bounds() {
        let seq = b"ACD";
        assert_eq!(Flank::at(seq, -1), Flank::OutOfBounds);
        assert_eq!(Flank::at(seq, 0), Flank::Residue(b'A'));
        assert_eq!(Flank::at(seq, 3), Flank::OutOfBounds);
        assert_eq!(Flank::OutOfBounds.as_char(), 'X');
    }

    #[test]
    fn test_realized_stratum() {
        assert_eq!(
            mapped("PEPTLDE", &[(Stratum::Canonical, "P1"), (Stratum::Intronic, "P2")])
                .realized_stratum(),
            Some(Stratum::Canonical)
        );
        assert_eq!(
            mapped("PEPTLDE", &[(Stratum::Intronic, "P2")]).realized_stratum(),
            Some(Stratum::Intronic)
        );
        assert_eq!(
            mapped("PEPTLDE", &[(Stratum::Intronic, "P2"), (Stratum::LncRna, "P3")])
                .realized_stratum(),
            None
        );

        let mut spliced = MappedPeptide::new("PEPTLDE");
        spliced.spliced.push(spliced_occurrence("P1"));
        assert_eq!(spliced.realized_stratum(), Some(Stratum::Spliced));
    }

    #[test]
    fn test_background_exclusions() {
        let mut intronic = mapped("PEPTLDE", &[(Stratum::Intronic, "P2")]);
        assert!(intronic.is_background_for(Stratum::Intronic));
        assert!(!intronic.is_background_for(Stratum::FiveUtr));

        intronic.spliced.push(spliced_occurrence("P1"));
        assert!(!intronic.is_background_for(Stratum::Intronic));

        let mut reserved = mapped("PEPTLDE", &[(Stratum::Canonical, "P1")]);
        reserved.trembl_proteins = 1;
        assert!(!reserved.is_background_for(Stratum::Canonical));
    }

    #[test]
    fn test_feature_table_rejects_wrong_width() {
        let schema = FeatureSchema::new(vec!["a".into(), "b".into()], vec!["note".into()]);
        let mut table = FeatureTable::new(schema);
        let bad = FeatureRow {
            peptide: "PEPTLDE".into(),
            protein_id: "P1".into(),
            label: 1,
            values: vec![Some(1.0)],
            annotations: vec![String::new()],
        };
        assert!(matches!(table.push(bad), Err(PipelineError::InputShape(_))));
        assert!(table.is_empty());
    }
}
