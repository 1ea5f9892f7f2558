//! Feature-schema descriptors indexed by model kind and stratum.

use crate::data::{ResidueGroup, Stratum, AMINO_ACIDS, START_CODONS};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Junction positions that receive a residue one-hot in spliced rows
pub const SPLICED_ONE_HOT_POSITIONS: [&str; 6] =
    ["p2", "p1", "p_neg_1", "p_neg_1_prime", "p1_prime", "p2_prime"];

/// Ordered numeric and string columns shared by every row of one model kind
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    pub numeric: Vec<String>,
    pub annotations: Vec<String>,
    numeric_index: HashMap<String, usize>,
    annotation_index: HashMap<String, usize>,
}

impl FeatureSchema {
    pub fn new(numeric: Vec<String>, annotations: Vec<String>) -> Self {
        let numeric_index = numeric
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let annotation_index = annotations
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            numeric,
            annotations,
            numeric_index,
            annotation_index,
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.numeric_index.get(name).copied()
    }

    pub fn annotation_index_of(&self, name: &str) -> Option<usize> {
        self.annotation_index.get(name).copied()
    }

    /// Indices of `names` in this schema, failing on the first unknown one
    pub fn indices_of(&self, names: &[String]) -> Result<Vec<usize>, PipelineError> {
        names
            .iter()
            .map(|name| {
                self.index_of(name).ok_or_else(|| {
                    PipelineError::configuration(format!("feature '{}' is not in the schema", name))
                })
            })
            .collect()
    }
}

/// Which classifier a run trains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Canonical,
    Cryptic,
    Spliced,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Canonical => "canonical",
            ModelKind::Cryptic => "cryptic",
            ModelKind::Spliced => "spliced",
        }
    }

    /// Key the final fold models are saved under
    pub fn model_key(&self) -> &'static str {
        match self {
            ModelKind::Canonical | ModelKind::Cryptic => "combined",
            ModelKind::Spliced => "spliced",
        }
    }

    pub fn strata(&self) -> &'static [Stratum] {
        match self {
            ModelKind::Canonical => &[Stratum::Canonical],
            ModelKind::Cryptic => &Stratum::CRYPTIC,
            ModelKind::Spliced => &[Stratum::Spliced],
        }
    }

    /// Union of the strata's metadata columns, first-seen order
    pub fn metadata_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for stratum in self.strata() {
            for column in stratum.metadata_columns() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }
        columns
    }

    /// Full emitted schema for this model kind
    pub fn schema(&self, extra_numeric: &[String]) -> FeatureSchema {
        let mut numeric = match self {
            ModelKind::Canonical | ModelKind::Cryptic => contiguous_numeric_columns(),
            ModelKind::Spliced => spliced_numeric_columns(),
        };
        numeric.extend(self.metadata_columns());
        for column in extra_numeric {
            if !numeric.contains(column) {
                numeric.push(column.clone());
            }
        }
        let annotations = match self {
            ModelKind::Canonical | ModelKind::Cryptic => contiguous_annotation_columns(),
            ModelKind::Spliced => spliced_annotation_columns(),
        };
        FeatureSchema::new(numeric, annotations)
    }

    /// Columns the classifier is trained on
    pub fn train_features(&self, extra_numeric: &[String]) -> Vec<String> {
        let mut features: Vec<String> = match self {
            ModelKind::Canonical => {
                let mut features = names(&["ubiCounts", "acetylCounts"]);
                features.extend(nucleotide_columns());
                features.extend(names(&[
                    "protLength",
                    "relativePosition",
                    "start_dist",
                    "proteinHydrophobicity",
                    "peptideHydrophobicity",
                ]));
                features.extend(c_term_columns());
                features
            }
            ModelKind::Cryptic => {
                let mut features = names(&[
                    "stratum",
                    "protLength",
                    "relativePosition",
                    "proteinHydrophobicity",
                    "peptideHydrophobicity",
                ]);
                features.extend(c_term_columns());
                features.extend(nucleotide_columns());
                features.extend(names(&[
                    "codingStrand",
                    "mismatches",
                    "deNovoAssembly",
                    "stopDistances",
                    "start_dist",
                    "kozakScore",
                ]));
                features.extend(upstream_columns());
                features
            }
            ModelKind::Spliced => {
                let mut features = names(&[
                    "ubiCounts",
                    "acetylCounts",
                    "nCanonicalPeptides",
                    "sr2_can_dist",
                    "sr1_can_dist",
                    "interveningSeqLengths",
                    "isForward",
                    "protLength",
                ]);
                features.extend(one_hot_columns("p1"));
                features.extend(one_hot_columns("p1_prime"));
                features
            }
        };
        features.extend(extra_numeric.iter().cloned());
        features
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "canonical" => Ok(ModelKind::Canonical),
            "cryptic" => Ok(ModelKind::Cryptic),
            "spliced" => Ok(ModelKind::Spliced),
            other => Err(PipelineError::configuration(format!(
                "unknown model kind '{}'",
                other
            ))),
        }
    }
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

pub fn nucleotide_columns() -> Vec<String> {
    ["A", "C", "G", "U"].iter().map(|n| format!("{}_frac", n)).collect()
}

pub fn c_term_group_column(group: ResidueGroup) -> String {
    format!("C_term_{}", group.as_str())
}

pub fn downstream_group_column(group: ResidueGroup) -> String {
    format!("C_term_neg_1_{}", group.as_str())
}

pub fn upstream_column(codon: &str) -> String {
    format!("{}_upstream", codon)
}

pub fn one_hot_column(position: &str, residue: char) -> String {
    format!("{}_{}", position, residue)
}

fn c_term_columns() -> Vec<String> {
    let mut columns: Vec<String> = ResidueGroup::ALL.iter().map(|g| c_term_group_column(*g)).collect();
    columns.extend(ResidueGroup::ALL.iter().map(|g| downstream_group_column(*g)));
    columns.push("C_term_neg_1_end".to_string());
    columns
}

fn upstream_columns() -> Vec<String> {
    START_CODONS.iter().map(|c| upstream_column(c)).collect()
}

fn one_hot_columns(position: &str) -> Vec<String> {
    AMINO_ACIDS.chars().map(|aa| one_hot_column(position, aa)).collect()
}

fn contiguous_numeric_columns() -> Vec<String> {
    let mut columns = names(&[
        "stratum",
        "position",
        "protLength",
        "relativePosition",
        "localDisorder",
        "peptideHydrophobicity",
        "proteinHydrophobicity",
    ]);
    columns.extend(nucleotide_columns());
    columns.extend(c_term_columns());
    columns.extend(names(&["stopDistances", "fragmentLength", "start_dist", "kozakScore"]));
    columns.extend(upstream_columns());
    columns
}

fn contiguous_annotation_columns() -> Vec<String> {
    names(&[
        "geneID",
        "il_peptide",
        "endCodon",
        "postCodon",
        "C_term_downstream",
        "C_term_downstream_2",
        "N_term_upstream",
        "N_term_upstream_2",
    ])
}

fn spliced_numeric_columns() -> Vec<String> {
    let mut columns = names(&[
        "protLength",
        "nCanonicalPeptides",
        "sr1_can_dist",
        "sr2_can_dist",
        "interveningSeqLengths",
        "isForward",
        "sr1_Index",
        "sr2_Index",
        "sr1_localDisorder",
        "sr2_localDisorder",
    ]);
    for position in SPLICED_ONE_HOT_POSITIONS {
        columns.extend(one_hot_columns(position));
    }
    columns
}

fn spliced_annotation_columns() -> Vec<String> {
    names(&[
        "geneID",
        "sr1",
        "sr2",
        "p2",
        "p1",
        "p_minus_1",
        "p_minus_2",
        "p_minus_2_prime",
        "p_minus_1_prime",
        "p1_prime",
        "p2_prime",
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_features_are_in_schema() {
        let extra = vec!["tr_TPM_bulk".to_string()];
        for kind in [ModelKind::Canonical, ModelKind::Cryptic, ModelKind::Spliced] {
            let schema = kind.schema(&extra);
            let features = kind.train_features(&extra);
            assert!(schema.indices_of(&features).is_ok(), "{}", kind);
        }
    }

    #[test]
    fn test_schema_columns_unique() {
        for kind in [ModelKind::Canonical, ModelKind::Cryptic, ModelKind::Spliced] {
            let schema = kind.schema(&[]);
            let mut names = schema.numeric.clone();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), schema.numeric.len(), "{}", kind);
        }
    }

    #[test]
    fn test_cryptic_metadata_union() {
        assert_eq!(
            ModelKind::Cryptic.metadata_columns(),
            vec!["codingStrand", "mismatches", "deNovoAssembly"]
        );
        assert_eq!(ModelKind::Canonical.metadata_columns(), vec!["ubiCounts", "acetylCounts"]);
    }

    #[test]
    fn test_unknown_feature_is_configuration_error() {
        let schema = ModelKind::Canonical.schema(&[]);
        let err = schema.indices_of(&["tr_TPM_missing".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
