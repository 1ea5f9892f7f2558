//! Feature rows for canonical and cryptic (contiguous) peptides.

use super::context::{Occurrence, SequenceContextResolver};
use super::{gravy, nucleotide_fractions, RowBuilder};
use crate::data::schema::{
    c_term_group_column, downstream_group_column, nucleotide_columns, upstream_column,
};
use crate::data::{
    AntigenRecord, FeatureRow, FeatureSchema, Flank, ModelKind, ResidueGroup, Stratum,
    START_CODONS,
};
use crate::error::{PipelineError, PipelineResult};

/// Emits one schema-complete row per occurrence of a peptide in a parent.
pub struct FeatureExtractor {
    stratum: Stratum,
    schema: FeatureSchema,
    /// Expression and proteomics columns copied from the antigen record
    extra_numeric: Vec<String>,
}

impl FeatureExtractor {
    pub fn new(stratum: Stratum, extra_numeric: &[String]) -> PipelineResult<Self> {
        let kind = match stratum {
            Stratum::Canonical => ModelKind::Canonical,
            Stratum::Spliced => {
                return Err(PipelineError::configuration(
                    "spliced peptides need the spliced extractor",
                ))
            }
            _ => ModelKind::Cryptic,
        };
        Ok(Self {
            stratum,
            schema: kind.schema(extra_numeric),
            extra_numeric: extra_numeric.to_vec(),
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn stratum(&self) -> Stratum {
        self.stratum
    }

    /// Rows for every occurrence of `peptide` in `parent`; empty when the
    /// peptide does not occur.
    pub fn extract(
        &self,
        peptide: &str,
        parent: &AntigenRecord,
        label: u8,
    ) -> PipelineResult<Vec<FeatureRow>> {
        let last = peptide
            .bytes()
            .last()
            .ok_or_else(|| PipelineError::input_shape("empty peptide"))?;
        let resolver = SequenceContextResolver::new(parent)?;
        let occurrences = resolver.resolve(peptide)?;

        let peptide_hydrophobicity = gravy(peptide);
        let fractions = nucleotide_fractions(&parent.rna_seq);
        let c_term_group = ResidueGroup::of(last);

        Ok(occurrences
            .iter()
            .map(|occurrence| {
                let mut row = RowBuilder::new(&self.schema);
                row.set("stratum", Some(self.stratum.index() as f64));
                row.set("protLength", Some(parent.protein_seq.len() as f64));
                row.set("peptideHydrophobicity", peptide_hydrophobicity);
                row.set("proteinHydrophobicity", parent.hydrophobicity);
                for (column, fraction) in nucleotide_columns().iter().zip(fractions) {
                    row.set(column, fraction);
                }
                for group in ResidueGroup::ALL {
                    row.set_flag(&c_term_group_column(group), c_term_group == Some(group));
                }
                self.fill_occurrence(&mut row, occurrence);
                self.fill_metadata(&mut row, parent);

                row.annotate("geneID", parent.gene_id.clone().unwrap_or_default());
                row.finish(peptide, &parent.protein_id, label)
            })
            .collect())
    }

    fn fill_occurrence(&self, row: &mut RowBuilder<'_>, occurrence: &Occurrence) {
        row.set("position", Some(occurrence.position as f64));
        row.set("relativePosition", Some(occurrence.relative_position));
        row.set("localDisorder", occurrence.local_disorder);
        row.set("stopDistances", Some(occurrence.stop_distance as f64));

        let scan = &occurrence.start_scan;
        row.set("start_dist", scan.start_distance.map(|d| d as f64));
        row.set("kozakScore", scan.kozak_score);
        for (codon, found) in START_CODONS.iter().zip(scan.upstream) {
            row.set_flag(&upstream_column(codon), found);
        }

        let fragment = &occurrence.fragment;
        row.set("fragmentLength", Some(fragment.length as f64));
        let downstream = fragment.downstream[0];
        let downstream_group = downstream.residue().and_then(ResidueGroup::of);
        for group in ResidueGroup::ALL {
            row.set_flag(&downstream_group_column(group), downstream_group == Some(group));
        }
        row.set_flag("C_term_neg_1_end", downstream.is_out_of_bounds());

        row.annotate("il_peptide", occurrence.il_peptide.as_str());
        row.annotate("endCodon", occurrence.end_codon.clone().unwrap_or_default());
        row.annotate("postCodon", occurrence.post_codon.clone().unwrap_or_default());
        row.annotate("C_term_downstream", flank_text(fragment.downstream[0]));
        row.annotate("C_term_downstream_2", flank_text(fragment.downstream[1]));
        row.annotate("N_term_upstream", flank_text(fragment.upstream[0]));
        row.annotate("N_term_upstream_2", flank_text(fragment.upstream[1]));
    }

    fn fill_metadata(&self, row: &mut RowBuilder<'_>, parent: &AntigenRecord) {
        for column in self.stratum.metadata_columns() {
            row.set(column, parent.metadata_value(column));
        }
        for column in &self.extra_numeric {
            row.set(column, parent.metadata_value(column));
        }
    }
}

fn flank_text(flank: Flank) -> String {
    flank.as_char().to_string()
}
