use crate::data::{
    AntigenRecord, AntigenStore, FeatureRow, FeatureSchema, FeatureTable, Identification,
    MappedPeptide, SplicedOccurrence, Stratum,
};
use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    Err(anyhow::anyhow!("Cannot determine format of gzipped file {:?}", path))
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(anyhow::anyhow!("Unsupported file format: {:?}", path)),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Open a delimited table, transparently decompressing `.gz` files
pub fn open_table<P: AsRef<Path>>(path: P) -> Result<csv::Reader<Box<dyn Read>>> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader: Box<dyn Read> = if format.is_gzipped() {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .from_reader(reader))
}

/// Create a plain delimited table for writing
pub fn create_table<P: AsRef<Path>>(path: P) -> Result<csv::Writer<Box<dyn Write>>> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path).unwrap_or(FileFormat::Csv);
    if format.is_gzipped() {
        anyhow::bail!("Writing gzipped tables is not supported: {:?}", path);
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(Box::new(std::io::BufWriter::new(file)) as Box<dyn Write>))
}

/// Read rows of a serde record type
pub fn read_records<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .with_context(|| format!("Failed to parse {:?}", path))
}

/// Write rows of a serde record type
pub fn write_records<T: Serialize, P: AsRef<Path>>(path: P, records: &[T]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = create_table(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

/// Column lookup over one header row
struct Header {
    index: HashMap<String, usize>,
}

impl Header {
    fn new(record: &StringRecord) -> Self {
        let index = record
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self { index }
    }

    fn get<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.index.get(name).and_then(|&i| record.get(i))
    }

    fn require<'r>(&self, record: &'r StringRecord, name: &str) -> PipelineResult<&'r str> {
        self.get(record, name)
            .ok_or_else(|| PipelineError::parse(name, "missing column"))
    }
}

fn parse_optional_f64(column: &str, field: &str) -> PipelineResult<Option<f64>> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("nan") || field.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|e| PipelineError::parse(column, format!("'{}': {}", field, e)))
}

fn parse_usize(column: &str, field: &str) -> PipelineResult<usize> {
    let field = field.trim();
    // Integer columns may have been written as floats by other tools
    let value = field
        .parse::<f64>()
        .map_err(|e| PipelineError::parse(column, format!("'{}': {}", field, e)))?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(PipelineError::parse(column, format!("'{}' is not a count", field)));
    }
    Ok(value as usize)
}

fn parse_flag(column: &str, field: &str) -> PipelineResult<bool> {
    match field.trim() {
        "1" | "1.0" | "true" | "True" => Ok(true),
        "0" | "0.0" | "false" | "False" | "" => Ok(false),
        other => Err(PipelineError::parse(column, format!("'{}' is not a flag", other))),
    }
}

/// Space-separated list field
pub fn split_list(field: &str) -> Vec<String> {
    field.split_whitespace().map(str::to_string).collect()
}

fn join_list<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn proteins_column(stratum: Stratum) -> String {
    format!("{}_Proteins", stratum)
}

const SPLICED_LIST_COLUMNS: [&str; 6] = [
    "splicedProteins",
    "sr1",
    "interveningSeqLengths",
    "sr1_Index",
    "sr2_Index",
    "isForward",
];

/// Loader for the pipeline's tabular inputs
pub struct DataLoader {
    /// Maximum number of records to load (0 = unlimited)
    max_records: usize,
}

impl DataLoader {
    /// Create new data loader
    pub fn new() -> Self {
        Self { max_records: 0 }
    }

    /// Stop after `max_records` rows
    pub fn with_max_records(max_records: usize) -> Self {
        Self { max_records }
    }

    fn limit_reached(&self, count: usize) -> bool {
        if self.max_records > 0 && count >= self.max_records {
            warn!("Reached maximum record limit: {}", self.max_records);
            return true;
        }
        false
    }

    /// Load the antigen table of one stratum
    pub fn load_antigens<P: AsRef<Path>>(&self, path: P, stratum: Stratum) -> Result<AntigenStore> {
        let path = path.as_ref();
        info!("Loading {} antigens from {:?}", stratum, path);
        let mut reader = open_table(path)?;
        let header_record = reader.headers()?.clone();
        let header = Header::new(&header_record);
        debug!("Headers: {:?}", header_record);

        let mut records = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result.context("Failed to parse CSV record")?;
            match parse_antigen(&header, &header_record, &record) {
                Ok(antigen) => records.push(antigen),
                Err(e) if e.is_row_level() => {
                    warn!("Skipping antigen at line {}: {}", line + 2, e)
                }
                Err(e) => return Err(e.into()),
            }
            if self.limit_reached(records.len()) {
                break;
            }
        }

        info!("Loaded {} {} antigens", records.len(), stratum);
        Ok(AntigenStore::new(stratum, records))
    }

    /// Load identifications or remapped peptides
    pub fn load_identifications<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Identification>> {
        let path = path.as_ref();
        info!("Loading peptides from {:?}", path);
        let mut reader = open_table(path)?;
        let header = Header::new(reader.headers()?);

        let mut identifications = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result.context("Failed to parse CSV record")?;
            match parse_identification(&header, &record) {
                Ok(identification) => identifications.push(identification),
                Err(e) if e.is_row_level() => {
                    warn!("Skipping peptide at line {}: {}", line + 2, e)
                }
                Err(e) => return Err(e.into()),
            }
            if self.limit_reached(identifications.len()) {
                break;
            }
        }

        info!("Loaded {} peptides", identifications.len());
        Ok(identifications)
    }

    /// Load a feature table; `numeric` columns are parsed as numbers and all
    /// other columns are kept as annotations
    pub fn load_feature_table<P: AsRef<Path>>(
        &self,
        path: P,
        numeric: &[String],
    ) -> Result<FeatureTable> {
        let path = path.as_ref();
        let mut reader = open_table(path)?;
        let header_record = reader.headers()?.clone();
        let header = Header::new(&header_record);

        let numeric_idx = numeric
            .iter()
            .map(|name| {
                header.index.get(name).copied().ok_or_else(|| {
                    PipelineError::configuration(format!("{:?} has no column '{}'", path, name))
                })
            })
            .collect::<PipelineResult<Vec<usize>>>()?;
        let annotations: Vec<String> = header_record
            .iter()
            .filter(|name| {
                !["peptide", "proteinID", "label"].contains(name)
                    && !numeric.iter().any(|n| n == name)
            })
            .map(str::to_string)
            .collect();
        let annotation_idx: Vec<usize> = annotations.iter().map(|a| header.index[a]).collect();

        let mut table = FeatureTable::new(FeatureSchema::new(numeric.to_vec(), annotations));
        for result in reader.records() {
            let record = result.context("Failed to parse CSV record")?;
            let label = match header.require(&record, "label")?.trim() {
                "1" | "1.0" => 1,
                "0" | "0.0" => 0,
                other => {
                    return Err(PipelineError::parse("label", format!("'{}'", other)).into())
                }
            };
            let values = numeric_idx
                .iter()
                .zip(numeric)
                .map(|(&i, name)| parse_optional_f64(name, record.get(i).unwrap_or("")))
                .collect::<PipelineResult<Vec<_>>>()?;
            table.push(FeatureRow {
                peptide: header.require(&record, "peptide")?.to_string(),
                protein_id: header.require(&record, "proteinID")?.to_string(),
                label,
                values,
                annotations: annotation_idx
                    .iter()
                    .map(|&i| record.get(i).unwrap_or("").to_string())
                    .collect(),
            })?;
            if self.limit_reached(table.len()) {
                break;
            }
        }
        debug!("Loaded {} rows from {:?}", table.len(), path);
        Ok(table)
    }
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_antigen(
    header: &Header,
    header_record: &StringRecord,
    record: &StringRecord,
) -> PipelineResult<AntigenRecord> {
    let protein_id = header.require(record, "proteinID")?.to_string();
    let protein_seq = header.require(record, "protSeq")?.trim().to_string();
    let rna_seq = header
        .get(record, "rnaSeq")
        .unwrap_or("")
        .trim()
        .to_ascii_uppercase()
        .replace('T', "U");
    let disorder = header
        .require(record, "iupred3_preds")?
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|e| PipelineError::parse("iupred3_preds", e.to_string()))
        })
        .collect::<PipelineResult<Vec<f64>>>()?;
    let hydrophobicity = match header.get(record, "proteinHydrophobicity") {
        Some(field) => parse_optional_f64("proteinHydrophobicity", field)?,
        None => None,
    };
    let gene_id = header
        .get(record, "geneID")
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string);

    let fixed = [
        "proteinID",
        "protSeq",
        "rnaSeq",
        "iupred3_preds",
        "proteinHydrophobicity",
        "geneID",
    ];
    let mut metadata = BTreeMap::new();
    for (name, field) in header_record.iter().zip(record.iter()) {
        if fixed.contains(&name) {
            continue;
        }
        // Non-numeric extras are descriptive and not used as features
        if let Ok(Some(value)) = parse_optional_f64(name, field) {
            metadata.insert(name.to_string(), value);
        }
    }

    let antigen = AntigenRecord {
        protein_id,
        gene_id,
        protein_seq,
        rna_seq,
        disorder,
        hydrophobicity,
        metadata,
    };
    antigen.validate()?;
    Ok(antigen)
}

fn parse_identification(header: &Header, record: &StringRecord) -> PipelineResult<Identification> {
    let mut mapping = MappedPeptide::new(header.require(record, "peptide")?.trim());
    for stratum in Stratum::CONTIGUOUS {
        if let Some(field) = header.get(record, &proteins_column(stratum)) {
            let proteins = split_list(field);
            if !proteins.is_empty() {
                mapping.proteins.insert(stratum, proteins);
            }
        }
    }
    let count = |column: &str| -> PipelineResult<usize> {
        match header.get(record, column) {
            Some(field) if !field.trim().is_empty() => parse_usize(column, field),
            _ => Ok(0),
        }
    };
    mapping.fusion_proteins = count("fusion_nProteins")?;
    mapping.mutation_proteins = count("mutation_nProteins")?;
    mapping.trembl_proteins = count("TrEMBL_nProteins")?;
    mapping.spliced = parse_spliced_occurrences(header, record)?;

    Ok(Identification {
        mapping,
        stratum_label: header.get(record, "stratum").unwrap_or("").trim().to_string(),
        cell_lines: split_list(header.get(record, "cellLines").unwrap_or("")),
        datasets: split_list(header.get(record, "datasets").unwrap_or("")),
        discoverable: match header.get(record, "piscesDiscoverable") {
            Some(field) => parse_flag("piscesDiscoverable", field)?,
            None => true,
        },
    })
}

fn parse_spliced_occurrences(
    header: &Header,
    record: &StringRecord,
) -> PipelineResult<Vec<SplicedOccurrence>> {
    let lists: Vec<Vec<String>> = SPLICED_LIST_COLUMNS
        .iter()
        .map(|column| split_list(header.get(record, column).unwrap_or("")))
        .collect();
    let n = lists[0].len();
    if lists.iter().any(|list| list.len() != n) {
        return Err(PipelineError::input_shape(format!(
            "spliced columns have lengths {:?}",
            lists.iter().map(Vec::len).collect::<Vec<_>>()
        )));
    }
    (0..n)
        .map(|i| {
            Ok(SplicedOccurrence {
                protein_id: lists[0][i].clone(),
                sr1: lists[1][i].clone(),
                intervening: parse_usize("interveningSeqLengths", &lists[2][i])?,
                sr1_index: parse_usize("sr1_Index", &lists[3][i])?,
                sr2_index: parse_usize("sr2_Index", &lists[4][i])?,
                is_forward: parse_flag("isForward", &lists[5][i])?,
            })
        })
        .collect()
}

/// Write identifications or remapped peptides
pub fn write_identifications<P: AsRef<Path>>(path: P, identifications: &[Identification]) -> Result<()> {
    let mut writer = create_table(path.as_ref())?;
    let mut header: Vec<String> = ["peptide", "stratum", "cellLines", "datasets", "piscesDiscoverable"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(Stratum::CONTIGUOUS.iter().map(|s| proteins_column(*s)));
    header.extend(
        ["fusion_nProteins", "mutation_nProteins", "TrEMBL_nProteins"]
            .iter()
            .map(|s| s.to_string()),
    );
    header.extend(SPLICED_LIST_COLUMNS.iter().map(|s| s.to_string()));
    writer.write_record(&header)?;

    for identification in identifications {
        let mapping = &identification.mapping;
        let mut row = vec![
            mapping.peptide.clone(),
            identification.stratum_label.clone(),
            identification.cell_lines.join(" "),
            identification.datasets.join(" "),
            (identification.discoverable as u8).to_string(),
        ];
        row.extend(
            Stratum::CONTIGUOUS
                .iter()
                .map(|s| mapping.proteins_in(*s).join(" ")),
        );
        row.push(mapping.fusion_proteins.to_string());
        row.push(mapping.mutation_proteins.to_string());
        row.push(mapping.trembl_proteins.to_string());
        let spliced = &mapping.spliced;
        row.push(join_list(&spliced.iter().map(|o| o.protein_id.clone()).collect::<Vec<_>>()));
        row.push(join_list(&spliced.iter().map(|o| o.sr1.clone()).collect::<Vec<_>>()));
        row.push(join_list(&spliced.iter().map(|o| o.intervening).collect::<Vec<_>>()));
        row.push(join_list(&spliced.iter().map(|o| o.sr1_index).collect::<Vec<_>>()));
        row.push(join_list(&spliced.iter().map(|o| o.sr2_index).collect::<Vec<_>>()));
        row.push(join_list(&spliced.iter().map(|o| o.is_forward as u8).collect::<Vec<_>>()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-row output columns appended after the schema columns
pub type ExtraColumns<'a> = &'a [(String, Vec<Option<f64>>)];

/// Write feature rows: identity, annotations, numeric schema columns, then
/// any `extra` columns (fold ids, predictions, attributions)
pub fn write_feature_rows<P: AsRef<Path>>(
    path: P,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
    extra: ExtraColumns<'_>,
) -> Result<()> {
    let path = path.as_ref();
    for (name, values) in extra {
        if values.len() != rows.len() {
            return Err(PipelineError::input_shape(format!(
                "column {} has {} values for {} rows",
                name,
                values.len(),
                rows.len()
            ))
            .into());
        }
    }
    let mut writer = create_table(path)?;
    let mut header = vec!["peptide".to_string(), "proteinID".to_string(), "label".to_string()];
    header.extend(schema.annotations.iter().cloned());
    header.extend(schema.numeric.iter().cloned());
    header.extend(extra.iter().map(|(name, _)| name.clone()));
    writer.write_record(&header)?;

    for (i, row) in rows.iter().enumerate() {
        let mut record = vec![row.peptide.clone(), row.protein_id.clone(), row.label.to_string()];
        record.extend(row.annotations.iter().cloned());
        record.extend(row.values.iter().map(|v| format_value(*v)));
        record.extend(extra.iter().map(|(_, values)| format_value(values[i])));
        writer.write_record(&record)?;
    }
    writer.flush().with_context(|| format!("Failed to write {:?}", path))?;
    debug!("Wrote {} rows to {:?}", rows.len(), path);
    Ok(())
}

/// Write a feature table with no extra columns
pub fn write_feature_table<P: AsRef<Path>>(path: P, table: &FeatureTable) -> Result<()> {
    write_feature_rows(path, &table.schema, table.rows(), &[])
}
