// ==============================================================================
// parsers/vcf.rs - VCF callset reader
// ==============================================================================
// Description: Reads multi-sample VCF callsets into a Callset using noodles-vcf
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-19
// Version: 2.1.0
// ==============================================================================
// References:
// - VCF 4.2 Spec: https://samtools.github.io/hts-specs/VCFv4.2.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
// ==============================================================================

use noodles_vcf as vcf;
use noodles_vcf::variant::record::{AlternateBases, Ids};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::callset::{Callset, CallsetRow};
use crate::genotype_converter::{genotype_from_sample, GenotypeConversionError, Genotype};
use crate::models::VariantKey;

/// VCF parsing errors
#[derive(Error, Debug)]
pub enum VCFParseError {
    #[error("Failed to open VCF file: {0}")]
    FileOpenError(String),

    #[error("Failed to read VCF header: {0}")]
    HeaderError(String),

    #[error("Failed to parse VCF record: {0}")]
    RecordError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid genotype at {variant}: {source}")]
    GenotypeError {
        variant: String,
        source: GenotypeConversionError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Callset reader with error tolerance settings
pub struct CallsetReader {
    /// Maximum number of unreadable records before failing
    pub max_errors: usize,

    /// Count of error records (for reporting)
    pub error_count: usize,
}

impl Default for CallsetReader {
    fn default() -> Self {
        Self {
            max_errors: 0, // Callsets must be clean by default
            error_count: 0,
        }
    }
}

impl CallsetReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tolerate up to `max` unreadable records
    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }

    /// Read a VCF callset (.vcf or .vcf.gz)
    ///
    /// # Example
    /// ```no_run
    /// use annotation_loader::parsers::CallsetReader;
    ///
    /// let mut reader = CallsetReader::new();
    /// let callset = reader.read("callsets/batch1.vcf.gz")?;
    /// println!("{} samples, {} variants", callset.sample_ids.len(), callset.rows.len());
    /// # Ok::<(), annotation_loader::parsers::VCFParseError>(())
    /// ```
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<Callset, VCFParseError> {
        let path = path.as_ref();

        let mut reader = vcf::io::reader::Builder::default()
            .build_from_path(path)
            .map_err(|e| VCFParseError::FileOpenError(format!("{}: {}", path.display(), e)))?;

        let header = reader
            .read_header()
            .map_err(|e| VCFParseError::HeaderError(format!("{}", e)))?;

        let sample_ids: Vec<String> = header.sample_names().iter().cloned().collect();
        let mut rows = Vec::new();
        self.error_count = 0;

        for (line_num, result) in reader.records().enumerate() {
            let parsed = result
                .map_err(|e| VCFParseError::RecordError(format!("Failed to read record: {}", e)))
                .and_then(|record| parse_record(&record, sample_ids.len()));

            match parsed {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!("Line {}: {}", line_num + 1, e);
                    self.error_count += 1;

                    if self.error_count > self.max_errors {
                        return Err(VCFParseError::RecordError(format!(
                            "Too many errors ({} > {}), last: {}",
                            self.error_count, self.max_errors, e
                        )));
                    }
                }
            }
        }

        info!(
            "Read {} variants for {} samples from {}",
            rows.len(),
            sample_ids.len(),
            path.display()
        );

        Ok(Callset::new(&path.display().to_string(), sample_ids, rows))
    }
}

/// Convert one noodles record into a callset row
fn parse_record(record: &vcf::Record, sample_count: usize) -> Result<CallsetRow, VCFParseError> {
    let contig = record.reference_sequence_name().to_string();

    let position = match record.variant_start() {
        Some(Ok(pos)) => usize::from(pos.get()) as u64,
        Some(Err(e)) => {
            return Err(VCFParseError::RecordError(format!(
                "Failed to get position: {}",
                e
            )))
        }
        None => return Err(VCFParseError::MissingField("Position".to_string())),
    };

    let ref_allele = record.reference_bases().to_string();

    let alt_bases = record.alternate_bases();
    if alt_bases.is_empty() {
        return Err(VCFParseError::MissingField("ALT allele".to_string()));
    }
    let mut alt_alleles = Vec::new();
    for alt in alt_bases.iter() {
        let alt = alt
            .map_err(|e| VCFParseError::RecordError(format!("Failed to get ALT allele: {}", e)))?;
        alt_alleles.push(alt.to_string());
    }

    let ids = record.ids();
    let rsid = if ids.is_empty() {
        None
    } else {
        ids.iter().next().map(|id| id.to_string())
    };

    // INFO, FILTER and sample columns as raw text
    let info = record.info();
    let info: &str = info.as_ref();
    let filters = parse_filters(record.filters().as_ref());

    let mut key = VariantKey {
        contig,
        position,
        ref_allele,
        alt_alleles,
        end: None,
    };
    if let Some(end) = info_value(info, "END").and_then(|v| v.parse::<u64>().ok()) {
        key = key.with_end(end);
    }

    let samples = record.samples();
    let genotypes = parse_sample_columns(samples.as_ref(), sample_count).map_err(|source| {
        VCFParseError::GenotypeError {
            variant: key.variant_id(),
            source,
        }
    })?;

    Ok(CallsetRow {
        info_af: info_value(info, "AF")
            .and_then(|af| af.split(',').next())
            .and_then(|af| af.parse::<f64>().ok()),
        key,
        rsid,
        filters,
        genotypes,
    })
}

/// FILTER column to a list of failed filters; "." and "PASS" mean none
pub fn parse_filters(raw: &str) -> Vec<String> {
    if raw.is_empty() || raw == "." || raw == "PASS" {
        return Vec::new();
    }
    raw.split(';').map(|f| f.to_string()).collect()
}

/// Value of an INFO key ("AF=0.25;DP=10" → "0.25"); flags have no value
pub fn info_value<'a>(info: &'a str, key: &str) -> Option<&'a str> {
    info.split(';').find_map(|field| {
        let (k, v) = field.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Tab separated FORMAT and sample columns to genotypes
///
/// A sites-only record yields `sample_count` no-calls.
pub fn parse_sample_columns(
    samples: &str,
    sample_count: usize,
) -> Result<Vec<Genotype>, GenotypeConversionError> {
    if samples.is_empty() {
        return Ok(vec![Genotype::no_call(); sample_count]);
    }

    let fields: Vec<&str> = samples.split('\t').collect();
    let format_keys: Vec<&str> = fields[0].split(':').collect();
    let columns = &fields[1..];
    if columns.len() != sample_count {
        return Err(GenotypeConversionError::InvalidFormat(format!(
            "expected {} sample columns, found {}",
            sample_count,
            columns.len()
        )));
    }

    columns
        .iter()
        .map(|column| genotype_from_sample(&format_keys, column))
        .collect()
}
