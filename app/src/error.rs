// ==============================================================================
// error.rs - Pipeline Error Taxonomy
// ==============================================================================
// Description: Configuration, data integrity and soft "incomplete" errors
// Author: Matt Barham
// Created: 2026-09-14
// Modified: 2026-10-02
// Version: 1.1.0
// ==============================================================================

use thiserror::Error;

/// Broad error category used by the orchestration layer to decide between
/// aborting a run and leaving a stage incomplete for a later retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad thresholds, unused enum declarations, unmapped strict-mode ids
    Configuration,
    /// Multiallelic rows, invalid contigs, malformed input rows
    DataIntegrity,
    /// Upstream dependency not materialized yet (safe to retry)
    Incomplete,
    /// Failure inside a storage or file collaborator
    Collaborator,
}

/// Errors raised by the annotation loading pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid sex check thresholds: {0}")]
    InvalidThresholds(String),

    #[error("Unused enum '{field}' declared for dataset '{dataset}'")]
    UnusedEnum { dataset: String, field: String },

    #[error("Sample '{0}' has no entry in the remap file")]
    UnmappedSample(String),

    #[error("Samples missing from callset: {0:?}")]
    MissingSamples(Vec<String>),

    #[error("Unknown reference dataset: {0}")]
    UnknownDataset(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Encountered {count} multiallelic variants (first: {first})")]
    Multiallelic { count: usize, first: String },

    #[error("Contig: {contig} is invalid for reference genome {reference_genome}")]
    InvalidContig {
        contig: String,
        reference_genome: String,
    },

    #[error("Malformed row in {source_name} at line {line}: {details}")]
    MalformedRow {
        source_name: String,
        line: usize,
        details: String,
    },

    #[error("Dataset '{dataset}' is missing key field '{field}'")]
    MissingKeyField { dataset: String, field: String },

    #[error("Unexpected value '{value}' for enum '{field}' in dataset '{dataset}'")]
    UnexpectedEnumValue {
        dataset: String,
        field: String,
        value: String,
    },

    #[error("Stage '{stage}' incomplete: {reason}")]
    Incomplete { stage: String, reason: String },

    #[error("Callset error: {0}")]
    Vcf(#[from] crate::parsers::VCFParseError),

    #[error("Sample file error: {0}")]
    SampleFile(#[from] crate::parsers::SampleFileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidThresholds(_)
            | PipelineError::UnusedEnum { .. }
            | PipelineError::UnmappedSample(_)
            | PipelineError::UnknownDataset(_)
            | PipelineError::InvalidConfig(_) => ErrorKind::Configuration,

            PipelineError::Multiallelic { .. }
            | PipelineError::InvalidContig { .. }
            | PipelineError::MalformedRow { .. }
            | PipelineError::UnexpectedEnumValue { .. }
            | PipelineError::MissingKeyField { .. }
            | PipelineError::MissingSamples(_) => ErrorKind::DataIntegrity,

            PipelineError::Incomplete { .. } => ErrorKind::Incomplete,

            PipelineError::Vcf(_)
            | PipelineError::SampleFile(_)
            | PipelineError::Io(_)
            | PipelineError::Sqlite(_)
            | PipelineError::Csv(_)
            | PipelineError::Json(_) => ErrorKind::Collaborator,
        }
    }

    /// Only "incomplete" conditions may be retried without operator action
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Incomplete
    }

    pub fn incomplete(stage: &str, reason: impl Into<String>) -> Self {
        PipelineError::Incomplete {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
