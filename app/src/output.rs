// ==============================================================================
// output.rs - Annotation Table Export
// ==============================================================================
// Description: Writes an annotation table as Parquet (one row per variant)
//              or as a JSON document including its globals and update log
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-16
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

// Apache Arrow/Parquet for columnar data
use arrow::array::{ArrayRef, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::metadata::MetadataSnapshot;
use crate::models::{DatasetType, ReferenceGenome, VariantKey};
use crate::table::{AnnotationTable, Row};
use crate::update_log::UpdateLog;

const KEY_COLUMNS: [&str; 5] = ["contig", "position", "ref", "alt", "end"];

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Apache Parquet; annotation fields as JSON text columns
    Parquet,
    /// JSON document with globals and update log
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Parquet => "parquet",
            OutputFormat::Json => "json",
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportedRow<'a> {
    key: &'a VariantKey,
    #[serde(flatten)]
    fields: &'a Row,
}

#[derive(Debug, Serialize)]
struct ExportedTable<'a> {
    reference_genome: ReferenceGenome,
    dataset_type: DatasetType,
    globals: &'a MetadataSnapshot,
    updates: &'a UpdateLog,
    rows: Vec<ExportedRow<'a>>,
}

/// Write `table` to `<output_dir>/<stem>.<ext>` and return the path
pub fn export_table(
    table: &AnnotationTable,
    output_dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).context("Failed to create output directory")?;
    let path = output_dir.join(format!("{}.{}", stem, format.extension()));
    match format {
        OutputFormat::Parquet => generate_parquet(table, &path)?,
        OutputFormat::Json => generate_json(table, &path)?,
    }
    Ok(path)
}

fn generate_json(table: &AnnotationTable, path: &Path) -> Result<()> {
    info!("Generating JSON output: {:?}", path);

    let exported = ExportedTable {
        reference_genome: table.reference_genome,
        dataset_type: table.dataset_type,
        globals: &table.globals,
        updates: &table.updates,
        rows: table
            .rows()
            .iter()
            .map(|(key, fields)| ExportedRow { key, fields })
            .collect(),
    };

    let file = std::fs::File::create(path).context("Failed to create JSON output file")?;
    serde_json::to_writer_pretty(file, &exported).context("Failed to write JSON output")?;

    info!("JSON output complete: {} variants", table.len());
    Ok(())
}

/// Field value as Parquet text: JSON for everything but plain strings
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn generate_parquet(table: &AnnotationTable, path: &Path) -> Result<()> {
    info!("Generating Parquet output: {:?}", path);

    let field_names: Vec<&String> = table.schema().keys().collect();
    if let Some(clash) = field_names.iter().find(|f| KEY_COLUMNS.contains(&f.as_str())) {
        anyhow::bail!("Field '{}' collides with a key column", clash);
    }

    let mut columns = vec![
        Field::new("contig", DataType::Utf8, false),
        Field::new("position", DataType::UInt64, false),
        Field::new("ref", DataType::Utf8, false),
        Field::new("alt", DataType::Utf8, false),
        Field::new("end", DataType::UInt64, true),
    ];
    columns.extend(
        field_names
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Utf8, true)),
    );
    let schema = Arc::new(Schema::new(columns));

    let rows = table.rows();
    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            rows.keys().map(|k| k.contig.as_str()).collect::<Vec<_>>(),
        )),
        Arc::new(UInt64Array::from(
            rows.keys().map(|k| k.position).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.keys().map(|k| k.ref_allele.as_str()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.keys().map(|k| k.alt_alleles.join(",")).collect::<Vec<_>>(),
        )),
        Arc::new(UInt64Array::from(
            rows.keys().map(|k| k.end).collect::<Vec<_>>(),
        )),
    ];
    for name in &field_names {
        arrays.push(Arc::new(StringArray::from(
            rows.values()
                .map(|row| row.get(name.as_str()).and_then(field_text))
                .collect::<Vec<_>>(),
        )));
    }

    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .context("Failed to create Arrow RecordBatch")?;

    // Write to Parquet file with compression
    let file = std::fs::File::create(path).context("Failed to create Parquet file")?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .context("Failed to create Parquet writer")?;
    writer.write(&batch).context("Failed to write Parquet data")?;
    writer.close().context("Failed to close Parquet writer")?;

    info!("Parquet output complete: {} variants", table.len());
    Ok(())
}
