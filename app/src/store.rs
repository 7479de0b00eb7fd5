// ==============================================================================
// store.rs - Annotation Table Store
// ==============================================================================
// Description: Persists an annotation table and its sample lookup table in a
//              single SQLite file, replaced atomically on every write
// Author: Matt Barham
// Created: 2026-09-26
// Modified: 2026-10-15
// Version: 1.1.0
// ==============================================================================
// Layout:
//   table_info(key, value)            reference_genome, dataset_type,
//                                     schema, globals, updates (JSON)
//   variants(variant_id, contig, position, row)
//   sample_lookup(variant_id, project_guid, calls)
//   pipeline_audit                    see audit.rs; carried across writes
// ==============================================================================

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::AUDIT_TABLE_SCHEMA;
use crate::error::{PipelineError, Result};
use crate::lookup::{ProjectCalls, SampleLookupTable};
use crate::models::VariantKey;
use crate::table::{AnnotationTable, Row};

const STORE_SCHEMA: &str = "
    CREATE TABLE table_info (key TEXT PRIMARY KEY, value TEXT NOT NULL);
    CREATE TABLE variants (
        variant_id TEXT PRIMARY KEY,
        contig TEXT NOT NULL,
        position INTEGER NOT NULL,
        row TEXT NOT NULL
    );
    CREATE TABLE sample_lookup (
        variant_id TEXT NOT NULL,
        project_guid TEXT NOT NULL,
        calls TEXT NOT NULL,
        PRIMARY KEY (variant_id, project_guid)
    );
";

fn json_column<T: DeserializeOwned>(raw: &str, column: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_key(variant_id: &str) -> Result<VariantKey> {
    VariantKey::parse(variant_id).ok_or_else(|| PipelineError::MalformedRow {
        source_name: "annotation table store".to_string(),
        line: 0,
        details: format!("'{}' is not a variant id", variant_id),
    })
}

/// One table's store file
#[derive(Debug, Clone)]
pub struct TableStore {
    path: PathBuf,
}

impl TableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a table has been written (an audit-only file does not count)
    pub fn exists(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let conn = Connection::open(&self.path)?;
        has_table(&conn, "main", "table_info")
    }

    pub fn read(&self) -> Result<Option<(AnnotationTable, SampleLookupTable)>> {
        if !self.exists()? {
            return Ok(None);
        }
        let conn = Connection::open(&self.path)?;

        let info = |key: &str| -> Result<String> {
            conn.query_row(
                "SELECT value FROM table_info WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| PipelineError::MalformedRow {
                source_name: self.path.display().to_string(),
                line: 0,
                details: format!("table_info has no '{}' entry", key),
            })
        };
        let reference_genome = serde_json::from_str(&info("reference_genome")?)?;
        let dataset_type = serde_json::from_str(&info("dataset_type")?)?;
        let schema = serde_json::from_str(&info("schema")?)?;
        let globals = serde_json::from_str(&info("globals")?)?;
        let updates = serde_json::from_str(&info("updates")?)?;

        let mut rows = BTreeMap::new();
        {
            let mut stmt = conn.prepare("SELECT variant_id, row FROM variants")?;
            let iter = stmt.query_map([], |row| {
                let variant_id: String = row.get(0)?;
                let raw: String = row.get(1)?;
                Ok((variant_id, json_column::<Row>(&raw, 1)?))
            })?;
            for entry in iter {
                let (variant_id, row) = entry?;
                rows.insert(parse_key(&variant_id)?, row);
            }
        }

        let mut lookup_rows: BTreeMap<VariantKey, BTreeMap<String, ProjectCalls>> = BTreeMap::new();
        {
            let mut stmt = conn.prepare("SELECT variant_id, project_guid, calls FROM sample_lookup")?;
            let iter = stmt.query_map([], |row| {
                let variant_id: String = row.get(0)?;
                let project_guid: String = row.get(1)?;
                let raw: String = row.get(2)?;
                Ok((variant_id, project_guid, json_column::<ProjectCalls>(&raw, 2)?))
            })?;
            for entry in iter {
                let (variant_id, project_guid, calls) = entry?;
                lookup_rows
                    .entry(parse_key(&variant_id)?)
                    .or_default()
                    .insert(project_guid, calls);
            }
        }

        let table = AnnotationTable::from_parts(
            reference_genome,
            dataset_type,
            schema,
            rows,
            globals,
            updates,
        )?;
        debug!("Read {} rows from {}", table.len(), self.path.display());
        Ok(Some((table, SampleLookupTable::from_rows(lookup_rows))))
    }

    /// Replace the stored table
    ///
    /// Writes a sibling file and renames it over the target, so readers see
    /// either the previous table or the new one.
    pub fn write(&self, table: &AnnotationTable, lookup: &SampleLookupTable) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "annotations.sqlite".to_string());
        let temp = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        if let Err(e) = self.write_file(&temp, table, lookup) {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
        std::fs::rename(&temp, &self.path)?;

        info!(
            "Wrote {} rows and {} update tokens to {}",
            table.len(),
            table.updates.len(),
            self.path.display()
        );
        Ok(())
    }

    fn write_file(
        &self,
        temp: &Path,
        table: &AnnotationTable,
        lookup: &SampleLookupTable,
    ) -> Result<()> {
        let mut conn = Connection::open(temp)?;
        conn.execute_batch(STORE_SCHEMA)?;
        conn.execute_batch(AUDIT_TABLE_SCHEMA)?;

        if self.path.exists() {
            conn.execute(
                "ATTACH DATABASE ?1 AS previous",
                params![self.path.to_string_lossy()],
            )?;
            if has_table(&conn, "previous", "pipeline_audit")? {
                conn.execute_batch(
                    "INSERT INTO main.pipeline_audit SELECT * FROM previous.pipeline_audit",
                )?;
            }
            conn.execute_batch("DETACH DATABASE previous")?;
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO table_info (key, value) VALUES (?1, ?2)")?;
            stmt.execute(params!["reference_genome", serde_json::to_string(&table.reference_genome)?])?;
            stmt.execute(params!["dataset_type", serde_json::to_string(&table.dataset_type)?])?;
            stmt.execute(params!["schema", serde_json::to_string(table.schema())?])?;
            stmt.execute(params!["globals", serde_json::to_string(&table.globals)?])?;
            stmt.execute(params!["updates", serde_json::to_string(&table.updates)?])?;

            let mut stmt = tx.prepare(
                "INSERT INTO variants (variant_id, contig, position, row) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (key, row) in table.rows() {
                stmt.execute(params![
                    key.variant_id(),
                    key.contig,
                    key.position as i64,
                    serde_json::to_string(row)?
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO sample_lookup (variant_id, project_guid, calls) VALUES (?1, ?2, ?3)",
            )?;
            for (key, projects) in lookup.rows() {
                for (project_guid, calls) in projects {
                    stmt.execute(params![
                        key.variant_id(),
                        project_guid,
                        serde_json::to_string(calls)?
                    ])?;
                }
            }
        }
        tx.commit()?;

        conn.execute_batch("CREATE INDEX idx_variants_position ON variants(contig, position)")?;
        Ok(())
    }
}

fn has_table(conn: &Connection, schema: &str, name: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        schema
    );
    let found: Option<i64> = conn.query_row(&sql, params![name], |row| row.get(0)).optional()?;
    Ok(found.is_some())
}
