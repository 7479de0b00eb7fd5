// ==============================================================================
// reference_dataset.rs - Reference Dataset Reader
// ==============================================================================
// Description: Reads versioned upstream annotation datasets from SQLite files,
//              applying field selection and enum encoding
// Author: Matt Barham
// Created: 2025-11-12
// Modified: 2026-10-19
// Version: 2.1.0
// ==============================================================================
// File layout:
//   metadata(key TEXT PRIMARY KEY, value TEXT)
//     path     source the dataset was built from (optional)
//     version  dataset version (optional when the descriptor carries one)
//     enums    JSON object: field -> [values] (optional)
//     fields   JSON object: field -> "scalar" | "array" (required)
//   variants(variant_id TEXT PRIMARY KEY, fields TEXT)
//     fields   JSON object of the row's values
// ==============================================================================

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{merge_enums, DatasetDescriptor, Env};
use crate::error::{PipelineError, Result};
use crate::metadata::{DatasetMetadata, EnumDictionary};
use crate::models::VariantKey;
use crate::table::FieldType;

/// Declared kind of a dataset field
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Scalar,
    Array,
}

/// A dataset loaded, selected and enum-encoded, ready to join
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetTable {
    pub name: String,
    pub metadata: DatasetMetadata,
    pub field_type: FieldType,
    pub rows: BTreeMap<VariantKey, Value>,
}

/// Loads upstream datasets
pub trait ReferenceDatasetReader {
    /// Provenance and output fields without reading rows
    fn load_metadata(&self, descriptor: &DatasetDescriptor) -> Result<DatasetMetadata>;

    fn load(&self, descriptor: &DatasetDescriptor) -> Result<DatasetTable>;

    /// Whether the dataset has been materialized
    fn exists(&self, descriptor: &DatasetDescriptor) -> bool;
}

/// How one declared field maps into the output
#[derive(Debug, Clone, PartialEq)]
struct FieldPlan {
    source: String,
    output: String,
    enum_values: Option<Vec<String>>,
}

/// Output plan for a dataset: which fields, renamed how, encoded how
#[derive(Debug, Clone, PartialEq)]
struct SelectPlan {
    fields: Vec<FieldPlan>,
    scalar: Option<String>,
    enums: EnumDictionary,
}

impl SelectPlan {
    /// Resolve selection and enum encoding against the declared fields
    fn resolve(
        descriptor: &DatasetDescriptor,
        declared: &BTreeMap<String, FieldKind>,
        source_enums: &EnumDictionary,
    ) -> Result<Self> {
        let enums = merge_enums(source_enums, &descriptor.enums);

        for field in enums.keys() {
            if declared.contains_key(field) {
                continue;
            }
            // Already encoded upstream
            if declared.contains_key(&format!("{}_id", field))
                || declared.contains_key(&format!("{}_ids", field))
            {
                continue;
            }
            return Err(PipelineError::UnusedEnum {
                dataset: descriptor.name.clone(),
                field: field.clone(),
            });
        }

        let selected: Vec<String> = match &descriptor.select {
            Some(select) => select.clone(),
            None => declared.keys().cloned().collect(),
        };

        let mut fields = Vec::with_capacity(selected.len());
        for source in selected {
            let kind = declared
                .get(&source)
                .ok_or_else(|| PipelineError::MissingKeyField {
                    dataset: descriptor.name.clone(),
                    field: source.clone(),
                })?;
            let enum_values = enums.get(&source).cloned();
            let output = match (&enum_values, kind) {
                (Some(_), FieldKind::Scalar) => format!("{}_id", source),
                (Some(_), FieldKind::Array) => format!("{}_ids", source),
                (None, _) => source.clone(),
            };
            fields.push(FieldPlan {
                source,
                output,
                enum_values,
            });
        }

        if let Some(scalar) = &descriptor.scalar_field {
            if !fields.iter().any(|f| &f.source == scalar) {
                return Err(PipelineError::MissingKeyField {
                    dataset: descriptor.name.clone(),
                    field: scalar.clone(),
                });
            }
        }

        Ok(Self {
            fields,
            scalar: descriptor.scalar_field.clone(),
            enums,
        })
    }

    fn field_type(&self) -> FieldType {
        match self.scalar {
            Some(_) => FieldType::Scalar,
            None => FieldType::Struct(self.selects()),
        }
    }

    /// Output member names; empty for scalar datasets
    fn selects(&self) -> BTreeSet<String> {
        match self.scalar {
            Some(_) => BTreeSet::new(),
            None => self.fields.iter().map(|f| f.output.clone()).collect(),
        }
    }

    /// Select and encode one raw row
    ///
    /// Every selected field is encoded, scalar datasets included, so a bad
    /// enum value anywhere in the selection is reported.
    fn apply(&self, dataset: &str, raw: &serde_json::Map<String, Value>) -> Result<Value> {
        let mut encoded = serde_json::Map::new();
        let mut scalar_value = None;
        for plan in &self.fields {
            let value = raw.get(&plan.source).cloned().unwrap_or(Value::Null);
            let value = match &plan.enum_values {
                Some(values) => encode_enum(dataset, &plan.source, values, value)?,
                None => value,
            };
            if self.scalar.as_deref() == Some(plan.source.as_str()) {
                scalar_value = Some(value);
            } else {
                encoded.insert(plan.output.clone(), value);
            }
        }
        Ok(match scalar_value {
            Some(value) => value,
            None => Value::Object(encoded),
        })
    }
}

/// Replace enum strings with their index; missing stays missing, an
/// unlisted value is fatal
fn encode_enum(dataset: &str, field: &str, values: &[String], value: Value) -> Result<Value> {
    let lookup = |v: &Value| -> Result<Value> {
        match v {
            Value::Null => Ok(Value::Null),
            Value::String(s) => values
                .iter()
                .position(|candidate| candidate == s)
                .map(|i| Value::from(i as u64))
                .ok_or_else(|| PipelineError::UnexpectedEnumValue {
                    dataset: dataset.to_string(),
                    field: field.to_string(),
                    value: s.clone(),
                }),
            other => Err(PipelineError::UnexpectedEnumValue {
                dataset: dataset.to_string(),
                field: field.to_string(),
                value: other.to_string(),
            }),
        }
    };

    match value {
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(lookup).collect::<Result<Vec<_>>>()?,
        )),
        other => lookup(&other),
    }
}

/// SQLite dataset file
pub struct ReferenceDatasetFile {
    conn: Connection,
    path: PathBuf,
}

impl ReferenceDatasetFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self {
            conn,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Write a dataset file; used to stage datasets locally
    pub fn create<P: AsRef<Path>>(
        path: P,
        metadata: &BTreeMap<String, String>,
        rows: &BTreeMap<VariantKey, Value>,
    ) -> Result<()> {
        let mut conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS variants (variant_id TEXT PRIMARY KEY, fields TEXT NOT NULL);",
        )?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")?;
            for (key, value) in metadata {
                stmt.execute(params![key, value])?;
            }

            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO variants (variant_id, fields) VALUES (?1, ?2)")?;
            for (key, fields) in rows {
                stmt.execute(params![key.variant_id(), serde_json::to_string(fields)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
        Ok(result)
    }

    fn malformed(&self, details: String) -> PipelineError {
        PipelineError::MalformedRow {
            source_name: self.path.display().to_string(),
            line: 0,
            details,
        }
    }

    fn declared_fields(&self) -> Result<BTreeMap<String, FieldKind>> {
        let raw = self
            .get_metadata("fields")?
            .ok_or_else(|| self.malformed("metadata has no 'fields' entry".to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn source_enums(&self) -> Result<EnumDictionary> {
        match self.get_metadata("enums")? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(EnumDictionary::new()),
        }
    }

    fn plan(&self, descriptor: &DatasetDescriptor) -> Result<(SelectPlan, DatasetMetadata)> {
        let plan = SelectPlan::resolve(descriptor, &self.declared_fields()?, &self.source_enums()?)?;

        let version = match self.get_metadata("version")? {
            Some(version) => version,
            None => descriptor
                .version
                .clone()
                .ok_or_else(|| self.malformed("dataset carries no version".to_string()))?,
        };
        let path = self
            .get_metadata("path")?
            .unwrap_or_else(|| self.path.display().to_string());

        let metadata = DatasetMetadata {
            path,
            version,
            enums: plan.enums.clone(),
            selects: plan.selects(),
        };
        Ok((plan, metadata))
    }

    pub fn load_metadata(&self, descriptor: &DatasetDescriptor) -> Result<DatasetMetadata> {
        Ok(self.plan(descriptor)?.1)
    }

    pub fn load(&self, descriptor: &DatasetDescriptor) -> Result<DatasetTable> {
        let (plan, metadata) = self.plan(descriptor)?;

        let mut stmt = self
            .conn
            .prepare("SELECT variant_id, fields FROM variants ORDER BY variant_id")?;
        let raw_rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut rows = BTreeMap::new();
        for (line, raw) in raw_rows.enumerate() {
            let (variant_id, fields) = raw?;
            let key = VariantKey::parse(&variant_id).ok_or_else(|| PipelineError::MalformedRow {
                source_name: self.path.display().to_string(),
                line: line + 1,
                details: format!("'{}' is not a variant id", variant_id),
            })?;
            let fields: serde_json::Map<String, Value> = serde_json::from_str(&fields)?;
            rows.insert(key, plan.apply(&descriptor.name, &fields)?);
        }

        info!(
            "Loaded {} rows of {} version {}",
            rows.len(),
            descriptor.name,
            metadata.version
        );

        Ok(DatasetTable {
            name: descriptor.name.clone(),
            field_type: plan.field_type(),
            metadata,
            rows,
        })
    }
}

/// Reads dataset files from the environment's reference directories
pub struct SqliteDatasetReader {
    env: Env,
}

impl SqliteDatasetReader {
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    fn open(&self, descriptor: &DatasetDescriptor) -> Result<ReferenceDatasetFile> {
        let path = self.env.dataset_path(descriptor);
        if !path.exists() {
            return Err(PipelineError::incomplete(
                "reference datasets",
                format!("{} not found at {}", descriptor.name, path.display()),
            ));
        }
        ReferenceDatasetFile::open(path)
    }
}

impl ReferenceDatasetReader for SqliteDatasetReader {
    fn load_metadata(&self, descriptor: &DatasetDescriptor) -> Result<DatasetMetadata> {
        self.open(descriptor)?.load_metadata(descriptor)
    }

    fn load(&self, descriptor: &DatasetDescriptor) -> Result<DatasetTable> {
        self.open(descriptor)?.load(descriptor)
    }

    fn exists(&self, descriptor: &DatasetDescriptor) -> bool {
        self.env.dataset_path(descriptor).exists()
    }
}
