// ==============================================================================
// table.rs - Variant Annotation Table
// ==============================================================================
// Description: Keyed annotation rows with a declared schema, global dataset
//              metadata and the update log
// Author: Matt Barham
// Created: 2026-09-18
// Modified: 2026-10-10
// Version: 1.2.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PipelineError, Result};
use crate::metadata::MetadataSnapshot;
use crate::models::{DatasetType, ReferenceGenome, VariantKey};
use crate::update_log::{UpdateLog, UpdateLogToken};

/// One annotation row: field name to value, `Null` marks missing
pub type Row = BTreeMap<String, Value>;

/// Declared shape of a table field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Scalar,
    /// Object with the named members
    Struct(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationTable {
    pub reference_genome: ReferenceGenome,
    pub dataset_type: DatasetType,
    schema: BTreeMap<String, FieldType>,
    rows: BTreeMap<VariantKey, Row>,
    pub globals: MetadataSnapshot,
    pub updates: UpdateLog,
}

impl AnnotationTable {
    /// Empty table; the key schema follows from `dataset_type`
    pub fn new(reference_genome: ReferenceGenome, dataset_type: DatasetType) -> Self {
        Self {
            reference_genome,
            dataset_type,
            schema: BTreeMap::new(),
            rows: BTreeMap::new(),
            globals: MetadataSnapshot::new(),
            updates: UpdateLog::new(),
        }
    }

    /// Reassemble a table from stored parts
    pub fn from_parts(
        reference_genome: ReferenceGenome,
        dataset_type: DatasetType,
        schema: BTreeMap<String, FieldType>,
        rows: BTreeMap<VariantKey, Row>,
        globals: MetadataSnapshot,
        updates: UpdateLog,
    ) -> Result<Self> {
        for (key, row) in &rows {
            if row.len() != schema.len() || !schema.keys().all(|f| row.contains_key(f)) {
                return Err(PipelineError::MalformedRow {
                    source_name: "annotation table".to_string(),
                    line: 0,
                    details: format!("{} does not match the table schema", key),
                });
            }
        }
        Ok(Self {
            reference_genome,
            dataset_type,
            schema,
            rows,
            globals,
            updates,
        })
    }

    pub fn schema(&self) -> &BTreeMap<String, FieldType> {
        &self.schema
    }

    pub fn field_type(&self, field: &str) -> Option<&FieldType> {
        self.schema.get(field)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.schema.contains_key(field)
    }

    pub fn rows(&self) -> &BTreeMap<VariantKey, Row> {
        &self.rows
    }

    pub fn get(&self, key: &VariantKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &VariantKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys of `keys` not present in the table
    pub fn anti_join_keys(&self, keys: &BTreeSet<VariantKey>) -> BTreeSet<VariantKey> {
        keys.iter()
            .filter(|k| !self.rows.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Union with rows whose keys are not yet in the table
    ///
    /// The schema becomes the union of both schemas; fields either side lacks
    /// are filled with `Null`. A key already present is a data error.
    pub fn outer_union(
        &self,
        new_rows: BTreeMap<VariantKey, Row>,
        new_schema: &BTreeMap<String, FieldType>,
    ) -> Result<Self> {
        let mut schema = self.schema.clone();
        for (field, field_type) in new_schema {
            let merged = match schema.get(field) {
                Some(existing) if existing != field_type => {
                    Some(merge_field_types(existing, field_type, field)?)
                }
                Some(_) => None,
                None => Some(field_type.clone()),
            };
            if let Some(merged) = merged {
                schema.insert(field.clone(), merged);
            }
        }

        let mut rows = self.rows.clone();
        for row in rows.values_mut() {
            fill_missing(row, &schema);
        }
        for (key, mut row) in new_rows {
            if rows.contains_key(&key) {
                return Err(PipelineError::MalformedRow {
                    source_name: "outer union".to_string(),
                    line: 0,
                    details: format!("{} already present in table", key),
                });
            }
            row.retain(|field, _| schema.contains_key(field));
            fill_missing(&mut row, &schema);
            rows.insert(key, row);
        }

        Ok(Self {
            schema,
            rows,
            ..self.clone()
        })
    }

    /// Remove a field from the schema and every row
    pub fn drop_field(&self, field: &str) -> Self {
        let mut next = self.clone();
        if next.schema.remove(field).is_some() {
            for row in next.rows.values_mut() {
                row.remove(field);
            }
        }
        next
    }

    /// Add `field` to every row from `values`; keys without a value get `Null`
    pub fn left_join(
        &self,
        field: &str,
        field_type: FieldType,
        values: &BTreeMap<VariantKey, Value>,
    ) -> Self {
        let mut next = self.clone();
        next.schema.insert(field.to_string(), field_type);
        for (key, row) in next.rows.iter_mut() {
            row.insert(
                field.to_string(),
                values.get(key).cloned().unwrap_or(Value::Null),
            );
        }
        next
    }

    /// Overwrite one field on existing rows; keys not in the table are ignored
    pub fn set_field(
        &self,
        field: &str,
        field_type: FieldType,
        values: BTreeMap<VariantKey, Value>,
    ) -> Self {
        let mut next = self.clone();
        if !next.schema.contains_key(field) {
            next.schema.insert(field.to_string(), field_type);
            for row in next.rows.values_mut() {
                row.insert(field.to_string(), Value::Null);
            }
        }
        for (key, value) in values {
            if let Some(row) = next.rows.get_mut(&key) {
                row.insert(field.to_string(), value);
            }
        }
        next
    }

    pub fn with_globals(&self, globals: MetadataSnapshot) -> Self {
        Self {
            globals,
            ..self.clone()
        }
    }

    pub fn with_update(&self, token: UpdateLogToken) -> Self {
        Self {
            updates: self.updates.with(token),
            ..self.clone()
        }
    }
}

fn fill_missing(row: &mut Row, schema: &BTreeMap<String, FieldType>) {
    for field in schema.keys() {
        row.entry(field.clone()).or_insert(Value::Null);
    }
}

/// Struct fields widen to the union of their members; scalar and struct
/// never mix
fn merge_field_types(a: &FieldType, b: &FieldType, field: &str) -> Result<FieldType> {
    match (a, b) {
        (FieldType::Struct(x), FieldType::Struct(y)) => {
            Ok(FieldType::Struct(x.union(y).cloned().collect()))
        }
        _ => Err(PipelineError::InvalidConfig(format!(
            "Field '{}' is scalar on one side of a union and a struct on the other",
            field
        ))),
    }
}
