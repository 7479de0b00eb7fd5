// ==============================================================================
// annotator.rs - Variant Annotation Sources
// ==============================================================================
// Description: Per-variant consequence annotation behind a trait
// Author: Matt Barham
// Created: 2026-09-20
// Modified: 2026-09-29
// Version: 1.0.0
// ==============================================================================

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::VariantKey;

/// Produces an annotation per variant key
///
/// Keys without an annotation are simply absent from the result.
pub trait VariantAnnotator {
    fn annotate(&self, keys: &BTreeSet<VariantKey>) -> Result<BTreeMap<VariantKey, Value>>;
}

/// Annotator that never annotates anything
pub struct NoAnnotations;

impl VariantAnnotator for NoAnnotations {
    fn annotate(&self, _keys: &BTreeSet<VariantKey>) -> Result<BTreeMap<VariantKey, Value>> {
        Ok(BTreeMap::new())
    }
}

/// Pre-computed annotations from a JSON object keyed by variant id
///
/// ```json
/// { "chr1-12345-A-G": { "gene_ids": ["ENSG00000012048"] } }
/// ```
pub struct JsonAnnotationSource {
    annotations: BTreeMap<VariantKey, Value>,
}

impl JsonAnnotationSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let raw: BTreeMap<String, Value> = serde_json::from_reader(reader)?;
        let source = Self::from_map(raw, &path.display().to_string())?;
        info!(
            "Loaded {} annotations from {}",
            source.annotations.len(),
            path.display()
        );
        Ok(source)
    }

    pub fn from_map(raw: BTreeMap<String, Value>, source_name: &str) -> Result<Self> {
        let mut annotations = BTreeMap::new();
        for (line, (variant_id, value)) in raw.into_iter().enumerate() {
            let key = VariantKey::parse(&variant_id).ok_or_else(|| PipelineError::MalformedRow {
                source_name: source_name.to_string(),
                line: line + 1,
                details: format!("'{}' is not a variant id", variant_id),
            })?;
            annotations.insert(key, value);
        }
        Ok(Self { annotations })
    }
}

impl VariantAnnotator for JsonAnnotationSource {
    fn annotate(&self, keys: &BTreeSet<VariantKey>) -> Result<BTreeMap<VariantKey, Value>> {
        let found: BTreeMap<VariantKey, Value> = keys
            .iter()
            .filter_map(|k| self.annotations.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        debug!("Annotated {} of {} variants", found.len(), keys.len());
        Ok(found)
    }
}
