// ==============================================================================
// metadata.rs - Reference Dataset Metadata Snapshots
// ==============================================================================
// Description: Per-dataset provenance and the staleness comparison between
//              a table's recorded metadata and the current upstream sources
// Author: Matt Barham
// Created: 2026-09-17
// Modified: 2026-10-09
// Version: 1.2.0
// ==============================================================================
// Algorithm:
//   For every candidate dataset name, compare paths, versions, enums and
//   selects between the old and new snapshot. Any mismatching facet marks
//   the dataset stale. Absent compares equal only to absent.
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

use crate::config::DatasetDescriptor;
use crate::error::Result;
use crate::reference_dataset::ReferenceDatasetReader;
use crate::table::{AnnotationTable, FieldType};

/// Enum dictionaries of one dataset: field name to ordered values
pub type EnumDictionary = BTreeMap<String, Vec<String>>;

/// Provenance of a single dataset as loaded from its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub path: String,
    pub version: String,
    pub enums: EnumDictionary,
    /// Output field names; empty for datasets contributing a scalar
    pub selects: BTreeSet<String>,
}

/// The four metadata facets compared for staleness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Paths,
    Versions,
    Enums,
    Selects,
}

impl Facet {
    pub const ALL: [Facet; 4] = [Facet::Paths, Facet::Versions, Facet::Enums, Facet::Selects];

    pub fn as_str(&self) -> &'static str {
        match self {
            Facet::Paths => "paths",
            Facet::Versions => "versions",
            Facet::Enums => "enums",
            Facet::Selects => "selects",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for a set of datasets, keyed by dataset name per facet
///
/// Value object: updates produce a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
    #[serde(default)]
    pub enums: BTreeMap<String, EnumDictionary>,
    #[serde(default)]
    pub selects: BTreeMap<String, BTreeSet<String>>,
}

impl MetadataSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dataset name mentioned in any facet
    pub fn dataset_names(&self) -> BTreeSet<String> {
        self.paths
            .keys()
            .chain(self.versions.keys())
            .chain(self.enums.keys())
            .chain(self.selects.keys())
            .cloned()
            .collect()
    }

    /// Returns a snapshot with all four entries for `name` replaced
    pub fn with_dataset(&self, name: &str, metadata: &DatasetMetadata) -> Self {
        let mut next = self.clone();
        next.paths.insert(name.to_string(), metadata.path.clone());
        next.versions
            .insert(name.to_string(), metadata.version.clone());
        next.enums.insert(name.to_string(), metadata.enums.clone());
        next.selects
            .insert(name.to_string(), metadata.selects.clone());
        next
    }

    /// Restrict every facet to the given dataset names
    pub fn restricted_to(&self, names: &BTreeSet<String>) -> Self {
        fn keep<V: Clone>(map: &BTreeMap<String, V>, names: &BTreeSet<String>) -> BTreeMap<String, V> {
            map.iter()
                .filter(|(k, _)| names.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
        Self {
            paths: keep(&self.paths, names),
            versions: keep(&self.versions, names),
            enums: keep(&self.enums, names),
            selects: keep(&self.selects, names),
        }
    }

    /// Facets on which `self` and `other` disagree for `name`
    pub fn mismatched_facets(&self, other: &MetadataSnapshot, name: &str) -> Vec<Facet> {
        Facet::ALL
            .into_iter()
            .filter(|facet| {
                let equal = match facet {
                    Facet::Paths => self.paths.get(name) == other.paths.get(name),
                    Facet::Versions => self.versions.get(name) == other.versions.get(name),
                    Facet::Enums => self.enums.get(name) == other.enums.get(name),
                    Facet::Selects => self.selects.get(name) == other.selects.get(name),
                };
                !equal
            })
            .collect()
    }

    fn mentions(&self, name: &str) -> bool {
        self.paths.contains_key(name)
            || self.versions.contains_key(name)
            || self.enums.contains_key(name)
            || self.selects.contains_key(name)
    }
}

/// Snapshot of the current upstream sources
///
/// Load failures are fatal and propagate to the caller.
pub fn snapshot_from_sources(
    descriptors: &[DatasetDescriptor],
    reader: &dyn ReferenceDatasetReader,
) -> Result<MetadataSnapshot> {
    let mut snapshot = MetadataSnapshot::new();
    for descriptor in descriptors {
        let metadata = reader.load_metadata(descriptor)?;
        debug!(
            "Source metadata for {}: version {} from {}",
            descriptor.name, metadata.version, metadata.path
        );
        snapshot = snapshot.with_dataset(&descriptor.name, &metadata);
    }
    Ok(snapshot)
}

/// Snapshot recorded on an existing table
///
/// `selects` comes from the table's declared schema: a struct field reports
/// its member names, a scalar field reports the empty set, and a dataset
/// without a field in the schema reports nothing.
pub fn snapshot_from_table(
    table: &AnnotationTable,
    dataset_names: &BTreeSet<String>,
) -> MetadataSnapshot {
    let mut snapshot = table.globals.restricted_to(dataset_names);
    snapshot.selects = dataset_names
        .iter()
        .filter_map(|name| {
            let selects = match table.field_type(name)? {
                FieldType::Struct(fields) => fields.clone(),
                FieldType::Scalar => BTreeSet::new(),
            };
            Some((name.clone(), selects))
        })
        .collect();
    snapshot
}

/// Datasets among `dataset_names` whose metadata differs between snapshots
pub fn stale_datasets(
    old: &MetadataSnapshot,
    new: &MetadataSnapshot,
    dataset_names: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut stale = BTreeSet::new();
    for name in dataset_names {
        if !old.mentions(name) {
            info!("{} absent from table metadata", name);
            stale.insert(name.clone());
            continue;
        }
        let mismatched = old.mismatched_facets(new, name);
        for facet in &mismatched {
            info!("{} mismatch for {}", facet, name);
        }
        if !mismatched.is_empty() {
            stale.insert(name.clone());
        }
    }
    stale
}
