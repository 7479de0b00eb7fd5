// ==============================================================================
// config.rs - Pipeline Configuration
// ==============================================================================
// Description: Reference dataset descriptors, sex check settings and
//              environment-driven paths and feature flags
// Author: Matt Barham
// Created: 2026-09-18
// Modified: 2026-10-11
// Version: 1.2.0
// ==============================================================================
// Environment:
//   REFERENCE_DATASETS                 Base directory of public datasets
//   PRIVATE_REFERENCE_DATASETS         Base directory of private datasets
//   LOADING_DATASETS                   Base directory of annotation tables
//   CHECK_SEX_AND_RELATEDNESS=1        Enable sex and relatedness QC
//   ACCESS_PRIVATE_REFERENCE_DATASETS=1 Include private datasets
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::metadata::EnumDictionary;
use crate::models::{AccessControl, DatasetType, ReferenceGenome};
use crate::sex_check::SexCheckSettings;

const DEFAULT_REFERENCE_DATASETS: &str = "/seqr/seqr-reference-data";
const DEFAULT_PRIVATE_REFERENCE_DATASETS: &str = "/seqr/seqr-reference-data-private";
const DEFAULT_LOADING_DATASETS: &str = "/seqr/seqr-loading-temp";

/// Static description of one upstream reference dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    /// Dataset file; relative paths resolve against the (private) reference
    /// dataset directory
    pub path: PathBuf,
    /// Version to record when the source does not carry one
    #[serde(default)]
    pub version: Option<String>,
    /// Categorical fields encoded as indexes into these value lists
    #[serde(default)]
    pub enums: EnumDictionary,
    /// Explicit output fields; all declared fields when absent
    #[serde(default)]
    pub select: Option<Vec<String>>,
    /// Contribute this one field as a plain value instead of a struct
    #[serde(default)]
    pub scalar_field: Option<String>,
    /// Joined onto new rows after annotation rather than refreshed on its own
    #[serde(default)]
    pub requires_annotation: bool,
    #[serde(default)]
    pub access: AccessControl,
}

impl DatasetDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Dataset name must not be empty".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "Dataset '{}' has no path",
                self.name
            )));
        }
        for (field, values) in &self.enums {
            let unique: BTreeSet<&String> = values.iter().collect();
            if unique.len() != values.len() {
                return Err(PipelineError::InvalidConfig(format!(
                    "Enum '{}' of dataset '{}' repeats a value",
                    field, self.name
                )));
            }
        }
        if let (Some(scalar), Some(select)) = (&self.scalar_field, &self.select) {
            if !select.contains(scalar) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Scalar field '{}' of dataset '{}' is not selected",
                    scalar, self.name
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// Per (reference genome, dataset type) pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub reference_genome: ReferenceGenome,
    pub dataset_type: DatasetType,
    #[serde(default)]
    pub datasets: Vec<DatasetDescriptor>,
    #[serde(default)]
    pub sex_check: SexCheckSettings,
    /// Fail on callset samples without a remap entry
    #[serde(default)]
    pub strict_remap: bool,
    /// Tolerate admitted samples that are absent from the callset
    #[serde(default)]
    pub ignore_missing_samples: bool,
    /// Check contigs and allele counts of imported callsets
    #[serde(default = "default_true")]
    pub validate_callsets: bool,
}

impl PipelineConfig {
    pub fn new(reference_genome: ReferenceGenome, dataset_type: DatasetType) -> Self {
        Self {
            reference_genome,
            dataset_type,
            datasets: Vec::new(),
            sex_check: SexCheckSettings::default(),
            strict_remap: false,
            ignore_missing_samples: false,
            validate_callsets: true,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&contents)?;
        debug!(
            "Loaded configuration for {} {} with {} datasets",
            config.reference_genome,
            config.dataset_type,
            config.datasets.len()
        );
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for descriptor in &self.datasets {
            descriptor.validate()?;
            if !names.insert(descriptor.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Dataset '{}' declared more than once",
                    descriptor.name
                )));
            }
        }
        self.sex_check.validate(self.reference_genome)?;
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetDescriptor> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| PipelineError::UnknownDataset(name.to_string()))
    }

    /// Datasets visible under the current access settings
    pub fn active_datasets(&self, env: &Env) -> Vec<&DatasetDescriptor> {
        self.datasets
            .iter()
            .filter(|d| d.access == AccessControl::Public || env.access_private_reference_datasets)
            .collect()
    }

    /// Active datasets refreshed independently of new samples
    pub fn refreshable_datasets(&self, env: &Env) -> Vec<&DatasetDescriptor> {
        self.active_datasets(env)
            .into_iter()
            .filter(|d| !d.requires_annotation)
            .collect()
    }

    /// Active datasets joined onto new rows once they are annotated
    pub fn annotation_datasets(&self, env: &Env) -> Vec<&DatasetDescriptor> {
        self.active_datasets(env)
            .into_iter()
            .filter(|d| d.requires_annotation)
            .collect()
    }
}

/// Environment-provided directories and feature flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Env {
    pub reference_datasets: PathBuf,
    pub private_reference_datasets: PathBuf,
    pub loading_datasets: PathBuf,
    pub check_sex_and_relatedness: bool,
    pub access_private_reference_datasets: bool,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            reference_datasets: PathBuf::from(DEFAULT_REFERENCE_DATASETS),
            private_reference_datasets: PathBuf::from(DEFAULT_PRIVATE_REFERENCE_DATASETS),
            loading_datasets: PathBuf::from(DEFAULT_LOADING_DATASETS),
            check_sex_and_relatedness: false,
            access_private_reference_datasets: false,
        }
    }
}

impl Env {
    /// Read from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup; flags are on only when set to "1"
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str| lookup(key).as_deref() == Some("1");
        Self {
            reference_datasets: lookup("REFERENCE_DATASETS")
                .map(PathBuf::from)
                .unwrap_or(defaults.reference_datasets),
            private_reference_datasets: lookup("PRIVATE_REFERENCE_DATASETS")
                .map(PathBuf::from)
                .unwrap_or(defaults.private_reference_datasets),
            loading_datasets: lookup("LOADING_DATASETS")
                .map(PathBuf::from)
                .unwrap_or(defaults.loading_datasets),
            check_sex_and_relatedness: flag("CHECK_SEX_AND_RELATEDNESS"),
            access_private_reference_datasets: flag("ACCESS_PRIVATE_REFERENCE_DATASETS"),
        }
    }

    /// Location of a dataset file
    pub fn dataset_path(&self, descriptor: &DatasetDescriptor) -> PathBuf {
        if descriptor.path.is_absolute() {
            return descriptor.path.clone();
        }
        match descriptor.access {
            AccessControl::Public => self.reference_datasets.join(&descriptor.path),
            AccessControl::Private => self.private_reference_datasets.join(&descriptor.path),
        }
    }

    /// Store file of the annotation table for one genome and dataset type
    pub fn table_path(&self, reference_genome: ReferenceGenome, dataset_type: DatasetType) -> PathBuf {
        self.loading_datasets
            .join(reference_genome.as_str())
            .join(dataset_type.as_str())
            .join("annotations.sqlite")
    }
}

/// Per-field enum dictionaries merged from a dataset source and its descriptor;
/// descriptor entries win
pub fn merge_enums(source: &EnumDictionary, descriptor: &EnumDictionary) -> EnumDictionary {
    let mut merged: BTreeMap<String, Vec<String>> = source.clone();
    for (field, values) in descriptor {
        merged.insert(field.clone(), values.clone());
    }
    merged
}
