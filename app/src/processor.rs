// ==============================================================================
// processor.rs - Pipeline Stage Orchestration
// ==============================================================================
// Description: Runs the table stages (init, new samples, reference dataset
//              refresh) against one store with completion gates and auditing
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-19
// Version: 3.1.0
// ==============================================================================
// Stage outcomes:
//   Completed       table written
//   AlreadyApplied  token present (or table already initialized), no write
//   UpToDate        no reference dataset is stale, no write
//   Incomplete      an input is not materialized yet, no write; retry later
// Any other error aborts the stage and is returned to the caller.
// ==============================================================================

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::admission::{admit, QcChecks};
use crate::annotator::{JsonAnnotationSource, NoAnnotations, VariantAnnotator};
use crate::audit::{AuditEventType, AuditLog};
use crate::config::{DatasetDescriptor, Env, PipelineConfig};
use crate::error::PipelineError;
use crate::lookup::SampleLookupTable;
use crate::merger::{merge_new_variants, refresh_stale_datasets, MergeContext, MergeOutcome};
use crate::metadata::{snapshot_from_sources, snapshot_from_table, stale_datasets};
use crate::output::{export_table, OutputFormat};
use crate::parsers::{CallsetReader, PedigreeParser, RemapParser};
use crate::reference_dataset::{DatasetTable, ReferenceDatasetReader, SqliteDatasetReader};
use crate::relatedness::FlaggedPairs;
use crate::sex_check::{call_sex, SexCallResult};
use crate::store::TableStore;
use crate::table::AnnotationTable;
use crate::update_log::UpdateLogToken;
use crate::validator::InputValidator;

pub const INIT_TABLE: &str = "init_table";
pub const UPDATE_WITH_NEW_SAMPLES: &str = "update_with_new_samples";
pub const UPDATE_REFERENCE_DATASETS: &str = "update_reference_datasets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    AlreadyApplied,
    UpToDate,
    Incomplete(String),
}

/// Inputs for loading one project's samples from one callset
#[derive(Debug, Clone)]
pub struct NewSamplesRequest {
    pub callset_path: PathBuf,
    pub project_guid: String,
    pub pedigree_path: PathBuf,
    pub remap_path: Option<PathBuf>,
    /// Sample pairs that failed the relatedness check
    pub relatedness_path: Option<PathBuf>,
    /// Pre-computed variant annotations (JSON keyed by variant id)
    pub annotations_path: Option<PathBuf>,
}

pub struct Pipeline {
    config: PipelineConfig,
    env: Env,
    store: TableStore,
    audit: AuditLog,
    reader: Box<dyn ReferenceDatasetReader>,
    validator: InputValidator,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, env: Env) -> Result<Self> {
        config.validate().context("Invalid pipeline configuration")?;
        let store = TableStore::new(
            env.table_path(config.reference_genome, config.dataset_type),
        );
        let audit = AuditLog::open(store.path()).context("Failed to open audit log")?;
        let reader = Box::new(SqliteDatasetReader::new(env.clone()));

        Ok(Self {
            config,
            env,
            store,
            audit,
            reader,
            validator: InputValidator::new(),
        })
    }

    /// Swap the dataset reader (datasets staged somewhere other than the
    /// environment's directories)
    pub fn with_reader(mut self, reader: Box<dyn ReferenceDatasetReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Create the empty table for this genome and dataset type
    pub fn init_table(&self) -> Result<StageOutcome> {
        self.run_stage(INIT_TABLE, None, || {
            if self.store.exists()? {
                info!("{} already exists", self.store.path().display());
                return Ok((StageOutcome::AlreadyApplied, json!({})));
            }
            let table =
                AnnotationTable::new(self.config.reference_genome, self.config.dataset_type);
            self.store
                .write(&table, &SampleLookupTable::new())
                .context("Failed to write empty table")?;
            Ok((StageOutcome::Completed, json!({})))
        })
    }

    /// Admit a project's samples from a callset and merge its unseen variants
    pub fn update_with_new_samples(&self, request: &NewSamplesRequest) -> Result<StageOutcome> {
        let resource = Some(request.callset_path.display().to_string());
        self.run_stage(UPDATE_WITH_NEW_SAMPLES, resource, || self.new_samples(request))
    }

    fn new_samples(&self, request: &NewSamplesRequest) -> Result<(StageOutcome, Value)> {
        let stage = UPDATE_WITH_NEW_SAMPLES;
        let checks_enabled = self.env.check_sex_and_relatedness
            && self.config.dataset_type.supports_sex_and_relatedness();

        // 1. Inputs must be materialized before anything is read
        self.validator
            .validate_callset(stage, &request.callset_path)?;
        self.validator
            .validate_pedigree(stage, &request.pedigree_path)?;
        let remap_path = request.remap_path.as_deref().filter(|p| p.exists());
        if let Some(path) = remap_path {
            self.validator.validate_remap(stage, path)?;
        }
        if checks_enabled {
            if let Some(path) = &request.relatedness_path {
                self.validator.require_exists(stage, path)?;
            }
        }

        // 2. Skip early when this exact load has been applied
        let token = UpdateLogToken::from_files(
            &request.callset_path.display().to_string(),
            &request.project_guid,
            remap_path,
            &request.pedigree_path,
        )?;
        let (table, lookup) = self.current_table()?;
        if table.updates.contains(&token) {
            info!(
                "{} already loaded for {}",
                token.callset, token.project_guid
            );
            return Ok((StageOutcome::AlreadyApplied, json!({})));
        }

        // 3. Datasets and annotations resolve before any per-sample work
        let annotation_datasets = self.load_datasets(&self.config.annotation_datasets(&self.env))?;
        let carried: Vec<&DatasetDescriptor> = self
            .config
            .refreshable_datasets(&self.env)
            .into_iter()
            .filter(|d| table.has_field(&d.name))
            .collect();
        let reference_datasets = self.load_datasets(&carried)?;
        let annotator: Box<dyn VariantAnnotator> = match &request.annotations_path {
            Some(path) => Box::new(
                JsonAnnotationSource::from_path(path).context("Failed to load annotations")?,
            ),
            None => Box::new(NoAnnotations),
        };

        // 4. Read inputs
        let callset = CallsetReader::new()
            .read(&request.callset_path)
            .map_err(PipelineError::from)
            .with_context(|| format!("Failed to read {}", request.callset_path.display()))?;
        if self.config.validate_callsets {
            callset.validate(self.config.reference_genome, self.config.dataset_type)?;
        }
        let remap = match remap_path {
            Some(path) => Some(RemapParser::parse(path).map_err(PipelineError::from)?),
            None => None,
        };
        let pedigree = PedigreeParser::parse(&request.pedigree_path)
            .map_err(PipelineError::from)
            .context("Failed to parse pedigree")?;

        // 5. Admission
        let relatedness = match (&request.relatedness_path, checks_enabled) {
            (Some(path), true) => FlaggedPairs::from_path(path, remap.as_ref())?,
            _ => FlaggedPairs::empty(),
        };
        let checks = QcChecks {
            reference_genome: self.config.reference_genome,
            settings: &self.config.sex_check,
            relatedness: &relatedness,
        };
        let admission = admit(
            &callset,
            &pedigree,
            remap.as_ref(),
            self.config.strict_remap,
            checks_enabled.then_some(&checks),
        )?;

        // 6. Merge, then record exclusions once the table is written
        let ctx = MergeContext {
            project_guid: &request.project_guid,
            annotator: annotator.as_ref(),
            annotation_datasets: &annotation_datasets,
            reference_datasets: &reference_datasets,
            ignore_missing_samples: self.config.ignore_missing_samples,
        };

        match merge_new_variants(
            &table,
            &lookup,
            &admission.callset,
            &admission.admitted,
            &token,
            &ctx,
        )? {
            MergeOutcome::AlreadyApplied => Ok((StageOutcome::AlreadyApplied, json!({}))),
            MergeOutcome::Merged {
                table,
                lookup,
                new_variants,
            } => {
                self.store
                    .write(&table, &lookup)
                    .context("Failed to write merged table")?;
                if !admission.report.is_empty() {
                    self.audit.log_event(
                        AuditEventType::FamiliesExcluded,
                        stage,
                        Some(request.project_guid.clone()),
                        serde_json::to_value(&admission.report)?,
                    )?;
                }
                Ok((
                    StageOutcome::Completed,
                    json!({
                        "project_guid": request.project_guid,
                        "new_variants": new_variants,
                        "admitted_samples": admission.admitted.len(),
                        "excluded_families": admission.report.excluded_families().len(),
                    }),
                ))
            }
        }
    }

    /// Re-join every reference dataset whose upstream metadata changed
    pub fn update_reference_datasets(&self) -> Result<StageOutcome> {
        self.run_stage(UPDATE_REFERENCE_DATASETS, None, || {
            let descriptors: Vec<DatasetDescriptor> = self
                .config
                .refreshable_datasets(&self.env)
                .into_iter()
                .cloned()
                .collect();
            let names: BTreeSet<String> = descriptors.iter().map(|d| d.name.clone()).collect();

            let (table, lookup) = self.current_table()?;
            let sources = snapshot_from_sources(&descriptors, self.reader.as_ref())?;
            let recorded = snapshot_from_table(&table, &names);
            let stale = stale_datasets(&recorded, &sources, &names);
            if stale.is_empty() && self.store.exists()? {
                info!("All {} reference datasets are current", names.len());
                return Ok((StageOutcome::UpToDate, json!({})));
            }

            let stale_descriptors = stale
                .iter()
                .map(|name| self.config.dataset(name).cloned())
                .collect::<crate::error::Result<Vec<_>>>()?;
            let loaded: BTreeMap<String, DatasetTable> = self
                .load_datasets(&stale_descriptors.iter().collect::<Vec<_>>())?
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect();

            let refreshed = refresh_stale_datasets(&table, &stale, &loaded)?;
            self.store
                .write(&refreshed, &lookup)
                .context("Failed to write refreshed table")?;

            if !stale.is_empty() {
                self.audit.log_event(
                    AuditEventType::DatasetsRefreshed,
                    UPDATE_REFERENCE_DATASETS,
                    None,
                    json!({ "datasets": stale }),
                )?;
            }
            Ok((StageOutcome::Completed, json!({ "refreshed": stale.len() })))
        })
    }

    /// Sex calls for every sample of a callset, without loading anything
    pub fn call_sex(&self, callset_path: &Path) -> Result<BTreeMap<String, SexCallResult>> {
        self.validator.validate_callset("call_sex", callset_path)?;
        let callset = CallsetReader::new()
            .read(callset_path)
            .map_err(PipelineError::from)
            .with_context(|| format!("Failed to read {}", callset_path.display()))?;
        let calls = call_sex(&callset, self.config.reference_genome, &self.config.sex_check)?;
        Ok(calls)
    }

    /// Export the stored table
    pub fn export(&self, output_dir: &Path, format: OutputFormat) -> Result<PathBuf> {
        let (table, _) = self
            .store
            .read()?
            .ok_or_else(|| {
                PipelineError::incomplete(
                    "export",
                    format!("no table at {}", self.store.path().display()),
                )
            })?;
        let stem = format!(
            "{}_{}",
            table.reference_genome.as_str(),
            table.dataset_type.as_str()
        );
        export_table(&table, output_dir, &stem, format)
    }

    fn current_table(&self) -> Result<(AnnotationTable, SampleLookupTable)> {
        let stored = self
            .store
            .read()
            .with_context(|| format!("Failed to read {}", self.store.path().display()))?;
        Ok(stored.unwrap_or_else(|| {
            (
                AnnotationTable::new(self.config.reference_genome, self.config.dataset_type),
                SampleLookupTable::new(),
            )
        }))
    }

    fn load_datasets(&self, descriptors: &[&DatasetDescriptor]) -> Result<Vec<DatasetTable>> {
        let mut tables = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let table = self
                .reader
                .load(descriptor)
                .with_context(|| format!("Failed to load reference dataset {}", descriptor.name))?;
            tables.push(table);
        }
        Ok(tables)
    }

    /// Run a stage body, turning retryable failures into `Incomplete` and
    /// recording the outcome
    fn run_stage<F>(&self, stage: &str, resource: Option<String>, body: F) -> Result<StageOutcome>
    where
        F: FnOnce() -> Result<(StageOutcome, Value)>,
    {
        info!(
            "Starting {} for {} {}",
            stage, self.config.reference_genome, self.config.dataset_type
        );
        self.audit
            .log_event(AuditEventType::StageStarted, stage, resource.clone(), json!({}))?;

        match body() {
            Ok((outcome, details)) => {
                let event = match outcome {
                    StageOutcome::Completed => AuditEventType::StageCompleted,
                    StageOutcome::AlreadyApplied | StageOutcome::UpToDate => {
                        AuditEventType::StageSkipped
                    }
                    StageOutcome::Incomplete(_) => AuditEventType::StageIncomplete,
                };
                self.audit.log_event(event, stage, resource, details)?;
                info!("{} finished: {:?}", stage, outcome);
                Ok(outcome)
            }
            Err(e) => match incomplete_reason(&e) {
                Some(reason) => {
                    warn!("{} incomplete: {}", stage, reason);
                    self.audit.log_event(
                        AuditEventType::StageIncomplete,
                        stage,
                        resource,
                        json!({ "reason": reason }),
                    )?;
                    Ok(StageOutcome::Incomplete(reason))
                }
                None => {
                    self.audit.log_event(
                        AuditEventType::StageFailed,
                        stage,
                        resource,
                        json!({ "error": format!("{:#}", e) }),
                    )?;
                    Err(e)
                }
            },
        }
    }
}

/// Reason text when `error` is a retryable pipeline error
fn incomplete_reason(error: &anyhow::Error) -> Option<String> {
    let pipeline_error = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())?;
    match pipeline_error {
        PipelineError::Incomplete { reason, .. } => Some(reason.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_reason_survives_context() {
        let err = anyhow::Error::from(PipelineError::incomplete("s", "callset not found"))
            .context("Failed to load");
        assert_eq!(incomplete_reason(&err).as_deref(), Some("callset not found"));

        let fatal = anyhow::Error::from(PipelineError::UnknownDataset("gnomad".to_string()))
            .context("Failed to refresh");
        assert_eq!(incomplete_reason(&fatal), None);
    }
}
