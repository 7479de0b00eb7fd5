// ==============================================================================
// callset.rs - In-Memory Callset (Batch) Model
// ==============================================================================
// Description: Variant rows with per-sample genotypes from one sequencing batch
// Author: Matt Barham
// Created: 2026-09-15
// Modified: 2026-10-08
// Version: 1.2.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::genotype_converter::Genotype;
use crate::models::{DatasetType, ReferenceGenome, VariantKey};

/// One variant row of a callset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsetRow {
    pub key: VariantKey,
    pub rsid: Option<String>,
    /// FILTER values; empty means PASS (or missing)
    pub filters: Vec<String>,
    /// INFO/AF when the callset provides it
    pub info_af: Option<f64>,
    /// Genotypes in `Callset::sample_ids` order
    pub genotypes: Vec<Genotype>,
}

impl CallsetRow {
    pub fn is_pass(&self) -> bool {
        self.filters.is_empty() || self.filters.iter().all(|f| f == "PASS")
    }

    /// Fraction of samples with a called genotype
    pub fn call_rate(&self) -> f64 {
        if self.genotypes.is_empty() {
            return 0.0;
        }
        let called = self.genotypes.iter().filter(|g| g.is_called()).count();
        called as f64 / self.genotypes.len() as f64
    }

    /// Alternate allele frequency computed from the called genotypes
    pub fn alt_allele_frequency(&self) -> Option<f64> {
        let mut alleles = 0u64;
        let mut alt = 0u64;
        for call in self.genotypes.iter().filter_map(|g| g.call) {
            alleles += call.ploidy as u64;
            alt += call.num_alt as u64;
        }
        if alleles == 0 {
            None
        } else {
            Some(alt as f64 / alleles as f64)
        }
    }

    /// INFO/AF when present, otherwise the frequency computed from calls
    pub fn allele_frequency(&self) -> Option<f64> {
        self.info_af.or_else(|| self.alt_allele_frequency())
    }

    fn has_non_ref_call(&self) -> bool {
        self.genotypes
            .iter()
            .any(|g| g.call.map(|c| c.num_alt > 0).unwrap_or(false))
    }
}

/// A sequencing batch: sample columns and variant rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callset {
    /// Path the callset was read from; used as the batch identifier
    pub path: String,
    pub sample_ids: Vec<String>,
    pub rows: Vec<CallsetRow>,
}

impl Callset {
    pub fn new(path: &str, sample_ids: Vec<String>, rows: Vec<CallsetRow>) -> Self {
        Self {
            path: path.to_string(),
            sample_ids,
            rows,
        }
    }

    pub fn keys(&self) -> BTreeSet<VariantKey> {
        self.rows.iter().map(|r| r.key.clone()).collect()
    }

    pub fn sample_set(&self) -> BTreeSet<String> {
        self.sample_ids.iter().cloned().collect()
    }

    /// Fail on contigs outside the reference genome (or outside the dataset
    /// type's contig set) and on multiallelic rows where biallelic is required
    pub fn validate(
        &self,
        reference_genome: ReferenceGenome,
        dataset_type: DatasetType,
    ) -> Result<()> {
        let mut multiallelic = Vec::new();
        for row in &self.rows {
            reference_genome.validate_contig(&row.key.contig)?;
            if !dataset_type.accepts_contig(reference_genome, &row.key.contig) {
                return Err(PipelineError::InvalidContig {
                    contig: row.key.contig.clone(),
                    reference_genome: format!("{} ({})", reference_genome, dataset_type),
                });
            }
            if dataset_type.requires_biallelic() && !row.key.is_biallelic() {
                multiallelic.push(row.key.variant_id());
            }
            if row.genotypes.len() != self.sample_ids.len() {
                return Err(PipelineError::MalformedRow {
                    source_name: self.path.clone(),
                    line: 0,
                    details: format!(
                        "{} has {} genotypes for {} samples",
                        row.key,
                        row.genotypes.len(),
                        self.sample_ids.len()
                    ),
                });
            }
        }

        if let Some(first) = multiallelic.first() {
            return Err(PipelineError::Multiallelic {
                count: multiallelic.len(),
                first: first.clone(),
            });
        }

        debug!("Callset {} validated: {} rows", self.path, self.rows.len());
        Ok(())
    }

    /// Rename sample columns; ids absent from `mapping` pass through unless
    /// `strict`, in which case they are a configuration error
    pub fn rename_samples(
        &self,
        mapping: &BTreeMap<String, String>,
        strict: bool,
    ) -> Result<Callset> {
        let mut sample_ids = Vec::with_capacity(self.sample_ids.len());
        for raw in &self.sample_ids {
            match mapping.get(raw) {
                Some(mapped) => sample_ids.push(mapped.clone()),
                None if strict => return Err(PipelineError::UnmappedSample(raw.clone())),
                None => sample_ids.push(raw.clone()),
            }
        }

        let unique: BTreeSet<&String> = sample_ids.iter().collect();
        if unique.len() != sample_ids.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "Remapping {} produced duplicate sample ids",
                self.path
            )));
        }

        Ok(Callset {
            path: self.path.clone(),
            sample_ids,
            rows: self.rows.clone(),
        })
    }

    /// Keep only the given samples, then drop rows where none of them carries
    /// a non-reference call
    ///
    /// Requested samples absent from the callset are an error unless
    /// `ignore_missing_samples` is set.
    pub fn subset_samples(
        &self,
        samples: &BTreeSet<String>,
        ignore_missing_samples: bool,
    ) -> Result<Callset> {
        let present = self.sample_set();
        let missing: Vec<String> = samples.difference(&present).cloned().collect();
        if !missing.is_empty() && !ignore_missing_samples {
            return Err(PipelineError::MissingSamples(missing));
        }

        let keep: Vec<usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .filter(|(_, s)| samples.contains(*s))
            .map(|(i, _)| i)
            .collect();

        let sample_ids: Vec<String> = keep.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let rows: Vec<CallsetRow> = self
            .rows
            .iter()
            .map(|row| CallsetRow {
                genotypes: keep.iter().map(|&i| row.genotypes[i].clone()).collect(),
                ..row.clone()
            })
            .filter(|row| row.has_non_ref_call())
            .collect();

        info!(
            "Subset {} to {} samples and {} variants (from {} samples, {} variants)",
            self.path,
            sample_ids.len(),
            rows.len(),
            self.sample_ids.len(),
            self.rows.len()
        );

        Ok(Callset {
            path: self.path.clone(),
            sample_ids,
            rows,
        })
    }
}
