// ==============================================================================
// lookup.rs - Sample Lookup Table and Allele Counts
// ==============================================================================
// Description: Per-variant, per-project genotype sample sets and the gt_stats
//              allele counts derived from them
// Author: Matt Barham
// Created: 2026-09-19
// Modified: 2026-10-19
// Version: 1.1.0
// ==============================================================================
// Algorithm:
//   For each variant, sum over projects:
//     AN  = 2 * (|ref| + |het| + |hom|)
//     AC  = |het| + 2 * |hom|
//     AF  = AC / AN   (0 when AN = 0)
//     hom = |hom|
// ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::callset::Callset;
use crate::models::VariantKey;

/// Samples of one project grouped by genotype at one variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCalls {
    pub ref_samples: BTreeSet<String>,
    pub het_samples: BTreeSet<String>,
    pub hom_samples: BTreeSet<String>,
}

/// Allele counts across all loaded projects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GtStats {
    #[serde(rename = "AC")]
    pub ac: u64,
    #[serde(rename = "AN")]
    pub an: u64,
    #[serde(rename = "AF")]
    pub af: f64,
    pub hom: u64,
}

impl GtStats {
    pub fn to_value(&self) -> Value {
        json!({ "AC": self.ac, "AN": self.an, "AF": self.af, "hom": self.hom })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLookupTable {
    rows: BTreeMap<VariantKey, BTreeMap<String, ProjectCalls>>,
}

impl SampleLookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: BTreeMap<VariantKey, BTreeMap<String, ProjectCalls>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &BTreeMap<VariantKey, BTreeMap<String, ProjectCalls>> {
        &self.rows
    }

    pub fn project_calls(&self, key: &VariantKey, project_guid: &str) -> Option<&ProjectCalls> {
        self.rows.get(key)?.get(project_guid)
    }

    /// Replace `project_guid`'s sample sets for every variant in `callset`
    ///
    /// Uncalled genotypes contribute to no set; a haploid ALT call counts as
    /// hom-var.
    pub fn with_project(&self, project_guid: &str, callset: &Callset) -> Self {
        let mut rows = self.rows.clone();
        for row in &callset.rows {
            let mut calls = ProjectCalls::default();
            for (sample_id, genotype) in callset.sample_ids.iter().zip(&row.genotypes) {
                let Some(call) = genotype.call else {
                    continue;
                };
                let samples = if call.is_hom_ref() {
                    &mut calls.ref_samples
                } else if call.is_het() {
                    &mut calls.het_samples
                } else if call.is_hom_var() {
                    &mut calls.hom_samples
                } else {
                    continue;
                };
                samples.insert(sample_id.clone());
            }
            rows.entry(row.key.clone())
                .or_default()
                .insert(project_guid.to_string(), calls);
        }
        debug!(
            "Loaded {} variants for project {} into the sample lookup",
            callset.rows.len(),
            project_guid
        );
        Self { rows }
    }

    pub fn gt_stats(&self, key: &VariantKey) -> GtStats {
        let (mut n_ref, mut n_het, mut n_hom) = (0u64, 0u64, 0u64);
        if let Some(projects) = self.rows.get(key) {
            for calls in projects.values() {
                n_ref += calls.ref_samples.len() as u64;
                n_het += calls.het_samples.len() as u64;
                n_hom += calls.hom_samples.len() as u64;
            }
        }
        let an = 2 * (n_ref + n_het + n_hom);
        let ac = n_het + 2 * n_hom;
        GtStats {
            ac,
            an,
            af: if an == 0 { 0.0 } else { ac as f64 / an as f64 },
            hom: n_hom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callset::tests::{callset, row};

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allele_counts() {
        let key = VariantKey::new("chr1", 1, "A", "G");
        let mut projects = BTreeMap::new();
        projects.insert(
            "R0001".to_string(),
            ProjectCalls {
                ref_samples: set(&["a", "c"]),
                het_samples: set(&["b", "d"]),
                hom_samples: set(&["e", "f"]),
            },
        );
        let lookup = SampleLookupTable::from_rows([(key.clone(), projects)].into_iter().collect());

        let stats = lookup.gt_stats(&key);
        assert_eq!(stats.ac, 6);
        assert_eq!(stats.an, 12);
        assert_eq!(stats.af, 0.5);
        assert_eq!(stats.hom, 2);
    }

    #[test]
    fn test_unknown_variant_has_zero_counts() {
        let stats = SampleLookupTable::new().gt_stats(&VariantKey::new("chr1", 9, "A", "G"));
        assert_eq!(stats.an, 0);
        assert_eq!(stats.af, 0.0);
    }

    #[test]
    fn test_reloading_project_replaces_its_sets() {
        let first = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "1/1"])]);
        let second = callset(&["a", "b"], vec![row("chr1", 1, &["0/0", "./."])]);
        let other = callset(&["z"], vec![row("chr1", 1, &["0/1"])]);
        let key = VariantKey::new("chr1", 1, "A", "G");

        let lookup = SampleLookupTable::new()
            .with_project("R0001", &first)
            .with_project("R0002", &other);
        assert_eq!(lookup.gt_stats(&key).ac, 4);

        let reloaded = lookup.with_project("R0001", &second);
        let calls = reloaded.project_calls(&key, "R0001").unwrap();
        assert_eq!(calls.ref_samples, set(&["a"]));
        assert!(calls.het_samples.is_empty());
        assert_eq!(reloaded.gt_stats(&key).ac, 1);
        assert_eq!(reloaded.gt_stats(&key).an, 4);
    }

    #[test]
    fn test_haploid_alt_call_is_hom_var() {
        let haploid = callset(&["m", "f"], vec![row("chrX", 5_000_000, &["1", "0/1"])]);
        let key = VariantKey::new("chrX", 5_000_000, "A", "G");

        let lookup = SampleLookupTable::new().with_project("R0001", &haploid);
        let calls = lookup.project_calls(&key, "R0001").unwrap();
        assert_eq!(calls.hom_samples, set(&["m"]));
        assert_eq!(calls.het_samples, set(&["f"]));

        let stats = lookup.gt_stats(&key);
        assert_eq!(stats.hom, 1);
        assert_eq!(stats.ac, 3);
        assert_eq!(stats.an, 4);
    }
}
