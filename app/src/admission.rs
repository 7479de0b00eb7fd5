// ==============================================================================
// admission.rs - Sample Admission Pipeline
// ==============================================================================
// Description: Remaps batch sample ids, groups the pedigree into families and
//              admits only families that pass every QC gate
// Author: Matt Barham
// Created: 2026-09-25
// Modified: 2026-10-14
// Version: 1.1.0
// ==============================================================================
// Gates (each computed against every family, results unioned):
//   1. missing samples   any member absent from the batch
//   2. sex check         a member's declared sex differs from its call
//   3. relatedness       a member appears in a flagged pair
// Gates 2 and 3 only run when QC checks are enabled.
// ==============================================================================

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::callset::Callset;
use crate::error::Result;
use crate::models::{ReferenceGenome, Sex};
use crate::parsers::Pedigree;
use crate::relatedness::RelatednessCheck;
use crate::sex_check::{call_sex, SexCallResult, SexCheckSettings};

/// Collaborators for the optional QC gates
pub struct QcChecks<'a> {
    pub reference_genome: ReferenceGenome,
    pub settings: &'a SexCheckSettings,
    pub relatedness: &'a dyn RelatednessCheck,
}

/// Family ids excluded by each gate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExclusionReport {
    pub families_missing_samples: BTreeSet<String>,
    pub families_failed_sex_check: BTreeSet<String>,
    pub families_failed_relatedness_check: BTreeSet<String>,
}

impl ExclusionReport {
    pub fn excluded_families(&self) -> BTreeSet<String> {
        self.families_missing_samples
            .iter()
            .chain(&self.families_failed_sex_check)
            .chain(&self.families_failed_relatedness_check)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.families_missing_samples.is_empty()
            && self.families_failed_sex_check.is_empty()
            && self.families_failed_relatedness_check.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Admission {
    /// Batch with canonical sample ids (not yet subset)
    pub callset: Callset,
    pub admitted: BTreeSet<String>,
    /// Empty when QC checks are disabled
    pub sex_calls: BTreeMap<String, SexCallResult>,
    pub report: ExclusionReport,
}

/// Run the admission gates for one batch and pedigree
///
/// Remap ids absent from `remap` pass through unchanged unless
/// `strict_remap` is set.
pub fn admit(
    batch: &Callset,
    pedigree: &Pedigree,
    remap: Option<&BTreeMap<String, String>>,
    strict_remap: bool,
    checks: Option<&QcChecks<'_>>,
) -> Result<Admission> {
    let callset = match remap {
        Some(mapping) => batch.rename_samples(mapping, strict_remap)?,
        None => batch.clone(),
    };
    let present = callset.sample_set();

    let mut report = ExclusionReport::default();
    for family in pedigree.families.values() {
        let missing = family.missing_from(&present);
        if !missing.is_empty() {
            warn!(
                "Family {} missing samples {:?}",
                family.family_guid, missing
            );
            report
                .families_missing_samples
                .insert(family.family_guid.clone());
        }
    }

    let mut sex_calls = BTreeMap::new();
    if let Some(checks) = checks {
        sex_calls = call_sex(&callset, checks.reference_genome, checks.settings)?;
        report.families_failed_sex_check = failed_sex_check(pedigree, &sex_calls);

        let flagged: BTreeSet<String> = checks
            .relatedness
            .failing_pairs(&callset)?
            .into_iter()
            .flat_map(|(a, b)| [a, b])
            .collect();
        report.families_failed_relatedness_check = pedigree
            .families
            .values()
            .filter(|f| f.samples.keys().any(|id| flagged.contains(id)))
            .map(|f| f.family_guid.clone())
            .collect();
    }

    let excluded = report.excluded_families();
    let admitted: BTreeSet<String> = pedigree
        .families
        .values()
        .filter(|f| !excluded.contains(&f.family_guid))
        .flat_map(|f| f.samples.keys().cloned())
        .collect();

    info!(
        "Admitted {} samples from {} of {} families ({} missing samples, {} failed sex check, {} failed relatedness check)",
        admitted.len(),
        pedigree.families.len() - excluded.len(),
        pedigree.families.len(),
        report.families_missing_samples.len(),
        report.families_failed_sex_check.len(),
        report.families_failed_relatedness_check.len()
    );

    Ok(Admission {
        callset,
        admitted,
        sex_calls,
        report,
    })
}

/// Families with a member whose declared sex disagrees with its call
///
/// Members declared unknown, or without a call, are not compared.
fn failed_sex_check(
    pedigree: &Pedigree,
    sex_calls: &BTreeMap<String, SexCallResult>,
) -> BTreeSet<String> {
    pedigree
        .families
        .values()
        .filter(|family| {
            family.samples.values().any(|sample| {
                if sample.sex == Sex::Unknown {
                    return false;
                }
                match sex_calls.get(&sample.sample_id) {
                    Some(call) => call.sex.as_sex() != sample.sex,
                    None => false,
                }
            })
        })
        .map(|family| family.family_guid.clone())
        .collect()
}
