// ==============================================================================
// sex_check.rs - Chromosomal Sex Classifier
// ==============================================================================
// Description: X-chromosome inbreeding coefficient, sex-chromosome coverage
//              and the ordered decision table that turns them into a call
// Author: Matt Barham
// Created: 2026-09-22
// Modified: 2026-10-13
// Version: 1.1.0
// ==============================================================================
// Algorithm:
//   Sites: chrX non-PAR, biallelic SNV, PASS, p = AAF in (aaf, 1 - aaf)
//   Per sample over called sites:
//     N = called sites, O = observed homozygotes
//     E = sum(1 - 2p(1 - p))
//     F = (O - E) / (N - E)
//   F >= xy threshold -> male, F <= xx threshold -> female, else undefined
//
//   Coverage (optional): mean DP per sample on the normalization contig,
//   chrX non-PAR and chrY non-PAR over sites with call rate above the
//   threshold and AF above 0.01; X and Y are divided by the normalization
//   mean when it is positive.
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::callset::{Callset, CallsetRow};
use crate::error::{PipelineError, Result};
use crate::models::{Ploidy, ReferenceGenome};

pub const XY_FSTAT_THRESHOLD: f64 = 0.75;
pub const XX_FSTAT_THRESHOLD: f64 = 0.5;
pub const AAF_THRESHOLD: f64 = 0.05;
pub const CHR_Y_COV_THRESHOLD: f64 = 0.1;
pub const CALL_RATE_THRESHOLD: f64 = 0.25;
pub const COVERAGE_AF_THRESHOLD: f64 = 0.01;

/// Classifier thresholds and coverage options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SexCheckSettings {
    pub xy_fstat_threshold: f64,
    pub xx_fstat_threshold: f64,
    pub aaf_threshold: f64,
    /// Use normalized chrY coverage to call sex aneuploidies
    pub use_chr_y_cov: bool,
    pub chr_y_cov_threshold: f64,
    /// Defaults to chromosome 20 of the reference genome
    pub normalization_contig: Option<String>,
    pub call_rate_threshold: f64,
    pub af_threshold: f64,
}

impl Default for SexCheckSettings {
    fn default() -> Self {
        Self {
            xy_fstat_threshold: XY_FSTAT_THRESHOLD,
            xx_fstat_threshold: XX_FSTAT_THRESHOLD,
            aaf_threshold: AAF_THRESHOLD,
            use_chr_y_cov: false,
            chr_y_cov_threshold: CHR_Y_COV_THRESHOLD,
            normalization_contig: None,
            call_rate_threshold: CALL_RATE_THRESHOLD,
            af_threshold: COVERAGE_AF_THRESHOLD,
        }
    }
}

impl SexCheckSettings {
    pub fn normalization_contig(&self, reference_genome: ReferenceGenome) -> String {
        self.normalization_contig
            .clone()
            .unwrap_or_else(|| reference_genome.autosomes()[19].clone())
    }

    /// Reject thresholds under which the classifier cannot behave
    pub fn validate(&self, reference_genome: ReferenceGenome) -> Result<()> {
        let values = [
            ("xy_fstat_threshold", self.xy_fstat_threshold),
            ("xx_fstat_threshold", self.xx_fstat_threshold),
            ("aaf_threshold", self.aaf_threshold),
            ("chr_y_cov_threshold", self.chr_y_cov_threshold),
            ("call_rate_threshold", self.call_rate_threshold),
            ("af_threshold", self.af_threshold),
        ];
        for (name, value) in values {
            if !value.is_finite() {
                return Err(PipelineError::InvalidThresholds(format!(
                    "{} is not finite ({})",
                    name, value
                )));
            }
        }
        if self.xy_fstat_threshold < self.xx_fstat_threshold {
            return Err(PipelineError::InvalidThresholds(format!(
                "XY threshold {} is below XX threshold {}",
                self.xy_fstat_threshold, self.xx_fstat_threshold
            )));
        }
        if self.xy_fstat_threshold > 1.0 {
            return Err(PipelineError::InvalidThresholds(format!(
                "XY threshold {} exceeds the maximum F-statistic of 1",
                self.xy_fstat_threshold
            )));
        }
        if !(0.0..0.5).contains(&self.aaf_threshold) {
            return Err(PipelineError::InvalidThresholds(format!(
                "Allele frequency threshold {} must lie in [0, 0.5)",
                self.aaf_threshold
            )));
        }
        reference_genome.validate_sex_check_contig(&self.normalization_contig(reference_genome))
    }
}

/// Inputs the decision table reads
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SexStatistics {
    pub is_female: Option<bool>,
    pub normalized_y_coverage: Option<f64>,
}

/// Per-sample classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SexCallResult {
    pub sample_id: String,
    pub is_female: Option<bool>,
    pub f_stat: Option<f64>,
    pub n_called: u64,
    pub expected_homs: f64,
    pub observed_homs: u64,
    pub normalization_mean_dp: Option<f64>,
    pub chr_x_mean_dp: Option<f64>,
    pub chr_y_mean_dp: Option<f64>,
    pub normalized_x_coverage: Option<f64>,
    pub normalized_y_coverage: Option<f64>,
    pub sex: Ploidy,
}

impl SexCallResult {
    pub fn statistics(&self) -> SexStatistics {
        SexStatistics {
            is_female: self.is_female,
            normalized_y_coverage: self.normalized_y_coverage,
        }
    }
}

type Guard = fn(&SexStatistics, bool, f64) -> bool;

fn undefined(stats: &SexStatistics, _: bool, _: f64) -> bool {
    stats.is_female.is_none()
}

fn female_with_y(stats: &SexStatistics, override_on: bool, threshold: f64) -> bool {
    stats.is_female == Some(true)
        && override_on
        && stats.normalized_y_coverage.map(|y| y > threshold).unwrap_or(false)
}

fn female(stats: &SexStatistics, _: bool, _: f64) -> bool {
    stats.is_female == Some(true)
}

fn male_without_y(stats: &SexStatistics, override_on: bool, threshold: f64) -> bool {
    stats.is_female == Some(false)
        && override_on
        && stats.normalized_y_coverage.map(|y| y < threshold).unwrap_or(false)
}

/// First matching guard wins; no match is `Male`
pub const DECISION_TABLE: &[(Guard, Ploidy)] = &[
    (undefined, Ploidy::Ambiguous),
    (female_with_y, Ploidy::Aneuploidy),
    (female, Ploidy::Female),
    (male_without_y, Ploidy::Aneuploidy),
];

pub fn classify(stats: &SexStatistics, use_coverage_override: bool, coverage_threshold: f64) -> Ploidy {
    DECISION_TABLE
        .iter()
        .find(|(guard, _)| guard(stats, use_coverage_override, coverage_threshold))
        .map(|(_, ploidy)| *ploidy)
        .unwrap_or(Ploidy::Male)
}

/// F-statistic estimate for one sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImputedSex {
    pub is_female: Option<bool>,
    pub f_stat: Option<f64>,
    pub n_called: u64,
    pub expected_homs: f64,
    pub observed_homs: u64,
}

/// X-chromosome inbreeding coefficient per sample, in sample order
pub fn impute_sex(
    callset: &Callset,
    reference_genome: ReferenceGenome,
    settings: &SexCheckSettings,
) -> Vec<ImputedSex> {
    let mut imputed = vec![ImputedSex::default(); callset.sample_ids.len()];
    let mut sites = 0usize;

    for row in callset.rows.iter().filter(|r| sex_check_site(r)) {
        if !reference_genome.in_x_nonpar(&row.key.contig, row.key.position) {
            continue;
        }
        let p = match row.alt_allele_frequency() {
            Some(p) if p > settings.aaf_threshold && p < 1.0 - settings.aaf_threshold => p,
            _ => continue,
        };
        sites += 1;
        let expected = 1.0 - 2.0 * p * (1.0 - p);
        for (sample, genotype) in imputed.iter_mut().zip(row.genotypes.iter()) {
            if let Some(call) = genotype.call {
                sample.n_called += 1;
                sample.expected_homs += expected;
                if call.is_hom_ref() || call.is_hom_var() {
                    sample.observed_homs += 1;
                }
            }
        }
    }

    for sample in imputed.iter_mut() {
        let denominator = sample.n_called as f64 - sample.expected_homs;
        if sample.n_called == 0 || denominator == 0.0 {
            continue;
        }
        let f = (sample.observed_homs as f64 - sample.expected_homs) / denominator;
        sample.f_stat = Some(f);
        sample.is_female = if f >= settings.xy_fstat_threshold {
            Some(false)
        } else if f <= settings.xx_fstat_threshold {
            Some(true)
        } else {
            None
        };
    }

    debug!("Imputed sex over {} chrX sites", sites);
    imputed
}

/// Biallelic PASS SNV
fn sex_check_site(row: &CallsetRow) -> bool {
    row.key.is_snp() && row.is_pass()
}

/// Mean depth per sample over the qualifying sites of one contig
fn contig_mean_dp(
    callset: &Callset,
    reference_genome: ReferenceGenome,
    contig: &str,
    settings: &SexCheckSettings,
) -> Result<Vec<Option<f64>>> {
    reference_genome.validate_sex_check_contig(contig)?;
    let x = reference_genome.x_contig();
    let y = reference_genome.y_contig();

    let mut sums = vec![(0u64, 0u64); callset.sample_ids.len()];
    for row in callset.rows.iter().filter(|r| r.key.contig == contig) {
        if !sex_check_site(row) {
            continue;
        }
        if contig == x && !reference_genome.in_x_nonpar(contig, row.key.position) {
            continue;
        }
        if contig == y && !reference_genome.in_y_nonpar(contig, row.key.position) {
            continue;
        }
        let common = row
            .allele_frequency()
            .map(|af| af > settings.af_threshold)
            .unwrap_or(false);
        if row.call_rate() <= settings.call_rate_threshold || !common {
            continue;
        }
        for (sum, genotype) in sums.iter_mut().zip(row.genotypes.iter()) {
            if let Some(dp) = genotype.coverage_depth() {
                sum.0 += dp as u64;
                sum.1 += 1;
            }
        }
    }

    Ok(sums
        .into_iter()
        .map(|(total, n)| if n == 0 { None } else { Some(total as f64 / n as f64) })
        .collect())
}

fn normalize(value: Option<f64>, by: Option<f64>) -> Option<f64> {
    match (value, by) {
        (Some(v), Some(n)) if n > 0.0 => Some(v / n),
        _ => None,
    }
}

/// Classify every sample of a callset
pub fn call_sex(
    callset: &Callset,
    reference_genome: ReferenceGenome,
    settings: &SexCheckSettings,
) -> Result<BTreeMap<String, SexCallResult>> {
    settings.validate(reference_genome)?;

    let imputed = impute_sex(callset, reference_genome, settings);
    let n = callset.sample_ids.len();
    let (norm_dp, x_dp, y_dp) = if settings.use_chr_y_cov {
        (
            contig_mean_dp(
                callset,
                reference_genome,
                &settings.normalization_contig(reference_genome),
                settings,
            )?,
            contig_mean_dp(callset, reference_genome, &reference_genome.x_contig(), settings)?,
            contig_mean_dp(callset, reference_genome, &reference_genome.y_contig(), settings)?,
        )
    } else {
        (vec![None; n], vec![None; n], vec![None; n])
    };

    let mut results = BTreeMap::new();
    for (i, sample_id) in callset.sample_ids.iter().enumerate() {
        let estimate = imputed[i];
        let mut result = SexCallResult {
            sample_id: sample_id.clone(),
            is_female: estimate.is_female,
            f_stat: estimate.f_stat,
            n_called: estimate.n_called,
            expected_homs: estimate.expected_homs,
            observed_homs: estimate.observed_homs,
            normalization_mean_dp: norm_dp[i],
            chr_x_mean_dp: x_dp[i],
            chr_y_mean_dp: y_dp[i],
            normalized_x_coverage: normalize(x_dp[i], norm_dp[i]),
            normalized_y_coverage: normalize(y_dp[i], norm_dp[i]),
            sex: Ploidy::Ambiguous,
        };
        result.sex = classify(
            &result.statistics(),
            settings.use_chr_y_cov,
            settings.chr_y_cov_threshold,
        );
        results.insert(sample_id.clone(), result);
    }

    info!(
        "Called sex for {} samples in {}",
        results.len(),
        callset.path
    );
    Ok(results)
}
