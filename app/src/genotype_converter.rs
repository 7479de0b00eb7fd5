// ==============================================================================
// genotype_converter.rs - Genotype Call Conversion
// ==============================================================================
// Description: Converts VCF genotype calls into per-sample entry fields
// Author: Matt Barham
// Created: 2026-09-15
// Modified: 2026-10-01
// Version: 1.1.0
// ==============================================================================
// Algorithm:
//   Given a GT string and optional AD/GQ/DP values:
//   - 0/0, 0|0        → num_alt 0 (homozygous reference)
//   - 0/1, 1|0        → num_alt 1 (heterozygous)
//   - 1/1             → num_alt 2 (homozygous alternate)
//   - ./., .          → no call (num_alt -1, gq 0, ab/dp missing)
//   Depth is the sum of allele depths, clipped at 32000.
// ==============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum depth reported for a genotype
pub const MAX_DEPTH: u32 = 32000;

/// Errors that can occur during genotype conversion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenotypeConversionError {
    #[error("Invalid genotype format: '{0}'")]
    InvalidFormat(String),

    #[error("Invalid allele index in genotype '{0}'")]
    InvalidAllele(String),

    #[error("Invalid numeric value '{value}' for {field}")]
    InvalidNumber { field: String, value: String },
}

/// A called genotype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Number of non-reference alleles in the call
    pub num_alt: u8,
    /// Number of alleles in the call (2 for diploid, 1 for haploid)
    pub ploidy: u8,
    pub phased: bool,
}

impl Call {
    pub fn is_hom_ref(&self) -> bool {
        self.num_alt == 0
    }

    pub fn is_het(&self) -> bool {
        self.num_alt > 0 && self.num_alt < self.ploidy
    }

    pub fn is_hom_var(&self) -> bool {
        self.num_alt > 0 && self.num_alt == self.ploidy
    }
}

/// Per-sample genotype as read from a callset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    pub call: Option<Call>,
    /// Allele depths (REF first); None when the field is absent or "."
    pub ad: Option<Vec<u32>>,
    pub gq: Option<u32>,
    pub dp: Option<u32>,
}

/// Entry fields stored per sample for a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenotypeEntry {
    pub sample_id: String,
    pub num_alt: i32,
    pub gq: Option<u32>,
    pub ab: Option<f64>,
    pub dp: Option<u32>,
}

impl Genotype {
    pub fn no_call() -> Self {
        Self::default()
    }

    pub fn is_called(&self) -> bool {
        self.call.is_some()
    }

    /// Alternate allele count, -1 when uncalled
    pub fn num_alt(&self) -> i32 {
        self.call.map(|c| c.num_alt as i32).unwrap_or(-1)
    }

    /// Genotype quality, 0 when uncalled
    pub fn gq(&self) -> Option<u32> {
        if self.is_called() {
            self.gq
        } else {
            Some(0)
        }
    }

    /// Allele balance: AD[1] / sum(AD) for called genotypes with usable AD
    pub fn ab(&self) -> Option<f64> {
        if !self.is_called() {
            return None;
        }
        let ad = self.ad.as_ref()?;
        let total: u64 = ad.iter().map(|&d| d as u64).sum();
        if total == 0 || ad.len() <= 1 {
            return None;
        }
        Some(ad[1] as f64 / total as f64)
    }

    /// Depth from allele depths, clipped to `MAX_DEPTH`
    pub fn dp(&self) -> Option<u32> {
        if !self.is_called() {
            return None;
        }
        let ad = self.ad.as_ref()?;
        let total: u64 = ad.iter().map(|&d| d as u64).sum();
        Some(total.min(MAX_DEPTH as u64) as u32)
    }

    /// Depth used for coverage estimates: FORMAT/DP when present, else AD sum
    pub fn coverage_depth(&self) -> Option<u32> {
        self.dp.or_else(|| self.dp())
    }

    pub fn entry(&self, sample_id: &str) -> GenotypeEntry {
        GenotypeEntry {
            sample_id: sample_id.to_string(),
            num_alt: self.num_alt(),
            gq: self.gq(),
            ab: self.ab(),
            dp: self.dp(),
        }
    }
}

/// Parse a GT string into a call
///
/// # Returns
/// * `Ok(Some(call))` - Called genotype
/// * `Ok(None)` - No call ("./.", ".", ".|.")
/// * `Err(GenotypeConversionError)` - Unparseable genotype
///
/// # Examples
/// ```
/// use annotation_loader::genotype_converter::parse_call;
///
/// assert_eq!(parse_call("0/1").unwrap().unwrap().num_alt, 1);
/// assert_eq!(parse_call("1|1").unwrap().unwrap().num_alt, 2);
/// assert!(parse_call("./.").unwrap().is_none());
/// ```
pub fn parse_call(gt: &str) -> Result<Option<Call>, GenotypeConversionError> {
    let gt = gt.trim();
    if gt.is_empty() {
        return Err(GenotypeConversionError::InvalidFormat(gt.to_string()));
    }

    let phased = gt.contains('|');
    let alleles: Vec<&str> = gt.split(['/', '|']).collect();
    if alleles.len() > 2 {
        return Err(GenotypeConversionError::InvalidFormat(gt.to_string()));
    }

    // Any missing allele makes the whole call missing
    if alleles.iter().any(|a| *a == ".") {
        return Ok(None);
    }

    let mut num_alt = 0u8;
    for allele in &alleles {
        let index = allele
            .parse::<u32>()
            .map_err(|_| GenotypeConversionError::InvalidAllele(gt.to_string()))?;
        if index > 0 {
            num_alt += 1;
        }
    }

    Ok(Some(Call {
        num_alt,
        ploidy: alleles.len() as u8,
        phased,
    }))
}

/// Parse a comma separated AD value ("12,7"); "." means missing
pub fn parse_allele_depths(ad: &str) -> Result<Option<Vec<u32>>, GenotypeConversionError> {
    if ad == "." || ad.is_empty() {
        return Ok(None);
    }
    let mut depths = Vec::new();
    for value in ad.split(',') {
        if value == "." {
            return Ok(None);
        }
        let depth = value
            .parse::<u32>()
            .map_err(|_| GenotypeConversionError::InvalidNumber {
                field: "AD".to_string(),
                value: ad.to_string(),
            })?;
        depths.push(depth);
    }
    Ok(Some(depths))
}

/// Parse a scalar integer FORMAT value; "." means missing
pub fn parse_optional_u32(field: &str, value: &str) -> Result<Option<u32>, GenotypeConversionError> {
    if value == "." || value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|_| GenotypeConversionError::InvalidNumber {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// Build a genotype from a FORMAT key list and one sample column
///
/// Trailing FORMAT fields may be dropped (VCFv4.x); they are treated as missing.
pub fn genotype_from_sample(
    format_keys: &[&str],
    sample: &str,
) -> Result<Genotype, GenotypeConversionError> {
    let values: Vec<&str> = sample.split(':').collect();
    let value_of = |key: &str| -> Option<&str> {
        format_keys
            .iter()
            .position(|k| *k == key)
            .and_then(|i| values.get(i).copied())
    };

    let call = match value_of("GT") {
        Some(gt) => parse_call(gt)?,
        None => None,
    };
    let ad = match value_of("AD") {
        Some(ad) => parse_allele_depths(ad)?,
        None => None,
    };
    let gq = match value_of("GQ") {
        Some(gq) => parse_optional_u32("GQ", gq)?,
        None => None,
    };
    let dp = match value_of("DP") {
        Some(dp) => parse_optional_u32("DP", dp)?,
        None => None,
    };

    Ok(Genotype { call, ad, gq, dp })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn called(gt: &str, ad: Option<Vec<u32>>) -> Genotype {
        Genotype {
            call: parse_call(gt).unwrap(),
            ad,
            gq: Some(99),
            dp: None,
        }
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(parse_call("0/0").unwrap().unwrap().num_alt, 0);
        assert_eq!(parse_call("1|0").unwrap().unwrap().num_alt, 1);
        assert!(parse_call("1|0").unwrap().unwrap().phased);
        assert_eq!(parse_call("1/1").unwrap().unwrap().num_alt, 2);
        assert!(parse_call("1/1").unwrap().unwrap().is_hom_var());
        assert!(parse_call("0/1").unwrap().unwrap().is_het());
        assert_eq!(parse_call("1").unwrap().unwrap().ploidy, 1);
        assert!(parse_call("./.").unwrap().is_none());
        assert!(parse_call(".").unwrap().is_none());
        assert!(parse_call("0/.").unwrap().is_none());

        assert!(parse_call("A/T").is_err());
        assert!(parse_call("0/1/1").is_err());
    }

    #[test]
    fn test_depth_is_clipped() {
        let gt = called("0/1", Some(vec![20000, 20000]));
        assert_eq!(gt.dp(), Some(MAX_DEPTH));

        let gt = called("0/1", Some(vec![12, 7]));
        assert_eq!(gt.dp(), Some(19));
    }

    #[test]
    fn test_depth_missing_when_uncalled_or_no_ad() {
        let uncalled = Genotype {
            call: None,
            ad: Some(vec![10, 10]),
            gq: Some(30),
            dp: Some(20),
        };
        assert_eq!(uncalled.dp(), None);
        assert_eq!(uncalled.gq(), Some(0));
        assert_eq!(uncalled.num_alt(), -1);

        let no_ad = called("0/1", None);
        assert_eq!(no_ad.dp(), None);
        assert_eq!(no_ad.ab(), None);
    }

    #[test]
    fn test_allele_balance() {
        let gt = called("0/1", Some(vec![6, 2]));
        assert_eq!(gt.ab(), Some(0.25));

        let zero = called("0/1", Some(vec![0, 0]));
        assert_eq!(zero.ab(), None);

        let single = called("0/0", Some(vec![10]));
        assert_eq!(single.ab(), None);
    }

    #[test]
    fn test_genotype_from_sample() {
        let keys = ["GT", "AD", "DP", "GQ"];
        let gt = genotype_from_sample(&keys, "0/1:12,7:19:99").unwrap();
        assert_eq!(gt.num_alt(), 1);
        assert_eq!(gt.ad, Some(vec![12, 7]));
        assert_eq!(gt.gq, Some(99));
        assert_eq!(gt.dp, Some(19));

        // Trailing fields dropped
        let gt = genotype_from_sample(&keys, "./.").unwrap();
        assert!(!gt.is_called());
        assert_eq!(gt.ad, None);

        assert!(genotype_from_sample(&keys, "0/1:x,7:19:99").is_err());
    }
}
