// ==============================================================================
// models.rs - Variant Annotation Data Models
// ==============================================================================
// Description: Variant keys, reference genomes, dataset types and sex calls
// Author: Matt Barham
// Created: 2026-09-14
// Modified: 2026-10-09
// Version: 1.2.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, Result};

/// Reference genome build a table (and every callset loaded into it) uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceGenome {
    GRCh37,
    GRCh38,
}

/// Pseudoautosomal regions as 1-based inclusive (start, end) pairs
const GRCH37_X_PAR: [(u64, u64); 2] = [(60_001, 2_699_520), (154_931_044, 155_260_560)];
const GRCH37_Y_PAR: [(u64, u64); 2] = [(10_001, 2_649_520), (59_034_050, 59_363_566)];
const GRCH38_X_PAR: [(u64, u64); 2] = [(10_001, 2_781_479), (155_701_383, 156_030_895)];
const GRCH38_Y_PAR: [(u64, u64); 2] = [(10_001, 2_781_479), (56_887_903, 57_217_415)];

impl ReferenceGenome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceGenome::GRCh37 => "GRCh37",
            ReferenceGenome::GRCh38 => "GRCh38",
        }
    }

    fn contig_prefix(&self) -> &'static str {
        match self {
            ReferenceGenome::GRCh37 => "",
            ReferenceGenome::GRCh38 => "chr",
        }
    }

    /// Autosomal contig names (e.g., "chr1".."chr22" for GRCh38)
    pub fn autosomes(&self) -> Vec<String> {
        (1..=22)
            .map(|n| format!("{}{}", self.contig_prefix(), n))
            .collect()
    }

    pub fn x_contig(&self) -> String {
        format!("{}X", self.contig_prefix())
    }

    pub fn y_contig(&self) -> String {
        format!("{}Y", self.contig_prefix())
    }

    pub fn sex_chromosomes(&self) -> Vec<String> {
        vec![self.x_contig(), self.y_contig()]
    }

    pub fn mito_contig(&self) -> &'static str {
        match self {
            ReferenceGenome::GRCh37 => "MT",
            ReferenceGenome::GRCh38 => "chrM",
        }
    }

    /// Autosomes, sex chromosomes and the mitochondrial contig
    pub fn standard_contigs(&self) -> Vec<String> {
        let mut contigs = self.autosomes();
        contigs.extend(self.sex_chromosomes());
        contigs.push(self.mito_contig().to_string());
        contigs
    }

    /// Position of a contig in karyotype order (1-22, X=23, Y=24, M=25)
    pub fn contig_number(&self, contig: &str) -> Option<u64> {
        let bare = contig.strip_prefix(self.contig_prefix()).unwrap_or(contig);
        if contig == self.mito_contig() {
            return Some(25);
        }
        match bare {
            "X" => Some(23),
            "Y" => Some(24),
            _ => bare.parse::<u64>().ok().filter(|n| (1..=22).contains(n)),
        }
    }

    /// Fail unless `contig` is a standard contig of this build
    pub fn validate_contig(&self, contig: &str) -> Result<()> {
        if self.standard_contigs().iter().any(|c| c == contig) {
            Ok(())
        } else {
            Err(PipelineError::InvalidContig {
                contig: contig.to_string(),
                reference_genome: self.as_str().to_string(),
            })
        }
    }

    /// Sex-check contigs are restricted to autosomes and sex chromosomes
    pub fn validate_sex_check_contig(&self, contig: &str) -> Result<()> {
        let valid = self.autosomes().iter().any(|c| c == contig)
            || self.sex_chromosomes().iter().any(|c| c == contig);
        if valid {
            Ok(())
        } else {
            Err(PipelineError::InvalidContig {
                contig: contig.to_string(),
                reference_genome: self.as_str().to_string(),
            })
        }
    }

    pub fn in_x_nonpar(&self, contig: &str, position: u64) -> bool {
        let par = match self {
            ReferenceGenome::GRCh37 => &GRCH37_X_PAR,
            ReferenceGenome::GRCh38 => &GRCH38_X_PAR,
        };
        contig == self.x_contig() && !par.iter().any(|(s, e)| (*s..=*e).contains(&position))
    }

    pub fn in_y_nonpar(&self, contig: &str, position: u64) -> bool {
        let par = match self {
            ReferenceGenome::GRCh37 => &GRCH37_Y_PAR,
            ReferenceGenome::GRCh38 => &GRCH38_Y_PAR,
        };
        contig == self.y_contig() && !par.iter().any(|(s, e)| (*s..=*e).contains(&position))
    }
}

impl fmt::Display for ReferenceGenome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of variants a table holds; fixes the key schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetType {
    SnvIndel,
    Mito,
    Sv,
    Gcnv,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::SnvIndel => "SNV_INDEL",
            DatasetType::Mito => "MITO",
            DatasetType::Sv => "SV",
            DatasetType::Gcnv => "GCNV",
        }
    }

    /// Small-variant tables are keyed by (locus, [ref, alt]) and refuse
    /// multiallelic rows
    pub fn requires_biallelic(&self) -> bool {
        matches!(self, DatasetType::SnvIndel | DatasetType::Mito)
    }

    /// Structural variant keys carry an end-of-interval
    pub fn key_has_end(&self) -> bool {
        matches!(self, DatasetType::Sv | DatasetType::Gcnv)
    }

    /// Sex and relatedness QC only apply to nuclear small-variant callsets
    pub fn supports_sex_and_relatedness(&self) -> bool {
        matches!(self, DatasetType::SnvIndel)
    }

    /// Whether a contig belongs in a table of this type
    pub fn accepts_contig(&self, reference_genome: ReferenceGenome, contig: &str) -> bool {
        match self {
            DatasetType::Mito => contig == reference_genome.mito_contig(),
            _ => contig != reference_genome.mito_contig(),
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a reference dataset may be read without private-data access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessControl {
    #[default]
    Public,
    Private,
}

/// Sex as declared in a pedigree or derived from a ploidy call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
    Unknown,
}

impl Sex {
    /// Parse a pedigree sex code ("F", "M", "U", "1", "2", "female", ...)
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "f" | "female" | "2" => Some(Sex::Female),
            "m" | "male" | "1" => Some(Sex::Male),
            "u" | "unknown" | "0" | "" => Some(Sex::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Female => "F",
            Sex::Male => "M",
            Sex::Unknown => "U",
        }
    }
}

/// Chromosomal sex call produced by the sex classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ploidy {
    #[serde(rename = "ambiguous_sex")]
    Ambiguous,
    #[serde(rename = "sex_aneuploidy")]
    Aneuploidy,
    #[serde(rename = "XX")]
    Female,
    #[serde(rename = "XY")]
    Male,
}

impl Ploidy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ploidy::Ambiguous => "ambiguous_sex",
            Ploidy::Aneuploidy => "sex_aneuploidy",
            Ploidy::Female => "XX",
            Ploidy::Male => "XY",
        }
    }

    /// Sex comparable with a pedigree declaration
    pub fn as_sex(&self) -> Sex {
        match self {
            Ploidy::Female => Sex::Female,
            Ploidy::Male => Sex::Male,
            Ploidy::Ambiguous | Ploidy::Aneuploidy => Sex::Unknown,
        }
    }
}

/// Composite key identifying a variant row across every table
///
/// Ordering is contig, position, alleles, end, which keeps tables sorted in
/// a stable order regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub contig: String,
    pub position: u64,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

impl VariantKey {
    pub fn new(contig: &str, position: u64, ref_allele: &str, alt_allele: &str) -> Self {
        Self {
            contig: contig.to_string(),
            position,
            ref_allele: ref_allele.to_string(),
            alt_alleles: vec![alt_allele.to_string()],
            end: None,
        }
    }

    pub fn with_end(mut self, end: u64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn is_biallelic(&self) -> bool {
        self.alt_alleles.len() == 1
    }

    pub fn is_snp(&self) -> bool {
        self.is_biallelic() && self.ref_allele.len() == 1 && self.alt_alleles[0].len() == 1
    }

    /// Human readable id: "chr1-12345-A-G" (alts comma-joined, end appended)
    pub fn variant_id(&self) -> String {
        let mut id = format!(
            "{}-{}-{}-{}",
            self.contig,
            self.position,
            self.ref_allele,
            self.alt_alleles.join(",")
        );
        if let Some(end) = self.end {
            id.push_str(&format!("-{}", end));
        }
        id
    }

    /// Inverse of `variant_id`
    pub fn parse(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split('-').collect();
        if parts.len() != 4 && parts.len() != 5 {
            return None;
        }
        let position = parts[1].parse::<u64>().ok()?;
        let end = match parts.get(4) {
            Some(end) => Some(end.parse::<u64>().ok()?),
            None => None,
        };
        Some(Self {
            contig: parts[0].to_string(),
            position,
            ref_allele: parts[2].to_string(),
            alt_alleles: parts[3].split(',').map(|a| a.to_string()).collect(),
            end,
        })
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variant_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_contig() {
        assert!(ReferenceGenome::GRCh38.validate_contig("chr1").is_ok());
        assert!(ReferenceGenome::GRCh38.validate_contig("chrM").is_ok());
        assert!(ReferenceGenome::GRCh38.validate_contig("1").is_err());
        assert!(ReferenceGenome::GRCh37.validate_contig("X").is_ok());
        assert!(ReferenceGenome::GRCh37.validate_contig("chrX").is_err());

        assert!(ReferenceGenome::GRCh38
            .validate_sex_check_contig("chrM")
            .is_err());
        assert!(ReferenceGenome::GRCh38
            .validate_sex_check_contig("chr20")
            .is_ok());
    }

    #[test]
    fn test_contig_number() {
        let rg = ReferenceGenome::GRCh38;
        assert_eq!(rg.contig_number("chr1"), Some(1));
        assert_eq!(rg.contig_number("chrX"), Some(23));
        assert_eq!(rg.contig_number("chrY"), Some(24));
        assert_eq!(rg.contig_number("chrM"), Some(25));
        assert_eq!(rg.contig_number("chr23"), None);
        assert_eq!(ReferenceGenome::GRCh37.contig_number("MT"), Some(25));
    }

    #[test]
    fn test_nonpar_regions() {
        let rg = ReferenceGenome::GRCh38;
        assert!(!rg.in_x_nonpar("chrX", 20_000)); // PAR1
        assert!(rg.in_x_nonpar("chrX", 3_000_000));
        assert!(!rg.in_x_nonpar("chr1", 3_000_000));
        assert!(rg.in_y_nonpar("chrY", 3_000_000));
        assert!(!rg.in_y_nonpar("chrY", 57_000_000)); // PAR2
    }

    #[test]
    fn test_variant_key_ordering_and_id() {
        let a = VariantKey::new("chr1", 100, "A", "G");
        let b = VariantKey::new("chr1", 200, "A", "G");
        assert!(a < b);
        assert_eq!(a.variant_id(), "chr1-100-A-G");
        assert_eq!(VariantKey::parse("chr1-100-A-G"), Some(a.clone()));

        let sv = VariantKey::new("chr2", 5, "N", "<DEL>").with_end(900);
        assert_eq!(sv.variant_id(), "chr2-5-N-<DEL>-900");
        assert_eq!(VariantKey::parse(&sv.variant_id()), Some(sv));
    }

    #[test]
    fn test_ploidy_to_sex() {
        assert_eq!(Ploidy::Female.as_sex(), Sex::Female);
        assert_eq!(Ploidy::Aneuploidy.as_sex(), Sex::Unknown);
        assert_eq!(Sex::from_code("F"), Some(Sex::Female));
        assert_eq!(Sex::from_code("1"), Some(Sex::Male));
        assert_eq!(Sex::from_code("?"), None);
    }

    #[test]
    fn test_dataset_type_serde() {
        let json = serde_json::to_string(&DatasetType::SnvIndel).unwrap();
        assert_eq!(json, "\"SNV_INDEL\"");
        let parsed: DatasetType = serde_json::from_str("\"GCNV\"").unwrap();
        assert_eq!(parsed, DatasetType::Gcnv);
        assert!(DatasetType::Mito.accepts_contig(ReferenceGenome::GRCh38, "chrM"));
        assert!(!DatasetType::SnvIndel.accepts_contig(ReferenceGenome::GRCh38, "chrM"));
    }
}
