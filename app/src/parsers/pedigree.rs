// ==============================================================================
// parsers/pedigree.rs - Project Pedigree Parser
// ==============================================================================
// Description: Parses tab-separated pedigree files into families of samples
// Author: Matt Barham
// Created: 2026-09-16
// Modified: 2026-10-04
// Version: 1.1.0
// ==============================================================================
// Format: TSV file with header
// Example:
//   Project_GUID  Family_GUID  Individual_ID  Paternal_ID  Maternal_ID  Sex
//   R0001_test    F000001_1    HG00731        HG00732      HG00733      F
//   R0001_test    F000001_1    HG00732                                  M
// ==============================================================================

use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::models::Sex;

/// Errors that can occur while parsing pedigree or remap files
#[derive(Error, Debug)]
pub enum SampleFileError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid sex '{value}' for sample {sample_id}")]
    InvalidSex { sample_id: String, value: String },

    #[error("Sample {sample_id} listed more than once")]
    DuplicateSample { sample_id: String },

    #[error("Row {row} has an empty {column}")]
    EmptyField { row: usize, column: String },
}

/// One pedigree row as it appears in the file
#[derive(Debug, Clone, Deserialize)]
struct PedigreeRow {
    #[serde(rename = "Project_GUID", default)]
    project_guid: String,

    #[serde(rename = "Family_GUID")]
    family_guid: String,

    #[serde(rename = "Individual_ID")]
    sample_id: String,

    #[serde(rename = "Paternal_ID", default)]
    father_id: String,

    #[serde(rename = "Maternal_ID", default)]
    mother_id: String,

    #[serde(rename = "Sex", default)]
    sex: String,
}

/// A pedigree member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub sample_id: String,
    pub sex: Sex,
    pub mother_id: Option<String>,
    pub father_id: Option<String>,
}

/// Samples sharing a family id
///
/// Members are held by id; parent links are ids into the same map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub family_guid: String,
    pub samples: BTreeMap<String, Sample>,
}

impl Family {
    pub fn sample_ids(&self) -> BTreeSet<String> {
        self.samples.keys().cloned().collect()
    }

    /// Members absent from `present`
    pub fn missing_from(&self, present: &BTreeSet<String>) -> BTreeSet<String> {
        self.samples
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect()
    }
}

/// A parsed pedigree: families keyed by family id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pedigree {
    pub project_guids: BTreeSet<String>,
    pub families: BTreeMap<String, Family>,
}

impl Pedigree {
    pub fn sample_ids(&self) -> BTreeSet<String> {
        self.families
            .values()
            .flat_map(|f| f.samples.keys().cloned())
            .collect()
    }

    pub fn sample(&self, sample_id: &str) -> Option<&Sample> {
        self.families.values().find_map(|f| f.samples.get(sample_id))
    }
}

/// Empty, "0" and "." parent columns mean unknown
fn parent_id(raw: &str) -> Option<String> {
    match raw.trim() {
        "" | "0" | "." => None,
        id => Some(id.to_string()),
    }
}

pub struct PedigreeParser;

impl PedigreeParser {
    pub fn parse(path: impl AsRef<Path>) -> Result<Pedigree, SampleFileError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse_reader(file)
    }

    /// Parse from any reader (used for in-memory fixtures)
    pub fn parse_reader<R: Read>(source: R) -> Result<Pedigree, SampleFileError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let mut pedigree = Pedigree::default();
        let mut seen = BTreeSet::new();

        for (idx, result) in reader.deserialize().enumerate() {
            let row: PedigreeRow = result?;

            if row.family_guid.is_empty() {
                return Err(SampleFileError::EmptyField {
                    row: idx + 1,
                    column: "Family_GUID".to_string(),
                });
            }
            if row.sample_id.is_empty() {
                return Err(SampleFileError::EmptyField {
                    row: idx + 1,
                    column: "Individual_ID".to_string(),
                });
            }
            if !seen.insert(row.sample_id.clone()) {
                return Err(SampleFileError::DuplicateSample {
                    sample_id: row.sample_id,
                });
            }

            let sex = Sex::from_code(&row.sex).ok_or_else(|| SampleFileError::InvalidSex {
                sample_id: row.sample_id.clone(),
                value: row.sex.clone(),
            })?;

            if !row.project_guid.is_empty() {
                pedigree.project_guids.insert(row.project_guid.clone());
            }

            let family = pedigree
                .families
                .entry(row.family_guid.clone())
                .or_insert_with(|| Family {
                    family_guid: row.family_guid.clone(),
                    samples: BTreeMap::new(),
                });
            family.samples.insert(
                row.sample_id.clone(),
                Sample {
                    sample_id: row.sample_id,
                    sex,
                    mother_id: parent_id(&row.mother_id),
                    father_id: parent_id(&row.father_id),
                },
            );
        }

        Ok(pedigree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEDIGREE: &str = "Project_GUID\tFamily_GUID\tIndividual_ID\tPaternal_ID\tMaternal_ID\tSex\n\
        R0001\tF1\tHG00731\tHG00732\tHG00733\tF\n\
        R0001\tF1\tHG00732\t0\t0\tM\n\
        R0001\tF1\tHG00733\t\t\tF\n\
        R0001\tF2\tNA19675\t.\t.\tU\n";

    #[test]
    fn test_parse_families() {
        let pedigree = PedigreeParser::parse_reader(PEDIGREE.as_bytes()).unwrap();

        assert_eq!(pedigree.families.len(), 2);
        assert_eq!(pedigree.project_guids.len(), 1);

        let f1 = &pedigree.families["F1"];
        assert_eq!(f1.samples.len(), 3);
        let proband = &f1.samples["HG00731"];
        assert_eq!(proband.sex, Sex::Female);
        assert_eq!(proband.father_id.as_deref(), Some("HG00732"));
        assert_eq!(proband.mother_id.as_deref(), Some("HG00733"));
        assert_eq!(f1.samples["HG00732"].father_id, None);

        assert_eq!(pedigree.sample("NA19675").unwrap().sex, Sex::Unknown);
    }

    #[test]
    fn test_missing_members() {
        let pedigree = PedigreeParser::parse_reader(PEDIGREE.as_bytes()).unwrap();
        let present: BTreeSet<String> = ["HG00731", "HG00732"].iter().map(|s| s.to_string()).collect();

        let missing = pedigree.families["F1"].missing_from(&present);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["HG00733"]);
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let data = "Family_GUID\tIndividual_ID\tSex\nF1\tA\tM\nF2\tA\tF\n";
        let err = PedigreeParser::parse_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, SampleFileError::DuplicateSample { .. }));
    }

    #[test]
    fn test_invalid_sex_rejected() {
        let data = "Family_GUID\tIndividual_ID\tSex\nF1\tA\tX\n";
        let err = PedigreeParser::parse_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, SampleFileError::InvalidSex { .. }));
    }
}
