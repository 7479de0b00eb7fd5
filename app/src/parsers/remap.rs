// ==============================================================================
// parsers/remap.rs - Sample ID Remap Parser
// ==============================================================================
// Description: Parses raw-to-canonical sample id remap files
// Author: Matt Barham
// Created: 2026-09-16
// Modified: 2026-09-16
// Version: 1.0.0
// ==============================================================================
// Format: TSV file with header
// Example:
//   s        seqr_id
//   HG00731  HG00731_1
// ==============================================================================

use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use super::pedigree::SampleFileError;

/// One remap entry: raw callset id to canonical id
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemapEntry {
    pub s: String,
    pub seqr_id: String,
}

pub struct RemapParser;

impl RemapParser {
    pub fn parse(path: impl AsRef<Path>) -> Result<BTreeMap<String, String>, SampleFileError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse_reader(file)
    }

    pub fn parse_reader<R: Read>(source: R) -> Result<BTreeMap<String, String>, SampleFileError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let mut mapping = BTreeMap::new();
        for (idx, result) in reader.deserialize().enumerate() {
            let entry: RemapEntry = result?;
            if entry.s.is_empty() || entry.seqr_id.is_empty() {
                return Err(SampleFileError::EmptyField {
                    row: idx + 1,
                    column: if entry.s.is_empty() { "s" } else { "seqr_id" }.to_string(),
                });
            }
            if mapping.insert(entry.s.clone(), entry.seqr_id).is_some() {
                return Err(SampleFileError::DuplicateSample { sample_id: entry.s });
            }
        }

        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remap() {
        let data = "s\tseqr_id\nHG00731\tHG00731_1\nHG00732\tHG00732_1\n";
        let mapping = RemapParser::parse_reader(data.as_bytes()).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["HG00731"], "HG00731_1");
    }

    #[test]
    fn test_duplicate_raw_id() {
        let data = "s\tseqr_id\nA\tA_1\nA\tA_2\n";
        assert!(matches!(
            RemapParser::parse_reader(data.as_bytes()),
            Err(SampleFileError::DuplicateSample { .. })
        ));
    }

    #[test]
    fn test_missing_column() {
        let data = "s\nA\n";
        assert!(RemapParser::parse_reader(data.as_bytes()).is_err());
    }
}
