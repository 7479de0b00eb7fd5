// ==============================================================================
// relatedness.rs - Relatedness Check Collaborator
// ==============================================================================
// Description: Sample pairs flagged by an external kinship analysis
// Author: Matt Barham
// Created: 2026-09-24
// Modified: 2026-10-06
// Version: 1.0.0
// ==============================================================================
// Input format (CSV or TSV, header required):
//   i_s,j_s[,kin,...]
// Extra columns are ignored. Ids are remapped with the project remap when
// one is supplied.
// ==============================================================================

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::callset::Callset;
use crate::error::Result;

/// Unordered sample pair, stored smallest id first
pub type SamplePair = (String, String);

/// Source of sample pairs that failed the relatedness check
pub trait RelatednessCheck {
    fn failing_pairs(&self, callset: &Callset) -> Result<BTreeSet<SamplePair>>;
}

#[derive(Debug, Deserialize)]
struct PairRow {
    i_s: String,
    j_s: String,
}

fn pair(a: String, b: String) -> SamplePair {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Flagged pairs loaded from a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlaggedPairs {
    pairs: BTreeSet<SamplePair>,
}

impl FlaggedPairs {
    /// No flagged pairs
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            pairs: pairs.into_iter().map(|(a, b)| pair(a, b)).collect(),
        }
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        remap: Option<&BTreeMap<String, String>>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") | Some("txt") => b'\t',
            _ => b',',
        };
        let flagged = Self::from_reader(File::open(path)?, delimiter, remap)?;
        info!(
            "Loaded {} flagged sample pairs from {}",
            flagged.pairs.len(),
            path.display()
        );
        Ok(flagged)
    }

    pub fn from_reader<R: Read>(
        source: R,
        delimiter: u8,
        remap: Option<&BTreeMap<String, String>>,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(source);

        let lookup = |id: String| -> String {
            remap
                .and_then(|m| m.get(&id).cloned())
                .unwrap_or(id)
        };

        let mut pairs = BTreeSet::new();
        for row in reader.deserialize() {
            let row: PairRow = row?;
            pairs.insert(pair(lookup(row.i_s), lookup(row.j_s)));
        }
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl RelatednessCheck for FlaggedPairs {
    /// Pairs whose samples both appear in the callset
    fn failing_pairs(&self, callset: &Callset) -> Result<BTreeSet<SamplePair>> {
        let samples = callset.sample_set();
        Ok(self
            .pairs
            .iter()
            .filter(|(a, b)| samples.contains(a) && samples.contains(b))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callset::tests::callset;

    const PAIRS: &str = "i_s,j_s,kin\nHG00733,HG00731,0.25\nNA19675,NA19679,0.5\n";

    #[test]
    fn test_pairs_are_unordered() {
        let flagged = FlaggedPairs::from_reader(PAIRS.as_bytes(), b',', None).unwrap();
        assert_eq!(flagged.len(), 2);
        assert!(flagged
            .pairs
            .contains(&("HG00731".to_string(), "HG00733".to_string())));
    }

    #[test]
    fn test_remap_applies_to_pairs() {
        let remap: BTreeMap<String, String> = [("HG00733".to_string(), "HG00733_1".to_string())]
            .into_iter()
            .collect();
        let flagged = FlaggedPairs::from_reader(PAIRS.as_bytes(), b',', Some(&remap)).unwrap();
        assert!(flagged
            .pairs
            .contains(&("HG00731".to_string(), "HG00733_1".to_string())));
    }

    #[test]
    fn test_failing_pairs_limited_to_callset() {
        let flagged = FlaggedPairs::from_reader(PAIRS.as_bytes(), b',', None).unwrap();
        let cs = callset(&["HG00731", "HG00733", "NA19675"], Vec::new());
        let failing = flagged.failing_pairs(&cs).unwrap();
        assert_eq!(failing.len(), 1);
        assert!(FlaggedPairs::empty().failing_pairs(&cs).unwrap().is_empty());
    }

    #[test]
    fn test_tsv_input() {
        let tsv = "i_s\tj_s\na\tb\n";
        let flagged = FlaggedPairs::from_reader(tsv.as_bytes(), b'\t', None).unwrap();
        assert_eq!(flagged, FlaggedPairs::from_pairs([("b".to_string(), "a".to_string())]));
    }
}
