// ==============================================================================
// fields.rs - Row Field Expressions
// ==============================================================================
// Description: Projects callset rows and annotations into table fields
// Author: Matt Barham
// Created: 2026-09-19
// Modified: 2026-10-07
// Version: 1.1.0
// ==============================================================================

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::callset::{Callset, CallsetRow};
use crate::genotype_converter::GenotypeEntry;
use crate::models::ReferenceGenome;
use crate::table::{FieldType, Row};

pub const VARIANT_ID: &str = "variant_id";
pub const XPOS: &str = "xpos";
pub const RSID: &str = "rsid";
pub const FILTERS: &str = "filters";
pub const VEP: &str = "vep";
pub const GT_STATS: &str = "gt_stats";

/// Fields every new row is projected to
pub fn base_schema() -> BTreeMap<String, FieldType> {
    let mut schema = BTreeMap::new();
    for field in [VARIANT_ID, XPOS, RSID, FILTERS, VEP] {
        schema.insert(field.to_string(), FieldType::Scalar);
    }
    schema.insert(GT_STATS.to_string(), gt_stats_type());
    schema
}

pub fn gt_stats_type() -> FieldType {
    FieldType::Struct(
        ["AC", "AN", "AF", "hom"]
            .iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>(),
    )
}

/// Genomic position packed with its contig: contig_number * 1e9 + position
pub fn xpos(reference_genome: ReferenceGenome, contig: &str, position: u64) -> Option<u64> {
    reference_genome
        .contig_number(contig)
        .map(|n| n * 1_000_000_000 + position)
}

/// Project one callset row; `gt_stats` starts `Null` and is filled from the
/// sample lookup after the union
pub fn project_row(
    reference_genome: ReferenceGenome,
    row: &CallsetRow,
    annotation: Option<&Value>,
) -> Row {
    let mut projected = Row::new();
    projected.insert(VARIANT_ID.to_string(), json!(row.key.variant_id()));
    projected.insert(
        XPOS.to_string(),
        xpos(reference_genome, &row.key.contig, row.key.position)
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    projected.insert(
        RSID.to_string(),
        row.rsid.as_ref().map(|r| json!(r)).unwrap_or(Value::Null),
    );
    projected.insert(FILTERS.to_string(), json!(row.filters));
    projected.insert(
        VEP.to_string(),
        annotation.cloned().unwrap_or(Value::Null),
    );
    projected.insert(GT_STATS.to_string(), Value::Null);
    projected
}

/// Per-sample entry fields for one row, in sample order
pub fn genotype_entries(callset: &Callset, row: &CallsetRow) -> Vec<GenotypeEntry> {
    callset
        .sample_ids
        .iter()
        .zip(row.genotypes.iter())
        .map(|(sample_id, genotype)| genotype.entry(sample_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callset::tests::{callset, row};

    #[test]
    fn test_xpos() {
        assert_eq!(xpos(ReferenceGenome::GRCh38, "chr1", 12345), Some(1_000_012_345));
        assert_eq!(xpos(ReferenceGenome::GRCh38, "chrX", 5), Some(23_000_000_005));
        assert_eq!(xpos(ReferenceGenome::GRCh37, "MT", 5), Some(25_000_000_005));
        assert_eq!(xpos(ReferenceGenome::GRCh38, "chrUn", 5), None);
    }

    #[test]
    fn test_project_row_matches_base_schema() {
        let mut r = row("chr2", 100, &["0/1"]);
        r.rsid = Some("rs42".to_string());
        r.filters = vec!["LowQual".to_string()];

        let projected = project_row(ReferenceGenome::GRCh38, &r, None);
        let schema = base_schema();
        assert_eq!(projected.len(), schema.len());
        assert!(schema.keys().all(|f| projected.contains_key(f)));

        assert_eq!(projected[VARIANT_ID], json!("chr2-100-A-G"));
        assert_eq!(projected[XPOS], json!(2_000_000_100u64));
        assert_eq!(projected[RSID], json!("rs42"));
        assert_eq!(projected[FILTERS], json!(["LowQual"]));
        assert_eq!(projected[VEP], Value::Null);
    }

    #[test]
    fn test_project_row_with_annotation() {
        let r = row("chr2", 100, &["0/1"]);
        let vep = json!({"gene_ids": ["ENSG00000012048"]});
        let projected = project_row(ReferenceGenome::GRCh38, &r, Some(&vep));
        assert_eq!(projected[VEP], vep);
    }

    #[test]
    fn test_genotype_entries() {
        let cs = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "./."])]);
        let entries = genotype_entries(&cs, &cs.rows[0]);
        assert_eq!(entries[0].sample_id, "a");
        assert_eq!(entries[0].num_alt, 1);
        assert_eq!(entries[1].num_alt, -1);
        assert_eq!(entries[1].gq, Some(0));
    }
}
