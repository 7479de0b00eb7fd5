// ==============================================================================
// merger.rs - Incremental Annotation Merger
// ==============================================================================
// Description: Appends unseen variants of an admitted batch to an annotation
//              table and re-joins stale reference datasets
// Author: Matt Barham
// Created: 2026-09-27
// Modified: 2026-10-19
// Version: 1.3.0
// ==============================================================================
// New samples:
//   token applied? -> unchanged
//   subset batch to admitted samples
//   unseen = batch keys - table keys
//   annotate unseen, project, join annotation and carried datasets, outer union
//   load project into the sample lookup, recompute gt_stats for batch keys
//   append token
//
// Stale datasets:
//   drop field, left join fresh dataset, overwrite its metadata entries
// ==============================================================================

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::annotator::VariantAnnotator;
use crate::callset::Callset;
use crate::error::{PipelineError, Result};
use crate::fields::{base_schema, gt_stats_type, project_row, GT_STATS};
use crate::lookup::SampleLookupTable;
use crate::reference_dataset::DatasetTable;
use crate::table::{AnnotationTable, Row};
use crate::update_log::UpdateLogToken;

/// Collaborators and options for one new-samples merge
pub struct MergeContext<'a> {
    pub project_guid: &'a str,
    pub annotator: &'a dyn VariantAnnotator,
    /// Datasets joined onto new rows once annotated
    pub annotation_datasets: &'a [DatasetTable],
    /// Reference datasets the table already carries; joined onto new rows
    /// without touching their recorded metadata
    pub reference_datasets: &'a [DatasetTable],
    pub ignore_missing_samples: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The token was already in the update log
    AlreadyApplied,
    Merged {
        table: AnnotationTable,
        lookup: SampleLookupTable,
        new_variants: usize,
    },
}

/// Merge one admitted batch into the table
pub fn merge_new_variants(
    table: &AnnotationTable,
    lookup: &SampleLookupTable,
    batch: &Callset,
    admitted: &BTreeSet<String>,
    token: &UpdateLogToken,
    ctx: &MergeContext<'_>,
) -> Result<MergeOutcome> {
    if table.updates.contains(token) {
        info!(
            "{} for {} already applied, skipping",
            token.callset, token.project_guid
        );
        return Ok(MergeOutcome::AlreadyApplied);
    }

    let subset = batch.subset_samples(admitted, ctx.ignore_missing_samples)?;
    let batch_keys = subset.keys();
    let unseen = table.anti_join_keys(&batch_keys);
    let annotations = ctx.annotator.annotate(&unseen)?;

    let joined = || ctx.annotation_datasets.iter().chain(ctx.reference_datasets);
    let mut schema = base_schema();
    for dataset in joined() {
        schema.insert(dataset.name.clone(), dataset.field_type.clone());
    }

    let mut new_rows: BTreeMap<_, Row> = BTreeMap::new();
    for row in subset.rows.iter().filter(|r| unseen.contains(&r.key)) {
        let mut projected = project_row(table.reference_genome, row, annotations.get(&row.key));
        for dataset in joined() {
            projected.insert(
                dataset.name.clone(),
                dataset
                    .rows
                    .get(&row.key)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        new_rows.insert(row.key.clone(), projected);
    }
    let new_variants = new_rows.len();

    let lookup = lookup.with_project(ctx.project_guid, &subset);
    let gt_stats = batch_keys
        .iter()
        .map(|key| (key.clone(), lookup.gt_stats(key).to_value()))
        .collect();

    let mut merged = table
        .outer_union(new_rows, &schema)?
        .set_field(GT_STATS, gt_stats_type(), gt_stats);

    let mut globals = merged.globals.clone();
    for dataset in ctx.annotation_datasets {
        globals = globals.with_dataset(&dataset.name, &dataset.metadata);
    }
    merged = merged.with_globals(globals).with_update(token.clone());

    info!(
        "Merged {} new variants ({} batch variants) from {} into {} {} table",
        new_variants,
        batch_keys.len(),
        token.callset,
        table.reference_genome,
        table.dataset_type
    );

    Ok(MergeOutcome::Merged {
        table: merged,
        lookup,
        new_variants,
    })
}

/// Re-join each stale dataset from its freshly loaded table
pub fn refresh_stale_datasets(
    table: &AnnotationTable,
    stale: &BTreeSet<String>,
    datasets: &BTreeMap<String, DatasetTable>,
) -> Result<AnnotationTable> {
    let mut refreshed = table.clone();
    for name in stale {
        let dataset = datasets
            .get(name)
            .ok_or_else(|| PipelineError::UnknownDataset(name.clone()))?;
        refreshed = refreshed
            .drop_field(name)
            .left_join(name, dataset.field_type.clone(), &dataset.rows);
        refreshed = refreshed.with_globals(refreshed.globals.with_dataset(name, &dataset.metadata));
        debug!(
            "Refreshed {} ({} dataset rows) at version {}",
            name,
            dataset.rows.len(),
            dataset.metadata.version
        );
    }
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotator::NoAnnotations;
    use crate::callset::tests::{callset, row};
    use crate::fields::VEP;
    use crate::metadata::tests::metadata;
    use crate::models::{DatasetType, ReferenceGenome, VariantKey};
    use crate::table::FieldType;
    use serde_json::{json, Value};
    use std::cell::RefCell;

    /// Records which keys it was asked to annotate
    struct RecordingAnnotator {
        seen: RefCell<Vec<BTreeSet<VariantKey>>>,
    }

    impl VariantAnnotator for RecordingAnnotator {
        fn annotate(&self, keys: &BTreeSet<VariantKey>) -> Result<BTreeMap<VariantKey, Value>> {
            self.seen.borrow_mut().push(keys.clone());
            Ok(keys
                .iter()
                .map(|k| (k.clone(), json!({"consequence": "missense"})))
                .collect())
        }
    }

    fn key(position: u64) -> VariantKey {
        VariantKey::new("chr1", position, "A", "G")
    }

    fn samples() -> BTreeSet<String> {
        ["a", "b"].iter().map(|s| s.to_string()).collect()
    }

    fn cadd(rows: &[(u64, f64)], version: &str) -> DatasetTable {
        DatasetTable {
            name: "cadd".to_string(),
            metadata: metadata(version, &[]),
            field_type: FieldType::Scalar,
            rows: rows.iter().map(|(p, v)| (key(*p), json!(v))).collect(),
        }
    }

    fn context<'a>(annotator: &'a dyn VariantAnnotator, datasets: &'a [DatasetTable]) -> MergeContext<'a> {
        MergeContext {
            project_guid: "R0001",
            annotator,
            annotation_datasets: datasets,
            reference_datasets: &[],
            ignore_missing_samples: false,
        }
    }

    fn merged(outcome: MergeOutcome) -> (AnnotationTable, SampleLookupTable, usize) {
        match outcome {
            MergeOutcome::Merged {
                table,
                lookup,
                new_variants,
            } => (table, lookup, new_variants),
            MergeOutcome::AlreadyApplied => panic!("expected a merge"),
        }
    }

    #[test]
    fn test_merge_is_idempotent_per_token() {
        let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
        let batch = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "0/0"])]);
        let token = UpdateLogToken::new("batch1.vcf", "R0001", "h1");
        let ctx = context(&NoAnnotations, &[]);

        let (once, lookup, n) = merged(
            merge_new_variants(&table, &SampleLookupTable::new(), &batch, &samples(), &token, &ctx).unwrap(),
        );
        assert_eq!(n, 1);
        assert!(once.updates.contains(&token));

        let again = merge_new_variants(&once, &lookup, &batch, &samples(), &token, &ctx).unwrap();
        assert_eq!(again, MergeOutcome::AlreadyApplied);
    }

    #[test]
    fn test_annotator_sees_only_unseen_keys() {
        let annotator = RecordingAnnotator {
            seen: RefCell::new(Vec::new()),
        };
        let ctx = context(&annotator, &[]);
        let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);

        let first = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "0/0"])]);
        let (table, lookup, _) = merged(
            merge_new_variants(
                &table,
                &SampleLookupTable::new(),
                &first,
                &samples(),
                &UpdateLogToken::new("b1", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );

        let second = callset(
            &["a", "b"],
            vec![row("chr1", 1, &["1/1", "0/1"]), row("chr1", 2, &["0/1", "0/0"])],
        );
        let (table, _, n) = merged(
            merge_new_variants(
                &table,
                &lookup,
                &second,
                &samples(),
                &UpdateLogToken::new("b2", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );

        let seen = annotator.seen.borrow();
        assert_eq!(seen[1], [key(2)].into_iter().collect());
        assert_eq!(n, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&key(2)).unwrap()[VEP], json!({"consequence": "missense"}));

        // The project's calls were replaced by the second batch
        assert_eq!(
            table.get(&key(1)).unwrap()[GT_STATS],
            json!({"AC": 3, "AN": 4, "AF": 0.75, "hom": 1})
        );
    }

    #[test]
    fn test_new_variant_joins_carried_reference_dataset() {
        let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
        let first = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "0/0"])]);
        let (table, lookup, _) = merged(
            merge_new_variants(
                &table,
                &SampleLookupTable::new(),
                &first,
                &samples(),
                &UpdateLogToken::new("b1", "R0001", "h"),
                &context(&NoAnnotations, &[]),
            )
            .unwrap(),
        );

        let stale: BTreeSet<String> = ["cadd".to_string()].into_iter().collect();
        let datasets: BTreeMap<String, DatasetTable> =
            [("cadd".to_string(), cadd(&[(1, 20.5), (2, 7.0)], "v1.6"))].into_iter().collect();
        let table = refresh_stale_datasets(&table, &stale, &datasets).unwrap();
        let recorded = table.globals.clone();

        let carried = vec![datasets["cadd"].clone()];
        let ctx = MergeContext {
            reference_datasets: &carried,
            ..context(&NoAnnotations, &[])
        };
        let second = callset(
            &["a", "b"],
            vec![row("chr1", 2, &["0/1", "0/0"]), row("chr1", 3, &["0/1", "0/0"])],
        );
        let (table, _, _) = merged(
            merge_new_variants(
                &table,
                &lookup,
                &second,
                &samples(),
                &UpdateLogToken::new("b2", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );

        assert_eq!(table.get(&key(2)).unwrap()["cadd"], json!(7.0));
        // Keys the dataset does not cover stay explicit nulls
        assert_eq!(table.get(&key(3)).unwrap()["cadd"], Value::Null);
        assert_eq!(table.globals, recorded);
    }

    #[test]
    fn test_new_variant_gets_null_for_existing_reference_column() {
        let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
        let ctx = context(&NoAnnotations, &[]);
        let first = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "0/0"])]);
        let (table, lookup, _) = merged(
            merge_new_variants(
                &table,
                &SampleLookupTable::new(),
                &first,
                &samples(),
                &UpdateLogToken::new("b1", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );

        let stale: BTreeSet<String> = ["cadd".to_string()].into_iter().collect();
        let datasets: BTreeMap<String, DatasetTable> =
            [("cadd".to_string(), cadd(&[(1, 20.5)], "v1.6"))].into_iter().collect();
        let table = refresh_stale_datasets(&table, &stale, &datasets).unwrap();
        assert_eq!(table.get(&key(1)).unwrap()["cadd"], json!(20.5));

        let second = callset(&["a", "b"], vec![row("chr1", 2, &["0/1", "0/0"])]);
        let (table, _, _) = merged(
            merge_new_variants(
                &table,
                &lookup,
                &second,
                &samples(),
                &UpdateLogToken::new("b2", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );
        assert_eq!(table.get(&key(2)).unwrap()["cadd"], Value::Null);
        assert_eq!(table.get(&key(1)).unwrap()["cadd"], json!(20.5));
    }

    #[test]
    fn test_annotation_datasets_join_new_rows_only() {
        let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
        let datasets = vec![cadd(&[(1, 11.0), (2, 22.0)], "v1.7")];
        let ctx = context(&NoAnnotations, &datasets);
        let batch = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "0/0"])]);

        let (table, _, _) = merged(
            merge_new_variants(
                &table,
                &SampleLookupTable::new(),
                &batch,
                &samples(),
                &UpdateLogToken::new("b1", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );
        assert_eq!(table.get(&key(1)).unwrap()["cadd"], json!(11.0));
        assert!(table.get(&key(2)).is_none());
        assert_eq!(table.globals.versions["cadd"], "v1.7");
    }

    #[test]
    fn test_refresh_replaces_only_stale_datasets() {
        let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
        let ctx = context(&NoAnnotations, &[]);
        let batch = callset(&["a", "b"], vec![row("chr1", 1, &["0/1", "0/0"])]);
        let (table, _, _) = merged(
            merge_new_variants(
                &table,
                &SampleLookupTable::new(),
                &batch,
                &samples(),
                &UpdateLogToken::new("b1", "R0001", "h"),
                &ctx,
            )
            .unwrap(),
        );
        let table = table
            .left_join("clinvar", FieldType::Scalar, &BTreeMap::new())
            .with_globals(table.globals.with_dataset("clinvar", &metadata("2024-01", &[])));

        let stale: BTreeSet<String> = ["cadd".to_string()].into_iter().collect();
        let datasets: BTreeMap<String, DatasetTable> =
            [("cadd".to_string(), cadd(&[(1, 30.0)], "v1.7"))].into_iter().collect();
        let refreshed = refresh_stale_datasets(&table, &stale, &datasets).unwrap();

        assert_eq!(refreshed.globals.versions["cadd"], "v1.7");
        assert_eq!(refreshed.globals.versions["clinvar"], "2024-01");
        assert!(refreshed.has_field("clinvar"));

        let unknown: BTreeSet<String> = ["gnomad".to_string()].into_iter().collect();
        assert!(matches!(
            refresh_stale_datasets(&table, &unknown, &datasets),
            Err(PipelineError::UnknownDataset(_))
        ));
    }
}
