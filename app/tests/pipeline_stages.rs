// ==============================================================================
// pipeline_stages.rs - Stage Integration Tests
// ==============================================================================
// Description: Drives the table stages against on-disk stores and datasets
// Author: Matt Barham
// Created: 2026-10-02
// Modified: 2026-10-19
// Version: 1.1.0
// ==============================================================================

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tempfile::{tempdir, TempDir};

use annotation_loader::admission::admit;
use annotation_loader::annotator::NoAnnotations;
use annotation_loader::callset::{Callset, CallsetRow};
use annotation_loader::config::{DatasetDescriptor, Env, PipelineConfig};
use annotation_loader::lookup::SampleLookupTable;
use annotation_loader::merger::{merge_new_variants, MergeContext, MergeOutcome};
use annotation_loader::models::{DatasetType, ReferenceGenome, VariantKey};
use annotation_loader::parsers::vcf::parse_sample_columns;
use annotation_loader::parsers::PedigreeParser;
use annotation_loader::processor::{NewSamplesRequest, Pipeline, StageOutcome};
use annotation_loader::reference_dataset::ReferenceDatasetFile;
use annotation_loader::table::AnnotationTable;
use annotation_loader::update_log::UpdateLogToken;

const PEDIGREE: &str = "Project_GUID\tFamily_GUID\tIndividual_ID\tPaternal_ID\tMaternal_ID\tSex\n\
    R0001\tF1\ts1\t\t\tF\n\
    R0001\tF1\ts2\t\t\tM\n\
    R0001\tF2\ts3\t\t\tF\n";

fn env(dir: &TempDir) -> Env {
    Env {
        reference_datasets: dir.path().join("reference"),
        private_reference_datasets: dir.path().join("private"),
        loading_datasets: dir.path().join("loading"),
        check_sex_and_relatedness: false,
        access_private_reference_datasets: false,
    }
}

fn clinvar_descriptor() -> DatasetDescriptor {
    serde_json::from_value(json!({ "name": "clinvar", "path": "clinvar.sqlite" })).unwrap()
}

fn stage_clinvar(env: &Env, version: &str) {
    std::fs::create_dir_all(&env.reference_datasets).unwrap();
    let path = env.reference_datasets.join("clinvar.sqlite");
    let _ = std::fs::remove_file(&path);

    let metadata: BTreeMap<String, String> = [
        ("version".to_string(), version.to_string()),
        ("path".to_string(), "clinvar.vcf.gz".to_string()),
        (
            "enums".to_string(),
            json!({"pathogenicity": ["Pathogenic", "Benign"]}).to_string(),
        ),
        (
            "fields".to_string(),
            json!({"pathogenicity": "scalar", "gold_stars": "scalar"}).to_string(),
        ),
    ]
    .into_iter()
    .collect();
    let rows: BTreeMap<VariantKey, Value> = [(
        VariantKey::new("chr1", 100, "A", "G"),
        json!({"pathogenicity": "Benign", "gold_stars": 1}),
    )]
    .into_iter()
    .collect();
    ReferenceDatasetFile::create(&path, &metadata, &rows).unwrap();
}

fn write_inputs(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let callset = dir.join("batch1.vcf");
    std::fs::write(
        &callset,
        "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n",
    )
    .unwrap();
    let pedigree = dir.join("pedigree.tsv");
    std::fs::write(&pedigree, PEDIGREE).unwrap();
    (callset, pedigree)
}

/// Two-sample callset with one variant covered by the staged clinvar file
fn write_populated_callset(dir: &Path, name: &str) -> std::path::PathBuf {
    let callset = dir.join(name);
    std::fs::write(
        &callset,
        "##fileformat=VCFv4.2\n\
         ##contig=<ID=chr1>\n\
         ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
         #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2\n\
         chr1\t100\trs100\tA\tG\t.\tPASS\t.\tGT\t0/1\t1/1\n\
         chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t0/0\t0/1\n",
    )
    .unwrap();
    callset
}

fn new_samples_request(callset: &Path, pedigree: &Path) -> NewSamplesRequest {
    NewSamplesRequest {
        callset_path: callset.to_path_buf(),
        project_guid: "R0001".to_string(),
        pedigree_path: pedigree.to_path_buf(),
        remap_path: None,
        relatedness_path: None,
        annotations_path: None,
    }
}

#[test]
fn test_init_table_once() {
    let dir = tempdir().unwrap();
    let pipeline = Pipeline::new(
        PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel),
        env(&dir),
    )
    .unwrap();

    assert_eq!(pipeline.init_table().unwrap(), StageOutcome::Completed);
    assert_eq!(pipeline.init_table().unwrap(), StageOutcome::AlreadyApplied);

    let (table, _) = pipeline.store().read().unwrap().unwrap();
    assert!(table.is_empty());
    assert_eq!(
        pipeline.audit().events("init_table").unwrap(),
        vec!["stage_started", "stage_completed", "stage_started", "stage_skipped"]
    );
}

#[test]
fn test_reference_datasets_refresh_only_when_stale() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let mut config = PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
    config.datasets.push(clinvar_descriptor());
    let pipeline = Pipeline::new(config, env.clone()).unwrap();
    pipeline.init_table().unwrap();

    stage_clinvar(&env, "2024-01");
    assert_eq!(pipeline.update_reference_datasets().unwrap(), StageOutcome::Completed);
    let (table, _) = pipeline.store().read().unwrap().unwrap();
    assert_eq!(table.globals.versions["clinvar"], "2024-01");
    assert!(table.has_field("clinvar"));

    assert_eq!(pipeline.update_reference_datasets().unwrap(), StageOutcome::UpToDate);

    stage_clinvar(&env, "2024-02");
    assert_eq!(pipeline.update_reference_datasets().unwrap(), StageOutcome::Completed);
    let (table, _) = pipeline.store().read().unwrap().unwrap();
    assert_eq!(table.globals.versions["clinvar"], "2024-02");
}

#[test]
fn test_missing_dataset_leaves_stage_incomplete() {
    let dir = tempdir().unwrap();
    let mut config = PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
    config.datasets.push(clinvar_descriptor());
    let pipeline = Pipeline::new(config, env(&dir)).unwrap();
    pipeline.init_table().unwrap();

    let outcome = pipeline.update_reference_datasets().unwrap();
    assert!(matches!(outcome, StageOutcome::Incomplete(_)));

    let (table, _) = pipeline.store().read().unwrap().unwrap();
    assert!(table.globals.versions.is_empty());
}

#[test]
fn test_missing_callset_leaves_stage_incomplete() {
    let dir = tempdir().unwrap();
    let (_, pedigree) = write_inputs(dir.path());
    let pipeline = Pipeline::new(
        PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel),
        env(&dir),
    )
    .unwrap();

    let outcome = pipeline
        .update_with_new_samples(&NewSamplesRequest {
            callset_path: dir.path().join("not_yet_exported.vcf"),
            project_guid: "R0001".to_string(),
            pedigree_path: pedigree,
            remap_path: None,
            relatedness_path: None,
            annotations_path: None,
        })
        .unwrap();

    assert!(matches!(outcome, StageOutcome::Incomplete(_)));
    assert!(!pipeline.store().exists().unwrap());
}

#[test]
fn test_applied_token_is_skipped() {
    let dir = tempdir().unwrap();
    let (callset, pedigree) = write_inputs(dir.path());
    let pipeline = Pipeline::new(
        PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel),
        env(&dir),
    )
    .unwrap();

    let token =
        UpdateLogToken::from_files(&callset.display().to_string(), "R0001", None, &pedigree)
            .unwrap();
    let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel).with_update(token);
    pipeline.store().write(&table, &SampleLookupTable::new()).unwrap();

    let outcome = pipeline
        .update_with_new_samples(&NewSamplesRequest {
            callset_path: callset,
            project_guid: "R0001".to_string(),
            pedigree_path: pedigree,
            remap_path: None,
            relatedness_path: None,
            annotations_path: None,
        })
        .unwrap();

    assert_eq!(outcome, StageOutcome::AlreadyApplied);
    assert_eq!(
        pipeline.audit().events("update_with_new_samples").unwrap(),
        vec!["stage_started", "stage_skipped"]
    );
}

#[test]
fn test_admit_then_merge() {
    let key = VariantKey::new("chr1", 100, "A", "G");
    let batch = Callset::new(
        "batch1.vcf",
        vec!["s1".to_string(), "s2".to_string()],
        vec![CallsetRow {
            key: key.clone(),
            rsid: Some("rs100".to_string()),
            filters: vec![],
            info_af: None,
            genotypes: parse_sample_columns("GT\t0/1\t1/1", 2).unwrap(),
        }],
    );
    let pedigree = PedigreeParser::parse_reader(PEDIGREE.as_bytes()).unwrap();

    let admission = admit(&batch, &pedigree, None, false, None).unwrap();
    assert_eq!(
        admission.report.families_missing_samples,
        BTreeSet::from(["F2".to_string()])
    );
    assert_eq!(
        admission.admitted,
        BTreeSet::from(["s1".to_string(), "s2".to_string()])
    );

    let table = AnnotationTable::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
    let token = UpdateLogToken::new("batch1.vcf", "R0001", "abc");
    let ctx = MergeContext {
        project_guid: "R0001",
        annotator: &NoAnnotations,
        annotation_datasets: &[],
        reference_datasets: &[],
        ignore_missing_samples: false,
    };

    let outcome = merge_new_variants(
        &table,
        &SampleLookupTable::new(),
        &admission.callset,
        &admission.admitted,
        &token,
        &ctx,
    )
    .unwrap();
    let MergeOutcome::Merged {
        table,
        lookup,
        new_variants,
    } = outcome
    else {
        panic!("expected a merge");
    };
    assert_eq!(new_variants, 1);
    assert_eq!(
        table.get(&key).unwrap()["gt_stats"],
        json!({"AC": 3, "AN": 4, "AF": 0.75, "hom": 1})
    );

    let again = merge_new_variants(
        &table,
        &lookup,
        &admission.callset,
        &admission.admitted,
        &token,
        &ctx,
    )
    .unwrap();
    assert_eq!(again, MergeOutcome::AlreadyApplied);
}

#[test]
fn test_new_samples_load_once_through_store() {
    let dir = tempdir().unwrap();
    let (_, pedigree) = write_inputs(dir.path());
    let callset = write_populated_callset(dir.path(), "batch2.vcf");
    let pipeline = Pipeline::new(
        PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel),
        env(&dir),
    )
    .unwrap();
    pipeline.init_table().unwrap();

    let request = new_samples_request(&callset, &pedigree);
    assert_eq!(pipeline.update_with_new_samples(&request).unwrap(), StageOutcome::Completed);

    let (first, first_lookup) = pipeline.store().read().unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first.updates.len(), 1);
    assert_eq!(
        first.get(&VariantKey::new("chr1", 100, "A", "G")).unwrap()["gt_stats"],
        json!({"AC": 3, "AN": 4, "AF": 0.75, "hom": 1})
    );
    // F2's only member is absent from the callset
    assert_eq!(
        pipeline.audit().events("update_with_new_samples").unwrap(),
        vec!["stage_started", "families_excluded", "stage_completed"]
    );

    assert_eq!(
        pipeline.update_with_new_samples(&request).unwrap(),
        StageOutcome::AlreadyApplied
    );
    let (second, second_lookup) = pipeline.store().read().unwrap().unwrap();
    assert_eq!(second.rows(), first.rows());
    assert_eq!(second.updates, first.updates);
    assert_eq!(second_lookup, first_lookup);
}

#[test]
fn test_new_variants_carry_joined_reference_values() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let (_, pedigree) = write_inputs(dir.path());
    let callset = write_populated_callset(dir.path(), "batch2.vcf");
    let mut config = PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
    config.datasets.push(clinvar_descriptor());
    let pipeline = Pipeline::new(config, env.clone()).unwrap();
    pipeline.init_table().unwrap();

    stage_clinvar(&env, "2024-01");
    assert_eq!(pipeline.update_reference_datasets().unwrap(), StageOutcome::Completed);

    assert_eq!(
        pipeline
            .update_with_new_samples(&new_samples_request(&callset, &pedigree))
            .unwrap(),
        StageOutcome::Completed
    );
    let (table, _) = pipeline.store().read().unwrap().unwrap();
    assert_eq!(
        table.get(&VariantKey::new("chr1", 100, "A", "G")).unwrap()["clinvar"],
        json!({"pathogenicity_id": 1, "gold_stars": 1})
    );
    // Not in the dataset
    assert_eq!(
        table.get(&VariantKey::new("chr1", 200, "C", "T")).unwrap()["clinvar"],
        Value::Null
    );
    assert_eq!(table.globals.versions["clinvar"], "2024-01");

    assert_eq!(pipeline.update_reference_datasets().unwrap(), StageOutcome::UpToDate);
}

#[test]
fn test_bad_enum_declaration_fails_before_admission() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let (_, pedigree) = write_inputs(dir.path());
    let callset = write_populated_callset(dir.path(), "batch2.vcf");
    stage_clinvar(&env, "2024-01");

    let mut config = PipelineConfig::new(ReferenceGenome::GRCh38, DatasetType::SnvIndel);
    config.datasets.push(
        serde_json::from_value(json!({
            "name": "clinvar",
            "path": "clinvar.sqlite",
            "requires_annotation": true,
            "enums": {"review_status": ["criteria_provided"]}
        }))
        .unwrap(),
    );
    let pipeline = Pipeline::new(config, env).unwrap();

    assert!(pipeline
        .update_with_new_samples(&new_samples_request(&callset, &pedigree))
        .is_err());
    assert_eq!(
        pipeline.audit().events("update_with_new_samples").unwrap(),
        vec!["stage_started", "stage_failed"]
    );
    assert!(pipeline.store().read().unwrap().is_none());
}
