#![cfg(unix)]
//! Orchestrator lifecycle against the fake terraform.

mod common;

use common::{write_file, Harness};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tfpipe::archive;
use tfpipe::error::{is_no_changes, kind_of, ErrorKind};
use tfpipe::orchestrator::{
    ApplyOptions, ApplySource, InitOptions, OutputOptions, PlanOptions, Stage,
};
use tfpipe::workspace::{AuxInput, BACKEND_FILE_NAME, BACKUP_STATE_FILE_NAME, STATE_FILE_NAME};

fn init_from(harness: &Harness) -> InitOptions {
    InitOptions {
        source_dir: Some(harness.source.clone()),
        ..InitOptions::default()
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read json")).expect("parse json")
}

#[test]
fn init_plan_apply_then_plan_reports_no_changes() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");

    orchestrator.init(&init_from(&harness)).expect("init");
    assert_eq!(orchestrator.stage(), Stage::Initialized);
    assert!(orchestrator.workspace().root().join("main.tf").is_file());

    let plan = orchestrator.plan(&PlanOptions::default()).expect("first plan");
    assert_eq!(plan, None);
    assert!(harness.output_contains("Plan: 1 to add"));

    orchestrator.apply(&ApplyOptions::default()).expect("apply");
    assert_eq!(orchestrator.stage(), Stage::Applied);
    assert!(orchestrator.workspace().state_path().is_file());

    let err = orchestrator
        .plan(&PlanOptions::default())
        .expect_err("second plan should report no changes");
    assert!(is_no_changes(&err), "{err:#}");
}

#[test]
fn lenient_plan_without_changes_writes_no_artifact() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");
    orchestrator.apply(&ApplyOptions::default()).expect("apply");

    let plan = orchestrator
        .plan(&PlanOptions {
            error_on_no_changes: false,
            ..PlanOptions::default()
        })
        .expect("lenient plan");

    assert_eq!(plan, None);
    assert!(!orchestrator.workspace().root().join(".tfplan").exists());
    assert_eq!(orchestrator.stage(), Stage::Applied);
}

#[test]
fn destroy_plan_without_resources_is_no_changes() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");

    let err = orchestrator
        .plan(&PlanOptions {
            destroy: true,
            ..PlanOptions::default()
        })
        .expect_err("nothing to destroy");
    assert!(is_no_changes(&err));
}

#[test]
fn reinit_discards_previous_workspace() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");
    let stale = orchestrator.workspace().root().join("stale.tf");
    write_file(&stale, "left over");

    orchestrator.init(&init_from(&harness)).expect("reinit");

    assert!(!stale.exists());
    assert!(orchestrator.workspace().root().join("main.tf").is_file());
}

#[test]
fn init_stages_aux_inputs_backend_and_plugin_cache() {
    let harness = Harness::new();
    write_file(&harness.path("shared/modules/net/main.tf"), "# shared module\n");
    let cache = harness.path("plugin-cache");
    let mut backend_config = BTreeMap::new();
    backend_config.insert("bucket".to_string(), "tf-state".to_string());
    backend_config.insert("key".to_string(), "prod.tfstate".to_string());

    let mut orchestrator = harness.orchestrator("work");
    orchestrator
        .init(&InitOptions {
            aux_inputs: vec![AuxInput {
                path: harness.path("shared"),
                name: Some("vendor".to_string()),
            }],
            backend_type: Some("s3".to_string()),
            backend_config,
            plugin_cache: Some(cache.clone()),
            ..init_from(&harness)
        })
        .expect("init");

    let root = orchestrator.workspace().root();
    assert!(root.join("vendor/modules/net/main.tf").is_file());
    assert!(fs::read_to_string(root.join(BACKEND_FILE_NAME))
        .expect("backend file")
        .contains("backend \"s3\" {}"));
    assert_eq!(
        fs::read_to_string(root.join(".backend-config")).expect("backend config"),
        "bucket=tf-state\nkey=prod.tfstate\n"
    );
    assert!(cache.join("terraform-provider-null").is_file());
}

#[test]
fn blank_backend_type_skips_backend_file() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator
        .init(&InitOptions {
            backend_type: Some(String::new()),
            ..init_from(&harness)
        })
        .expect("init with blank backend type");

    assert_eq!(orchestrator.stage(), Stage::Initialized);
    assert!(!orchestrator.workspace().root().join(BACKEND_FILE_NAME).exists());
}

#[test]
fn backend_file_follows_sub_path() {
    let harness = Harness::new();
    write_file(&harness.source.join("envs/dev/main.tf"), "# dev\n");
    let mut orchestrator = harness.orchestrator("work");
    orchestrator
        .init(&InitOptions {
            sub_path: Some(PathBuf::from("envs/dev")),
            backend_type: Some("local".to_string()),
            ..init_from(&harness)
        })
        .expect("init");

    let root = orchestrator.workspace().root().to_path_buf();
    assert!(root.join("envs/dev").join(BACKEND_FILE_NAME).is_file());
    assert!(!root.join(BACKEND_FILE_NAME).exists());

    orchestrator
        .plan(&PlanOptions {
            sub_path: Some(PathBuf::from("envs/dev")),
            ..PlanOptions::default()
        })
        .expect("plan in sub path");
}

#[test]
fn plan_artifact_survives_archive_handoff() {
    let harness = Harness::new();
    let archive_dir = harness.path("archive");

    let mut planner = harness.orchestrator("plan-stage");
    planner.init(&init_from(&harness)).expect("init");
    let plan = planner
        .plan(&PlanOptions {
            create_plan_file: true,
            ..PlanOptions::default()
        })
        .expect("plan");
    assert_eq!(plan, Some(PathBuf::from(".tfplan")));
    assert_eq!(planner.stage(), Stage::Planned);
    let version = archive::archive_version(Some("abc123"), None, Some(1000)).expect("version");
    let written = planner.archive(&archive_dir, &version).expect("archive");
    assert_eq!(written, archive_dir.join("terraform-1000.abc123.tar.gz"));

    let mut applier = harness.orchestrator("apply-stage");
    applier.restore(&archive_dir).expect("restore");
    assert_eq!(applier.stage(), Stage::Restored);
    applier.show(None).expect("show");
    assert!(harness.output_contains("plan changes=1 destroy=0"));

    let state_out = harness.path("state-out");
    applier
        .apply(&ApplyOptions {
            source: ApplySource::PlanArtifact { plan_file: None },
            state_output_dir: Some(state_out.clone()),
            ..ApplyOptions::default()
        })
        .expect("apply plan");
    assert_eq!(applier.stage(), Stage::Applied);
    assert!(state_out.join(STATE_FILE_NAME).is_file());
    assert!(!state_out.join(BACKUP_STATE_FILE_NAME).exists());
}

#[test]
fn custom_plan_file_is_used_for_show_and_apply() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");
    let plan = orchestrator
        .plan(&PlanOptions {
            create_plan_file: true,
            plan_file: Some(PathBuf::from("release.tfplan")),
            ..PlanOptions::default()
        })
        .expect("plan");
    assert_eq!(plan, Some(PathBuf::from("release.tfplan")));
    assert!(orchestrator.workspace().root().join("release.tfplan").is_file());

    let err = orchestrator.show(None).expect_err("default plan file is absent");
    assert_eq!(kind_of(&err), Some(ErrorKind::NotFound));
    orchestrator
        .show(Some(Path::new("release.tfplan")))
        .expect("show custom plan");
}

#[test]
fn failed_apply_still_exports_state() {
    let harness = Harness::new();
    write_file(&harness.source.join("invalid.tf"), "resource {\n");
    let prior = harness.path("prior.tfstate");
    write_file(&prior, "{\"status\": \"prior\"}\n");
    let state_out = harness.path("state-out");

    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");
    let err = orchestrator
        .apply(&ApplyOptions {
            source: ApplySource::Fresh {
                state_file: Some(prior),
                output_var_files: BTreeMap::new(),
            },
            state_output_dir: Some(state_out.clone()),
            ..ApplyOptions::default()
        })
        .expect_err("apply should fail");

    assert_eq!(kind_of(&err), Some(ErrorKind::CommandFailed));
    assert_ne!(orchestrator.stage(), Stage::Applied);
    assert!(fs::read_to_string(state_out.join(STATE_FILE_NAME))
        .expect("exported state")
        .contains("applied"));
    assert!(fs::read_to_string(state_out.join(BACKUP_STATE_FILE_NAME))
        .expect("exported backup")
        .contains("prior"));
}

#[test]
fn outputs_are_dumped_and_split_into_targets() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");
    orchestrator.apply(&ApplyOptions::default()).expect("apply");

    let all_dir = harness.path("outputs-all");
    let exported = orchestrator
        .output(&OutputOptions {
            output_dir: all_dir.clone(),
            ..OutputOptions::default()
        })
        .expect("output all");
    assert_eq!(exported, vec![all_dir.join("tf-output.json")]);
    assert_eq!(read_json(&exported[0])["bits"]["value"], json!(4096));
    assert!(harness.output_contains("deprecated"));

    let target_dir = harness.path("outputs-targets");
    let mut targets = BTreeMap::new();
    targets.insert("algo".to_string(), "algorithm".to_string());
    let exported = orchestrator
        .output(&OutputOptions {
            output_dir: target_dir.clone(),
            targets,
            ..OutputOptions::default()
        })
        .expect("output targets");
    assert_eq!(exported, vec![target_dir.join("algo.json")]);
    assert_eq!(read_json(&exported[0])["value"], json!("RSA"));
}

#[test]
fn missing_output_target_is_not_found() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator("work");
    orchestrator.init(&init_from(&harness)).expect("init");
    let mut targets = BTreeMap::new();
    targets.insert("vpc".to_string(), "vpc_id".to_string());

    let err = orchestrator
        .output(&OutputOptions {
            output_dir: harness.path("outputs"),
            targets,
            ..OutputOptions::default()
        })
        .expect_err("no outputs before apply");
    assert_eq!(kind_of(&err), Some(ErrorKind::NotFound));
}

#[test]
fn output_target_feeds_next_plan_as_var_file() {
    let harness = Harness::new();
    let mut upstream = harness.orchestrator("upstream");
    upstream.init(&init_from(&harness)).expect("init upstream");
    upstream.apply(&ApplyOptions::default()).expect("apply upstream");
    let mut targets = BTreeMap::new();
    targets.insert("algorithm".to_string(), "algorithm".to_string());
    let exported = upstream
        .output(&OutputOptions {
            output_dir: harness.path("handoff"),
            targets,
            ..OutputOptions::default()
        })
        .expect("output");

    let mut downstream = harness.orchestrator("downstream");
    downstream.init(&init_from(&harness)).expect("init downstream");
    let mut output_var_files = BTreeMap::new();
    output_var_files.insert("algorithm".to_string(), exported[0].clone());
    downstream
        .plan(&PlanOptions {
            output_var_files,
            ..PlanOptions::default()
        })
        .expect("plan with var file");

    let var_file = downstream.workspace().root().join("algorithm.tfvars.json");
    assert_eq!(read_json(&var_file), json!({"algorithm": "RSA"}));
    assert!(harness.output_contains(&format!("using var file {}", var_file.display())));
}
