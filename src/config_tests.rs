use super::*;

#[test]
fn prefixed_vars_are_stripped_into_maps() {
    let config = RunConfig::from_vars([
        ("TF_BACKEND_TYPE", "s3"),
        ("TF_BACKEND_CONFIG_bucket", "state-bucket"),
        ("TF_BACKEND_CONFIG_region", "us-east-1"),
        ("TF_OUTPUT_VAR_FILE_network", "/inputs/network.json"),
        ("TF_PLUGIN_CACHE", "/cache/plugins"),
        ("HOME", "/root"),
    ]);
    assert_eq!(config.backend_type.as_deref(), Some("s3"));
    assert_eq!(config.backend_config.len(), 2);
    assert_eq!(config.backend_config["bucket"], "state-bucket");
    assert_eq!(
        config.output_var_files["network"],
        PathBuf::from("/inputs/network.json")
    );
    assert_eq!(config.plugin_cache, Some(PathBuf::from("/cache/plugins")));
}

#[test]
fn empty_scalars_are_unset() {
    let config = RunConfig::from_vars([("TF_BACKEND_TYPE", ""), ("TF_PLUGIN_CACHE", "")]);
    assert_eq!(config, RunConfig::default());
}

#[test]
fn aux_inputs_pair_names_and_keep_index_order() {
    let config = RunConfig::from_vars([
        ("TF_AUX_INPUT_PATH_10", "/aux/ten"),
        ("TF_AUX_INPUT_PATH_2", "/aux/two"),
        ("TF_AUX_INPUT_NAME_2", "shared"),
        ("TF_AUX_INPUT_PATH_1", "/aux/one"),
        ("TF_AUX_INPUT_NAME_9", "orphan"),
    ]);
    assert_eq!(
        config.aux_inputs,
        vec![
            AuxInput {
                path: PathBuf::from("/aux/one"),
                name: None,
            },
            AuxInput {
                path: PathBuf::from("/aux/two"),
                name: Some("shared".to_string()),
            },
            AuxInput {
                path: PathBuf::from("/aux/ten"),
                name: None,
            },
        ]
    );
}

#[test]
fn environment_overrides_file_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.json");
    std::fs::write(
        &path,
        r#"{
  "backend_type": "local",
  "backend_config": {"path": "a.tfstate", "workspace_dir": "w"},
  "aux_inputs": [{"path": "/file/aux"}]
}"#,
    )
    .expect("write config");

    let file = RunConfig::load(&path).expect("load");
    assert_eq!(file.aux_inputs.len(), 1);

    let merged = file.merge(RunConfig::from_vars([
        ("TF_BACKEND_TYPE", "s3"),
        ("TF_BACKEND_CONFIG_path", "b.tfstate"),
    ]));
    assert_eq!(merged.backend_type.as_deref(), Some("s3"));
    assert_eq!(merged.backend_config["path"], "b.tfstate");
    assert_eq!(merged.backend_config["workspace_dir"], "w");
    assert_eq!(merged.aux_inputs[0].path, PathBuf::from("/file/aux"));
}

#[test]
fn unknown_config_fields_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.json");
    std::fs::write(&path, r#"{"backend": "s3"}"#).expect("write config");
    assert!(RunConfig::load(&path).is_err());
}
