//! Run configuration supplied from outside the command line.
//!
//! Pipelines inject backend settings, aux inputs and the plugin cache through
//! prefixed environment variables; the same settings can also be kept in a
//! JSON file passed with `--config`. Environment values win.
use crate::workspace::AuxInput;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const BACKEND_TYPE_VAR: &str = "TF_BACKEND_TYPE";
pub const BACKEND_CONFIG_VAR_PREFIX: &str = "TF_BACKEND_CONFIG_";
pub const AUX_INPUT_PATH_PREFIX: &str = "TF_AUX_INPUT_PATH_";
pub const AUX_INPUT_NAME_PREFIX: &str = "TF_AUX_INPUT_NAME_";
pub const PLUGIN_CACHE_VAR: &str = "TF_PLUGIN_CACHE";
pub const OUTPUT_VAR_FILE_PREFIX: &str = "TF_OUTPUT_VAR_FILE_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,
    pub backend_config: BTreeMap<String, String>,
    pub aux_inputs: Vec<AuxInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_cache: Option<PathBuf>,
    /// Output name to the JSON dump it is read from.
    pub output_var_files: BTreeMap<String, PathBuf>,
}

impl RunConfig {
    /// Build a config from `(name, value)` pairs shaped like the environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        let mut config = RunConfig::default();
        let mut aux = Vec::new();
        for (key, value) in &vars {
            if key == BACKEND_TYPE_VAR {
                config.backend_type = non_empty(value);
            } else if key == PLUGIN_CACHE_VAR {
                config.plugin_cache = non_empty(value).map(PathBuf::from);
            } else if let Some(name) = key.strip_prefix(BACKEND_CONFIG_VAR_PREFIX) {
                config.backend_config.insert(name.to_string(), value.clone());
            } else if let Some(name) = key.strip_prefix(OUTPUT_VAR_FILE_PREFIX) {
                config
                    .output_var_files
                    .insert(name.to_string(), PathBuf::from(value));
            } else if let Some(index) = key.strip_prefix(AUX_INPUT_PATH_PREFIX) {
                let name = vars
                    .get(&format!("{AUX_INPUT_NAME_PREFIX}{index}"))
                    .and_then(|name| non_empty(name));
                aux.push((
                    index.to_string(),
                    AuxInput {
                        path: PathBuf::from(value),
                        name,
                    },
                ));
            }
        }
        aux.sort_by_key(|(index, _)| (index.parse::<u64>().unwrap_or(u64::MAX), index.clone()));
        config.aux_inputs = aux.into_iter().map(|(_, input)| input).collect();
        config
    }

    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        let config: RunConfig =
            serde_json::from_slice(&bytes).context("parse run config JSON")?;
        Ok(config)
    }

    /// Overlay `other` onto `self`: scalars and aux inputs are replaced when
    /// set, map entries are merged key by key.
    pub fn merge(mut self, other: RunConfig) -> Self {
        if other.backend_type.is_some() {
            self.backend_type = other.backend_type;
        }
        if other.plugin_cache.is_some() {
            self.plugin_cache = other.plugin_cache;
        }
        if !other.aux_inputs.is_empty() {
            self.aux_inputs = other.aux_inputs;
        }
        self.backend_config.extend(other.backend_config);
        self.output_var_files.extend(other.output_var_files);
        self
    }

    /// Optional JSON file, then the process environment on top.
    pub fn resolve(config_path: Option<&Path>) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(base.merge(Self::from_env()))
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
