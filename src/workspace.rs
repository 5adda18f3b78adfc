//! Typed paths into a Terraform workspace and the staging operations around it.
//!
//! A workspace is the ephemeral directory the tool runs in. Centralizing path
//! construction keeps the layout consistent across init, plan, apply and the
//! archive handoff.
use crate::error::{require_file, require_path, TfError};
use crate::fsutil::{copy_tree, remove_path, Symlinks};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const WORKSPACE_DIR_NAME: &str = "terraform";
pub const DEFAULT_WORK_DIR: &str = "/tmp/tfwork";
pub const BACKEND_FILE_NAME: &str = "backend.tf";
pub const PLUGIN_CACHE_DIR_NAME: &str = ".tfcache";
pub const PLAN_FILE_NAME: &str = ".tfplan";
pub const STATE_FILE_NAME: &str = "terraform.tfstate";
pub const BACKUP_STATE_FILE_NAME: &str = "terraform.tfstate.backup";
pub const OUTPUT_FILE_NAME: &str = "tf-output.json";
pub const OUTPUT_FILE_SUFFIX: &str = ".json";
pub const VAR_FILE_SUFFIX: &str = ".tfvars.json";

/// Extra directory tree merged into the workspace after the primary source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxInput {
    pub path: PathBuf,
    /// Subdirectory to copy into; the workspace root when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        require_path(&root, "terraform_dir")?;
        // Tool calls run with the workspace as cwd; keep every derived path
        // independent of the caller's cwd.
        let root =
            std::path::absolute(&root).with_context(|| format!("resolve {}", root.display()))?;
        Ok(Self { root })
    }

    /// The workspace directory inside a work dir.
    pub fn in_work_dir(work_dir: &Path) -> Result<Self> {
        require_path(work_dir, "terraform_work_dir")?;
        Self::new(work_dir.join(WORKSPACE_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE_NAME)
    }

    pub fn backup_state_path(&self) -> PathBuf {
        self.root.join(BACKUP_STATE_FILE_NAME)
    }

    pub fn plugin_cache_dir(&self) -> PathBuf {
        self.root.join(PLUGIN_CACHE_DIR_NAME)
    }

    pub fn default_output_path(&self) -> PathBuf {
        self.root.join(OUTPUT_FILE_NAME)
    }

    /// Resolve a workspace-relative reference (plan file, sub path).
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    /// Delete the workspace if present, recreate it empty, then copy `source`
    /// into it. Links are kept as links.
    pub fn reset(&self, source: Option<&Path>) -> Result<()> {
        if let Some(source) = source {
            require_path(source, "terraform_source_dir")?;
            if !source.is_dir() {
                return Err(TfError::NotFound {
                    what: "terraform source dir",
                    path: source.to_path_buf(),
                }
                .into());
            }
        }
        remove_path(&self.root)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create workspace {}", self.root.display()))?;
        if let Some(source) = source {
            let copied = copy_tree(source, &self.root, Symlinks::Preserve)?;
            tracing::info!(
                source = %source.display(),
                files = copied.len(),
                "populated workspace {}",
                self.root.display()
            );
        }
        Ok(())
    }

    /// Overlay each aux input onto the workspace, in order.
    pub fn copy_aux_inputs(&self, inputs: &[AuxInput]) -> Result<()> {
        for input in inputs {
            require_path(&input.path, "aux input path")?;
            let dest = match input.name.as_deref().filter(|name| !name.is_empty()) {
                Some(name) => self.root.join(name),
                None => self.root.clone(),
            };
            copy_tree(&input.path, &dest, Symlinks::Preserve)
                .with_context(|| format!("copy aux input {}", input.path.display()))?;
            tracing::info!(
                source = %input.path.display(),
                "copied aux input to {}",
                dest.display()
            );
        }
        Ok(())
    }

    /// Write `backend.tf` declaring `backend_type`, into `sub_path` when given.
    ///
    /// Refuses to replace an existing backend file.
    pub fn write_backend_file(
        &self,
        backend_type: &str,
        sub_path: Option<&Path>,
    ) -> Result<PathBuf> {
        if backend_type.is_empty() {
            return Err(TfError::EmptyArgument("backend_type").into());
        }
        if !backend_type
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        {
            return Err(TfError::UnsupportedBackendType(backend_type.to_string()).into());
        }
        let dir = match sub_path {
            Some(sub) => self.resolve(sub),
            None => self.root.clone(),
        };
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(BACKEND_FILE_NAME);
        if path.exists() {
            return Err(TfError::BackendFileExists { path }.into());
        }
        let contents = backend_file_contents(backend_type);
        fs::write(&path, contents.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        tracing::debug!(backend_type, "created backend file {}", path.display());
        Ok(path)
    }

    /// Copy an external state file to the canonical state name.
    ///
    /// Returns the workspace-relative reference to pass back to the tool.
    pub fn import_state(&self, state_file: &Path) -> Result<PathBuf> {
        require_path(state_file, "state_file_path")?;
        require_file(state_file, "state file")?;
        let dest = self.state_path();
        fs::copy(state_file, &dest).with_context(|| {
            format!("import state {} to {}", state_file.display(), dest.display())
        })?;
        tracing::info!("imported state file {} to: {}", state_file.display(), dest.display());
        Ok(PathBuf::from(STATE_FILE_NAME))
    }

    /// Copy the state file and its backup out, skipping whichever is absent.
    pub fn export_state(&self, output_dir: &Path) -> Result<Vec<PathBuf>> {
        require_path(output_dir, "state_output_dir")?;
        fs::create_dir_all(output_dir)
            .with_context(|| format!("create {}", output_dir.display()))?;
        let mut exported = Vec::new();
        for name in [STATE_FILE_NAME, BACKUP_STATE_FILE_NAME] {
            let source = self.root.join(name);
            if !source.is_file() {
                continue;
            }
            let dest = output_dir.join(name);
            fs::copy(&source, &dest)
                .with_context(|| format!("export {} to {}", source.display(), dest.display()))?;
            tracing::info!("exported {name} to: {}", dest.display());
            exported.push(dest);
        }
        Ok(exported)
    }

    /// Convert output dumps into `<name>.tfvars.json` files in the workspace.
    ///
    /// Dumps that yield no values produce no file. Returns the written paths.
    pub fn import_output_var_files(
        &self,
        output_var_files: &BTreeMap<String, PathBuf>,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (name, path) in output_var_files {
            let bytes =
                fs::read(path).with_context(|| format!("read output var file {}", path.display()))?;
            let dump: Value = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse output var file {}", path.display()))?;
            let vars = output_dump_to_vars(name, &dump);
            if vars.is_empty() {
                tracing::warn!(name = %name, "output var file {} has no values", path.display());
                continue;
            }
            let dest = self.root.join(format!("{name}{VAR_FILE_SUFFIX}"));
            let text = serde_json::to_string(&vars).context("serialize var file")?;
            fs::write(&dest, text.as_bytes()).with_context(|| format!("write {}", dest.display()))?;
            tracing::debug!("wrote var file {}", dest.display());
            written.push(dest);
        }
        Ok(written)
    }

    /// Create the plugin cache dir if missing and return it.
    pub fn ensure_plugin_cache_dir(&self) -> Result<PathBuf> {
        let dir = self.plugin_cache_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }

    /// Seed the plugin cache from an external location.
    pub fn import_plugin_cache(&self, from: &Path) -> Result<()> {
        require_path(from, "plugin cache dir")?;
        let dir = self.ensure_plugin_cache_dir()?;
        if !from.is_dir() {
            tracing::info!("plugin cache {} is empty, nothing to import", from.display());
            return Ok(());
        }
        copy_tree(from, &dir, Symlinks::Preserve)
            .with_context(|| format!("import plugin cache {}", from.display()))?;
        Ok(())
    }

    /// Flush the plugin cache back out for the next run.
    pub fn export_plugin_cache(&self, to: &Path) -> Result<()> {
        require_path(to, "plugin cache dir")?;
        let dir = self.plugin_cache_dir();
        if !dir.is_dir() {
            return Ok(());
        }
        copy_tree(&dir, to, Symlinks::Preserve)
            .with_context(|| format!("export plugin cache to {}", to.display()))?;
        Ok(())
    }

    /// Copy `path/file.ext` to `output_dir/file.ext`.
    pub fn export_output_file(&self, path: &Path, output_dir: &Path) -> Result<PathBuf> {
        require_path(output_dir, "output_dir")?;
        fs::create_dir_all(output_dir)
            .with_context(|| format!("create {}", output_dir.display()))?;
        let file_name = path
            .file_name()
            .with_context(|| format!("output path {} has no file name", path.display()))?;
        let dest = output_dir.join(file_name);
        fs::copy(path, &dest)
            .with_context(|| format!("export {} to {}", path.display(), dest.display()))?;
        tracing::info!("exported output to: {}", dest.display());
        Ok(dest)
    }
}

pub fn backend_file_contents(backend_type: &str) -> String {
    format!("terraform {{\n    backend \"{backend_type}\" {{}}\n}}\n")
}

/// Flatten an output dump into variables.
///
/// `{"value": v}` becomes `{name: v}`; otherwise every entry carrying a
/// `value` field contributes `{key: value}`.
pub fn output_dump_to_vars(name: &str, dump: &Value) -> Map<String, Value> {
    let mut vars = Map::new();
    let Some(object) = dump.as_object() else {
        return vars;
    };
    if let Some(value) = object.get("value") {
        vars.insert(name.to_string(), value.clone());
        return vars;
    }
    for (key, item) in object {
        if let Some(value) = item.as_object().and_then(|item| item.get("value")) {
            vars.insert(key.clone(), value.clone());
        }
    }
    vars
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
