//! Sequences workspace staging and tool calls into the init, plan, apply,
//! show and output lifecycle of a single workspace.
use crate::archive;
use crate::error::{require_file, require_path, TfError};
use crate::runner::{Invocation, LogSink, Outcome, OutputSink, Terraform};
use crate::workspace::{AuxInput, Workspace, OUTPUT_FILE_SUFFIX, PLAN_FILE_NAME};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where a workspace is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uninitialized,
    Initialized,
    /// Populated from an archive; behaves like `Initialized`.
    Restored,
    Planned,
    Applied,
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub source_dir: Option<PathBuf>,
    /// Configuration directory inside the workspace, passed as `-chdir`.
    pub sub_path: Option<PathBuf>,
    pub aux_inputs: Vec<AuxInput>,
    pub backend_type: Option<String>,
    pub backend_config: BTreeMap<String, String>,
    /// External plugin cache seeded before init and flushed after it.
    pub plugin_cache: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub sub_path: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub create_plan_file: bool,
    /// Workspace-relative artifact path; `.tfplan` when creating one.
    pub plan_file: Option<PathBuf>,
    pub output_var_files: BTreeMap<String, PathBuf>,
    pub error_on_no_changes: bool,
    pub destroy: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            sub_path: None,
            state_file: None,
            create_plan_file: false,
            plan_file: None,
            output_var_files: BTreeMap::new(),
            error_on_no_changes: true,
            destroy: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ApplySource {
    /// Apply the configuration directly, approving automatically.
    Fresh {
        state_file: Option<PathBuf>,
        output_var_files: BTreeMap<String, PathBuf>,
    },
    /// Apply a previously written plan artifact (workspace-relative).
    PlanArtifact { plan_file: Option<PathBuf> },
}

impl Default for ApplySource {
    fn default() -> Self {
        ApplySource::Fresh {
            state_file: None,
            output_var_files: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub sub_path: Option<PathBuf>,
    pub source: ApplySource,
    /// State and backup are copied here whether or not the apply succeeds.
    pub state_output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub sub_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// File stem to output name; empty dumps everything to `tf-output.json`.
    pub targets: BTreeMap<String, String>,
    pub state_file: Option<PathBuf>,
}

pub struct Orchestrator {
    terraform: Terraform,
    workspace: Workspace,
    sink: Box<dyn OutputSink>,
    stage: Stage,
}

impl Orchestrator {
    pub fn new(terraform: Terraform, workspace: Workspace) -> Self {
        Self {
            terraform,
            workspace,
            sink: Box::new(LogSink),
            stage: Stage::Uninitialized,
        }
    }

    /// Adopt a workspace that an earlier process already initialized.
    pub fn attach(terraform: Terraform, workspace: Workspace) -> Self {
        Self {
            stage: Stage::Initialized,
            ..Self::new(terraform, workspace)
        }
    }

    pub fn with_sink(mut self, sink: impl OutputSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn version(&mut self) -> Result<()> {
        self.run(Invocation::new("version"))?;
        Ok(())
    }

    /// Rebuild the workspace from scratch and run `init` in it.
    pub fn init(&mut self, options: &InitOptions) -> Result<()> {
        if let Some(cache) = &options.plugin_cache {
            require_path(cache, "plugin cache dir")?;
        }
        self.workspace.reset(options.source_dir.as_deref())?;
        self.stage = Stage::Uninitialized;
        self.workspace.copy_aux_inputs(&options.aux_inputs)?;
        let backend_type = options
            .backend_type
            .as_deref()
            .filter(|backend_type| !backend_type.is_empty());
        if let Some(backend_type) = backend_type {
            self.workspace
                .write_backend_file(backend_type, options.sub_path.as_deref())?;
        }
        self.workspace.ensure_plugin_cache_dir()?;
        if let Some(cache) = &options.plugin_cache {
            self.workspace.import_plugin_cache(cache)?;
        }

        let invocation = self
            .invocation("init", options.sub_path.as_deref())
            .flag("-input=false")
            .flags(
                options
                    .backend_config
                    .iter()
                    .map(|(key, value)| format!("-backend-config={key}={value}")),
            );
        self.run(invocation)?;

        if let Some(cache) = &options.plugin_cache {
            self.workspace.export_plugin_cache(cache)?;
        }
        self.stage = Stage::Initialized;
        Ok(())
    }

    /// Rebuild the workspace from the single archive in `archive_input_dir`.
    pub fn restore(&mut self, archive_input_dir: &Path) -> Result<PathBuf> {
        require_path(archive_input_dir, "archive_input_dir")?;
        archive::find_archive(archive_input_dir)?;
        self.workspace.reset(None)?;
        self.stage = Stage::Uninitialized;
        let path = archive::restore(archive_input_dir, self.workspace.root())?;
        self.workspace.ensure_plugin_cache_dir()?;
        self.stage = Stage::Restored;
        Ok(path)
    }

    /// Snapshot the workspace into `output_dir`.
    pub fn archive(&self, output_dir: &Path, version: &str) -> Result<PathBuf> {
        self.require_ready()?;
        archive::create(
            self.workspace.root(),
            output_dir,
            version,
            self.terraform.debug(),
        )
    }

    /// Run `plan` with detailed exit codes. Returns the workspace-relative
    /// plan artifact when one was requested.
    pub fn plan(&mut self, options: &PlanOptions) -> Result<Option<PathBuf>> {
        self.require_ready()?;
        let plan_file = options.create_plan_file.then(|| {
            options
                .plan_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(PLAN_FILE_NAME))
        });
        let state = self.import_state(options.state_file.as_deref())?;
        let var_files = self
            .workspace
            .import_output_var_files(&options.output_var_files)?;

        let mut invocation = self
            .invocation("plan", options.sub_path.as_deref())
            .flag("-input=false")
            .detailed_exitcode()
            .error_on_no_changes(options.error_on_no_changes);
        if let Some(plan_file) = &plan_file {
            invocation = invocation.flag(format!(
                "-out={}",
                self.workspace.resolve(plan_file).display()
            ));
        }
        if let Some(state) = &state {
            invocation = invocation.flag(format!("-state={}", state.display()));
        }
        invocation = invocation.flags(
            var_files
                .iter()
                .map(|path| format!("-var-file={}", path.display())),
        );
        if options.destroy {
            invocation = invocation.flag("-destroy");
        }

        let outcome = self.run(invocation)?;
        tracing::info!(outcome = ?outcome, destroy = options.destroy, "plan complete");
        if let Some(plan_file) = &plan_file {
            tracing::info!("wrote plan file to: {}", plan_file.display());
            self.stage = Stage::Planned;
        }
        Ok(plan_file)
    }

    /// Run `apply`; when `state_output_dir` is set the state files are
    /// exported afterwards even if the apply fails.
    pub fn apply(&mut self, options: &ApplyOptions) -> Result<()> {
        self.require_ready()?;
        if let Some(dir) = &options.state_output_dir {
            require_path(dir, "state_output_dir")?;
        }
        let mut invocation = self
            .invocation("apply", options.sub_path.as_deref())
            .flag("-input=false");
        match &options.source {
            ApplySource::Fresh {
                state_file,
                output_var_files,
            } => {
                let state = self.import_state(state_file.as_deref())?;
                let var_files = self.workspace.import_output_var_files(output_var_files)?;
                invocation = invocation.flag("-auto-approve");
                if let Some(state) = &state {
                    invocation = invocation.flag(format!("-state={}", state.display()));
                }
                invocation = invocation
                    .flags(var_files.iter().map(|path| format!("-var-file={}", path.display())));
            }
            ApplySource::PlanArtifact { plan_file } => {
                let plan_file = self.plan_path(plan_file.as_deref());
                require_file(&plan_file, "plan file")?;
                invocation = invocation.arg(plan_file.display().to_string());
            }
        }

        let result = self.run(invocation);
        let exported = options
            .state_output_dir
            .as_deref()
            .map(|dir| self.workspace.export_state(dir));
        match (result, exported) {
            (Err(err), Some(Err(export_err))) => {
                tracing::warn!(
                    error = %format!("{export_err:#}"),
                    "state export failed after apply failure"
                );
                Err(err)
            }
            (Err(err), _) => Err(err),
            (Ok(_), Some(Err(export_err))) => Err(export_err),
            (Ok(_), _) => {
                self.stage = Stage::Applied;
                Ok(())
            }
        }
    }

    /// Render a plan artifact without applying it.
    pub fn show(&mut self, plan_file: Option<&Path>) -> Result<()> {
        self.require_ready()?;
        let plan_file = self.plan_path(plan_file);
        require_file(&plan_file, "plan file")?;
        let invocation = self
            .invocation("show", None)
            .arg(plan_file.display().to_string());
        self.run(invocation)?;
        Ok(())
    }

    /// Extract outputs as JSON and copy each produced file to `output_dir`.
    pub fn output(&mut self, options: &OutputOptions) -> Result<Vec<PathBuf>> {
        self.require_ready()?;
        require_path(&options.output_dir, "output_dir")?;
        let state = self.import_state(options.state_file.as_deref())?;
        let mut invocation = self
            .invocation("output", options.sub_path.as_deref())
            .flag("-json");
        if let Some(state) = &state {
            invocation = invocation.flag(format!("-state={}", state.display()));
        }

        if options.targets.is_empty() {
            let path = self.workspace.default_output_path();
            self.run(invocation.redirect_to(&path))?;
            let exported = self.workspace.export_output_file(&path, &options.output_dir)?;
            return Ok(vec![exported]);
        }

        let scratch = tempfile::NamedTempFile::new().context("create output scratch file")?;
        self.run(invocation.redirect_to(scratch.path()))?;
        let bytes = fs::read(scratch.path()).context("read terraform output")?;
        let all: Value = serde_json::from_slice(&bytes).context("parse terraform output")?;

        let mut exported = Vec::with_capacity(options.targets.len());
        for (stem, name) in &options.targets {
            let item = all.get(name).ok_or_else(|| TfError::OutputNotFound {
                name: name.clone(),
            })?;
            let path = self
                .workspace
                .root()
                .join(format!("{stem}{OUTPUT_FILE_SUFFIX}"));
            let text = serde_json::to_string_pretty(item).context("serialize output")?;
            fs::write(&path, text.as_bytes())
                .with_context(|| format!("write {}", path.display()))?;
            exported.push(self.workspace.export_output_file(&path, &options.output_dir)?);
        }
        Ok(exported)
    }

    fn require_ready(&self) -> Result<()> {
        if self.stage == Stage::Uninitialized {
            return Err(TfError::NotInitialized {
                path: self.workspace.root().to_path_buf(),
            }
            .into());
        }
        Ok(())
    }

    /// Absolute path of the imported state, for `-state=`.
    fn import_state(&self, state_file: Option<&Path>) -> Result<Option<PathBuf>> {
        match state_file {
            Some(path) => {
                let rel = self.workspace.import_state(path)?;
                Ok(Some(self.workspace.resolve(&rel)))
            }
            None => Ok(None),
        }
    }

    fn plan_path(&self, plan_file: Option<&Path>) -> PathBuf {
        self.workspace
            .resolve(plan_file.unwrap_or(Path::new(PLAN_FILE_NAME)))
    }

    fn invocation(&self, verb: &str, sub_path: Option<&Path>) -> Invocation {
        let cache = self.workspace.plugin_cache_dir();
        Invocation::new(verb)
            .working_dir(self.workspace.root())
            .chdir(sub_path)
            .plugin_cache_dir(Some(cache.as_path()))
    }

    fn run(&mut self, invocation: Invocation) -> Result<Outcome> {
        let verb = invocation.verb().to_string();
        self.terraform
            .run(&invocation, self.sink.as_mut())
            .with_context(|| format!("terraform {verb} in {}", self.workspace.root().display()))
    }
}
