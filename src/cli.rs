//! CLI argument parsing for the pipeline commands.
//!
//! Each subcommand maps onto one pipeline step; backend settings, aux inputs
//! and the plugin cache arrive through `RunConfig` rather than flags.
use crate::workspace::DEFAULT_WORK_DIR;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "tfpipe",
    version,
    about = "Terraform workspace lifecycle for CI/CD pipelines",
    after_help = "Examples:\n  tfpipe plan --source ./infra\n  tfpipe create-plan --source ./infra --archive-output-dir ./plan-out --source-ref-file ./ref\n  tfpipe apply-plan --archive-input-dir ./plan-out --state-output-dir ./state\n  tfpipe output --output-dir ./outputs --target vpc=vpc_id",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding the ephemeral `terraform/` workspace
    #[arg(long, global = true, value_name = "DIR", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// Terraform binary name or path
    #[arg(long, global = true, value_name = "BIN", default_value = crate::runner::TERRAFORM_BIN)]
    pub terraform_bin: String,

    /// Log full command lines and archive contents (may expose credentials)
    #[arg(long, global = true)]
    pub debug: bool,

    /// JSON run config; prefixed environment variables override it
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the terraform version
    Version,
    /// Stage the workspace and run `terraform init`
    Init(InitArgs),
    /// Init, then plan against the fresh workspace
    Plan(PlanArgs),
    /// Init, then apply without a plan artifact
    Apply(ApplyArgs),
    /// Init, plan to an artifact and archive the workspace
    CreatePlan(CreatePlanArgs),
    /// Restore an archived workspace and show its plan
    ShowPlan(ShowPlanArgs),
    /// Restore an archived workspace and apply its plan
    ApplyPlan(ApplyPlanArgs),
    /// Extract outputs from state into JSON files
    Output(OutputArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Terraform configuration to copy into the workspace
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Configuration directory inside the workspace
    #[arg(long, value_name = "PATH")]
    pub sub_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub workspace: SourceArgs,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub workspace: SourceArgs,

    /// Existing state file to plan against
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Succeed when the plan reports no changes
    #[arg(long)]
    pub allow_no_changes: bool,

    /// Plan the destruction of all managed resources
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub workspace: SourceArgs,

    /// Existing state file to apply against
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Copy the resulting state and its backup here, even on failure
    #[arg(long, value_name = "DIR")]
    pub state_output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CreatePlanArgs {
    #[command(flatten)]
    pub workspace: SourceArgs,

    /// Where the workspace archive is written
    #[arg(long, value_name = "DIR")]
    pub archive_output_dir: PathBuf,

    /// Plan artifact path inside the workspace
    #[arg(long, value_name = "PATH")]
    pub plan_file: Option<PathBuf>,

    /// Existing state file to plan against
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Source revision appended to the archive version
    #[arg(long, value_name = "REF", conflicts_with = "source_ref_file")]
    pub source_ref: Option<String>,

    /// File whose first line is the source revision
    #[arg(long, value_name = "PATH")]
    pub source_ref_file: Option<PathBuf>,

    /// Archive the workspace even when the plan reports no changes
    #[arg(long)]
    pub allow_no_changes: bool,

    /// Plan the destruction of all managed resources
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Args, Debug)]
pub struct ShowPlanArgs {
    /// Directory holding exactly one workspace archive
    #[arg(long, value_name = "DIR")]
    pub archive_input_dir: PathBuf,

    /// Plan artifact path inside the workspace
    #[arg(long, value_name = "PATH")]
    pub plan_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ApplyPlanArgs {
    /// Directory holding exactly one workspace archive
    #[arg(long, value_name = "DIR")]
    pub archive_input_dir: PathBuf,

    /// Plan artifact path inside the workspace
    #[arg(long, value_name = "PATH")]
    pub plan_file: Option<PathBuf>,

    /// Copy the resulting state and its backup here, even on failure
    #[arg(long, value_name = "DIR")]
    pub state_output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Where output JSON files are copied
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Write output NAME to FILE.json (repeatable)
    #[arg(long = "target", value_name = "FILE=NAME", value_parser = parse_target)]
    pub targets: Vec<(String, String)>,

    /// State file to read outputs from
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,
}

fn parse_target(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((file, name)) if !file.is_empty() && !name.is_empty() => {
            Ok((file.to_string(), name.to_string()))
        }
        _ => Err(format!("expected FILE=NAME, got {raw:?}")),
    }
}
