//! Pipeline commands composed from orchestrator steps.
//!
//! Every command starts from a clean workspace: either a fresh init from
//! source or a restore from the archive a previous stage produced.
use crate::archive;
use crate::cli::{
    ApplyArgs, ApplyPlanArgs, Command, CreatePlanArgs, InitArgs, OutputArgs, PlanArgs, RootArgs,
    ShowPlanArgs, SourceArgs,
};
use crate::config::RunConfig;
use crate::orchestrator::{
    ApplyOptions, ApplySource, InitOptions, Orchestrator, OutputOptions, PlanOptions,
};
use crate::runner::Terraform;
use crate::workspace::Workspace;
use anyhow::Result;
use std::path::PathBuf;

/// Resolve configuration and the tool binary, then run one command.
pub fn run(args: RootArgs) -> Result<()> {
    let config = RunConfig::resolve(args.global.config.as_deref())?;
    let terraform = Terraform::locate(&args.global.terraform_bin)?.with_debug(args.global.debug);
    let workspace = Workspace::in_work_dir(&args.global.work_dir)?;
    tracing::debug!(
        terraform = %terraform.binary().display(),
        workspace = %workspace.root().display(),
        "resolved pipeline inputs"
    );
    let mut orchestrator = Orchestrator::new(terraform, workspace);
    execute(&mut orchestrator, args.command, &config)
}

pub fn execute(
    orchestrator: &mut Orchestrator,
    command: Command,
    config: &RunConfig,
) -> Result<()> {
    match command {
        Command::Version => orchestrator.version(),
        Command::Init(args) => run_init(orchestrator, args, config),
        Command::Plan(args) => run_plan(orchestrator, args, config),
        Command::Apply(args) => run_apply(orchestrator, args, config),
        Command::CreatePlan(args) => run_create_plan(orchestrator, args, config),
        Command::ShowPlan(args) => run_show_plan(orchestrator, args),
        Command::ApplyPlan(args) => run_apply_plan(orchestrator, args),
        Command::Output(args) => run_output(orchestrator, args, config),
    }
}

fn init_options(source: &SourceArgs, config: &RunConfig) -> InitOptions {
    InitOptions {
        source_dir: source.source.clone(),
        sub_path: source.sub_path.clone(),
        aux_inputs: config.aux_inputs.clone(),
        backend_type: config.backend_type.clone(),
        backend_config: config.backend_config.clone(),
        plugin_cache: config.plugin_cache.clone(),
    }
}

fn run_init(orchestrator: &mut Orchestrator, args: InitArgs, config: &RunConfig) -> Result<()> {
    orchestrator.init(&init_options(&args.workspace, config))
}

fn run_plan(orchestrator: &mut Orchestrator, args: PlanArgs, config: &RunConfig) -> Result<()> {
    orchestrator.init(&init_options(&args.workspace, config))?;
    orchestrator.plan(&PlanOptions {
        sub_path: args.workspace.sub_path,
        state_file: args.state_file,
        output_var_files: config.output_var_files.clone(),
        error_on_no_changes: !args.allow_no_changes,
        destroy: args.destroy,
        ..PlanOptions::default()
    })?;
    Ok(())
}

fn run_apply(orchestrator: &mut Orchestrator, args: ApplyArgs, config: &RunConfig) -> Result<()> {
    orchestrator.init(&init_options(&args.workspace, config))?;
    orchestrator.apply(&ApplyOptions {
        sub_path: args.workspace.sub_path,
        source: ApplySource::Fresh {
            state_file: args.state_file,
            output_var_files: config.output_var_files.clone(),
        },
        state_output_dir: args.state_output_dir,
    })
}

fn run_create_plan(
    orchestrator: &mut Orchestrator,
    args: CreatePlanArgs,
    config: &RunConfig,
) -> Result<()> {
    orchestrator.init(&init_options(&args.workspace, config))?;
    orchestrator.plan(&PlanOptions {
        sub_path: args.workspace.sub_path,
        state_file: args.state_file,
        create_plan_file: true,
        plan_file: args.plan_file,
        output_var_files: config.output_var_files.clone(),
        error_on_no_changes: !args.allow_no_changes,
        destroy: args.destroy,
    })?;
    let version = archive::archive_version(
        args.source_ref.as_deref(),
        args.source_ref_file.as_deref(),
        None,
    )?;
    let path = orchestrator.archive(&args.archive_output_dir, &version)?;
    tracing::info!(version = %version, "plan archive ready at {}", path.display());
    Ok(())
}

fn run_show_plan(orchestrator: &mut Orchestrator, args: ShowPlanArgs) -> Result<()> {
    orchestrator.restore(&args.archive_input_dir)?;
    orchestrator.show(args.plan_file.as_deref())
}

fn run_apply_plan(orchestrator: &mut Orchestrator, args: ApplyPlanArgs) -> Result<()> {
    orchestrator.restore(&args.archive_input_dir)?;
    orchestrator.apply(&ApplyOptions {
        source: ApplySource::PlanArtifact {
            plan_file: args.plan_file,
        },
        state_output_dir: args.state_output_dir,
        ..ApplyOptions::default()
    })
}

fn run_output(orchestrator: &mut Orchestrator, args: OutputArgs, config: &RunConfig) -> Result<()> {
    orchestrator.init(&init_options(&SourceArgs::default(), config))?;
    let exported: Vec<PathBuf> = orchestrator.output(&OutputOptions {
        output_dir: args.output_dir,
        targets: args.targets.into_iter().collect(),
        state_file: args.state_file,
        ..OutputOptions::default()
    })?;
    tracing::info!(files = exported.len(), "outputs exported");
    Ok(())
}
