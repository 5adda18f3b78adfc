use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use tfpipe::cli::RootArgs;
use tfpipe::error::is_no_changes;

/// Exit status for a strict-mode plan that found nothing to do.
const NO_CHANGES_EXIT: u8 = 3;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.global.debug);

    match tfpipe::workflow::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_no_changes(&err) => {
            tracing::warn!("{err:#}");
            ExitCode::from(NO_CHANGES_EXIT)
        }
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "tfpipe=debug,terraform=debug"
    } else {
        "tfpipe=info,terraform=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}
