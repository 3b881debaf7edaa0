mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod provider;
mod secrets;
mod stack;
mod transport;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use colored::Colorize;
use converge::{CancelFlag, ErrorKind};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: PathBuf,
    pub stack: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let cancel = CancelFlag::new();
    install_interrupt_handler(&cancel);

    match run(cli, cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: Cli, cancel: CancelFlag) -> Result<()> {
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        stack: cli.stack,
    };

    match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Apply(args) => commands::apply::run(&ctx, &args, cancel),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "stackup", &mut io::stdout());
            Ok(())
        }
    }
}

/// First Ctrl-C stops after the calls in flight; a second one exits at once.
fn install_interrupt_handler(cancel: &CancelFlag) {
    let cancel = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!(
            "{} Interrupted, stopping after the current operation (Ctrl-C again to abort)",
            "⚠".yellow()
        );
        cancel.cancel();
    });
    if let Err(e) = installed {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
}

fn engine_error(err: &anyhow::Error) -> Option<&converge::Error> {
    err.chain().find_map(|cause| cause.downcast_ref::<converge::Error>())
}

fn report(err: &anyhow::Error) {
    match engine_error(err) {
        Some(engine) => eprintln!(
            "{}: {engine}",
            format!("error[{}]", engine.kind()).red().bold()
        ),
        None => eprintln!("{}: {err:#}", "error".red().bold()),
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let Some(engine) = engine_error(err) else {
        return 1;
    };
    match engine.kind() {
        kind if kind.is_configuration() => 2,
        ErrorKind::ResourceNotFound => 3,
        ErrorKind::ProviderError | ErrorKind::Drift => 4,
        ErrorKind::UnreachableHost => 5,
        ErrorKind::RemoteCommandFailed | ErrorKind::TransferFailed => 6,
        ErrorKind::Cancelled => 130,
        _ => 70,
    }
}
