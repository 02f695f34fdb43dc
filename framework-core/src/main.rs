//! Session lock and crash-recovery coordinator CLI.
//!
//! Each command prints exactly one JSON report to stdout and exits with
//! `0` (success), `1` (error) or `2` (needs input).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::error;

use framework_core::cold_start::cold_start;
use framework_core::completion::completion;
use framework_core::exit_codes;
use framework_core::io::paths::WorkspacePaths;
use framework_core::logging;
use framework_core::report::CommandReport;
use framework_core::session::Session;

#[derive(Parser)]
#[command(
    name = "framework-core",
    version,
    about = "Workspace session lock, crash recovery and maintenance batch runner"
)]
struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Take the session lock, check for a crashed session and run the startup batch.
    ColdStart,
    /// Summarize the workspace, mark the session clean and release the lock.
    Completion,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::ColdStart => framework_core::cold_start::COMMAND,
            Self::Completion => framework_core::completion::COMMAND,
        }
    }
}

/// `command` of reports for invocations that never got as far as a subcommand.
const CLI_NAME: &str = "framework-core";

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Help and version go to stdout with exit 0.
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            eprint!("{}", err.render());
            logging::init(None);
            emit(&CommandReport::fatal(CLI_NAME, &usage_error(&err)));
        }
    };
    let name = cli.command.name();

    let root = match workspace_root(&cli.root) {
        Ok(root) => root,
        Err(err) => {
            logging::init(None);
            error!(command = name, err = %format!("{err:#}"), "invalid workspace root");
            emit(&CommandReport::fatal(name, &err));
        }
    };

    let paths = WorkspacePaths::new(&root);
    logging::init(Some(&logging::run_log_path(&paths.log_dir, name, Utc::now())));

    let report = run(&cli.command, &root).unwrap_or_else(|err| {
        error!(command = name, err = %format!("{err:#}"), "command failed");
        CommandReport::fatal(name, &err)
    });
    emit(&report);
}

/// Print the report and exit with its code.
fn emit(report: &CommandReport) -> ! {
    match report.to_json() {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
    std::process::exit(report.exit_code());
}

/// First line of a clap error, without its `error:` prefix.
fn usage_error(err: &clap::Error) -> anyhow::Error {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    anyhow!(
        "invalid command line: {}",
        first.trim_start_matches("error:").trim()
    )
}

/// The workspace must already exist; nothing is created for a mistyped path.
fn workspace_root(raw: &Path) -> Result<PathBuf> {
    let root = raw
        .canonicalize()
        .with_context(|| format!("workspace root {}", raw.display()))?;
    if !root.is_dir() {
        bail!("workspace root {} is not a directory", root.display());
    }
    Ok(root)
}

fn run(command: &Command, root: &Path) -> Result<CommandReport> {
    let session = Session::open(root)?;
    match command {
        Command::ColdStart => cold_start(&session),
        Command::Completion => completion(&session),
    }
}
