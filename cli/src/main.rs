//! modquery CLI - one-shot symbol and type lookups from the shell.
//!
//! ```text
//! modquery info <file> <symbol>
//! modquery type <file> <line> <col>
//! modquery root <path>
//! ```
//!
//! Each invocation finds the file's project root, starts the analysis tool
//! there, runs a single query and prints the result. Unsaved editor buffers
//! don't exist here, so the tool reads every file from disk.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use modquery_session::{
    NoDocuments, QueryOutcome, SessionRegistry, ToolConfig, ToolError, config_path, format_hover,
};

/// Exit status when the tool executable could not be launched. Usage errors
/// exit with 2.
const EXIT_FAILED_TO_START: u8 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "modquery",
    version,
    about = "Symbol and type lookups for Haskell projects",
    arg_required_else_help = true,
    after_help = "Configuration is read from ~/.modquery/config.toml; MODQUERY_EXECUTABLE
overrides the tool executable."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Show the definition and location of a symbol as seen from a file
    Info { file: PathBuf, symbol: String },
    /// Show the type of the expression at a position
    Type {
        file: PathBuf,
        /// 1-based line
        line: u32,
        /// 0-based column
        col: u32,
    },
    /// Print the project root a path belongs to
    Root { path: PathBuf },
}

/// `file` as an absolute path. The tool runs in the project root, not the
/// caller's directory.
fn absolute_file(file: &Path) -> Result<PathBuf> {
    std::path::absolute(file).with_context(|| format!("resolving {}", file.display()))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    // stdout carries results; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Print `err` and return the process exit status for it.
fn report_tool_error(err: &ToolError) -> u8 {
    eprintln!("Error: {err}");
    if err.is_failed_to_start() {
        let location = config_path().map_or_else(
            || "the config file".to_string(),
            |path| path.display().to_string(),
        );
        eprintln!(
            "hint: set `executable` in {location} or MODQUERY_EXECUTABLE to a working stack or ghc-mod"
        );
        return EXIT_FAILED_TO_START;
    }
    1
}

async fn run(command: Command, config: ToolConfig) -> Result<ExitCode> {
    let registry = SessionRegistry::new(config, Arc::new(NoDocuments));

    let output = match command {
        Command::Root { path } => {
            let root = registry.project_root(&path);
            if root.as_os_str().is_empty() {
                eprintln!("{} is not inside a project", path.display());
                return Ok(ExitCode::FAILURE);
            }
            root.display().to_string()
        }
        Command::Info { file, symbol } => {
            let file = absolute_file(&file)?;
            let session = registry
                .session_for(&file)
                .context("starting query session")?;
            let outcome = session.find_symbol(&file, symbol).await;
            match outcome {
                QueryOutcome::Completed(Ok(info)) => {
                    let mut text = format_hover(None, Some(&info));
                    if let Some((target, line, col)) = info.target_in(session.root()) {
                        text.push_str(&format!("\n{}:{line}:{}", target.display(), col + 1));
                    }
                    text
                }
                QueryOutcome::Completed(Err(err)) => {
                    return Ok(ExitCode::from(report_tool_error(&err)));
                }
                QueryOutcome::Cancelled => bail!("query was cancelled"),
            }
        }
        Command::Type { file, line, col } => {
            let file = absolute_file(&file)?;
            let session = registry
                .session_for(&file)
                .context("starting query session")?;
            match session.type_at(&file, line, col).await {
                QueryOutcome::Completed(Ok(ty)) => format_hover(Some(ty.as_str()), None),
                QueryOutcome::Completed(Err(err)) => {
                    return Ok(ExitCode::from(report_tool_error(&err)));
                }
                QueryOutcome::Cancelled => bail!("query was cancelled"),
            }
        }
    };

    println!("{output}");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let config = match ToolConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
