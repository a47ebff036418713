mod exit_codes;
mod external;
mod recon;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit_codes::{exit_code_name, EXIT_ERROR, EXIT_INVALID_CONFIG, EXIT_RUNTIME, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "rappro")]
#[command(about = "Reconcile a bank statement against the accounting books")]
#[command(version)]
#[command(long_version = long_version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reconciliation from a TOML config file (exit 0 = fully reconciled, 5 = items left)
    #[command(after_help = "\
Examples:
  rappro run january.recon.toml
  rappro run january.recon.toml --json
  rappro run january.recon.toml --output result.json --day-tolerance 5
  rappro run january.recon.toml --proposals fuzzy.json
  rappro run january.recon.toml --fuzzy-cmd ./suggest-matches

Logging:
  RAPPRO_LOG=info rappro run january.recon.toml")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pre-computed fuzzy-matcher proposals (JSON array)
        #[arg(long, conflicts_with = "fuzzy_cmd")]
        proposals: Option<PathBuf>,

        /// Program that reads the leftover pools as JSON on stdin and prints proposals
        #[arg(long, value_name = "PROGRAM")]
        fuzzy_cmd: Option<String>,

        /// Seconds to wait for the --fuzzy-cmd program before killing it
        #[arg(long, value_name = "SECS", default_value_t = external::DEFAULT_FUZZY_TIMEOUT.as_secs(), requires = "fuzzy_cmd")]
        fuzzy_timeout: u64,

        /// Override settings.day_tolerance for the initial run
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        day_tolerance: Option<i64>,
    },

    /// Validate a recon config and its extracts without matching
    #[command(after_help = "\
Examples:
  rappro validate january.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("RAPPRO_GIT_HASH"), ")",
        "\nengine:  rappro-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("RAPPRO_TARGET"),
    )
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            json,
            output,
            proposals,
            fuzzy_cmd,
            fuzzy_timeout,
            day_tolerance,
        } => recon::cmd_run(recon::RunArgs {
            config,
            json,
            output,
            proposals,
            fuzzy_cmd,
            fuzzy_timeout: Duration::from_secs(fuzzy_timeout),
            day_tolerance,
        }),
        Commands::Validate { config } => recon::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            log::debug!("exit {code} ({})", exit_code_name(code));
            ExitCode::from(code)
        }
    }
}

/// Route `log` records from the engine to stderr. `RAPPRO_LOG` takes the
/// usual env-filter syntax; default is warnings only.
fn init_logging() {
    let filter = EnvFilter::try_from_env("RAPPRO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(EXIT_INVALID_CONFIG, msg)
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::new(EXIT_RUNTIME, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
