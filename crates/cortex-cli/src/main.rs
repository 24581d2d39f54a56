//! `cortex` – command line entry point of the G1 cortex.
//!
//! ```text
//! cortex run      --config g1.json5 [--dev] [--log-level debug]
//! cortex status   --config g1.json5
//! cortex validate --config g1.json5
//! cortex test     --config g1.json5 --duration 10
//! cortex version
//! ```
//!
//! Ctrl-C during `run` or `test` emergency-stops every actuator and then
//! tears the runtime down.  A second Ctrl-C exits immediately.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use cortex_types::CortexError;

#[derive(Parser, Debug)]
#[command(name = "cortex", version, about = "LLM-driven fusion loop for the Unitree G1", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `cortex_runtime=debug` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the loop until Ctrl-C
    Run {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
        /// Enable debug mode and the web debug interface
        #[arg(long)]
        dev: bool,
    },
    /// Initialize once and print the runtime status as JSON
    Status {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
    },
    /// Check a configuration file without touching hardware
    Validate {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
    },
    /// Run the loop for a bounded time and print the metrics
    Test {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
        /// Seconds to run
        #[arg(short, long, default_value_t = 5.0)]
        duration: f64,
    },
    /// Print the version
    Version,
}

/// Exit code for a configuration problem.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if matches!(cli.command, Command::Version) {
        commands::version();
        return ExitCode::SUCCESS;
    }

    let _guard = cortex_runtime::init_tracing("cortex", cli.log_level.as_deref());
    let outcome = match cli.command {
        Command::Run { config, dev } => commands::run(&config, dev).await,
        Command::Status { config } => commands::status(&config).await,
        Command::Validate { config } => commands::validate(&config),
        Command::Test { config, duration } => commands::test(&config, duration).await,
        Command::Version => Ok(()),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &CortexError) -> u8 {
    match e {
        CortexError::Config(_) | CortexError::UnknownPlugin(_) => EXIT_CONFIG,
        _ => 1,
    }
}
