//! Kiln lowering CLI
//!
//! Lowers serialized compilation units and runs them on the reference
//! evaluator

#![allow(clippy::print_stderr, reason = "diagnostics and status lines go to stderr")]
#![allow(clippy::print_stdout, reason = "lowered output and evaluation results go to stdout")]

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod logging;
mod lower;
mod phases;
mod run;
mod unit;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln lowering pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// More logging; repeat for debug and trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of `kiln lower`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Emit {
    /// Source-like listing
    Pretty,
    /// Serialized compilation unit
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the lowering phases in execution order
    Phases {
        /// Pipeline configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Lower a serialized compilation unit
    Lower {
        /// Compilation unit as JSON
        input: PathBuf,

        /// Pipeline configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "pretty")]
        emit: Emit,

        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Evaluate a function of a compilation unit
    Run {
        /// Compilation unit as JSON
        input: PathBuf,

        /// Zero-argument function to call
        #[arg(long, default_value = "main")]
        entry: String,

        /// Lower the unit before running it
        #[arg(long)]
        lower: bool,

        /// Pipeline configuration used with `--lower`
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Phases { config } => {
            phases::list(config.as_deref())?;
        }
        Commands::Lower {
            input,
            config,
            emit,
            output,
        } => {
            lower::lower(&input, config.as_deref(), emit, output.as_deref())?;
        }
        Commands::Run {
            input,
            entry,
            lower,
            config,
        } => {
            run::run(&input, &entry, lower, config.as_deref())?;
        }
    }

    Ok(())
}
