//! Replica CLI
//!
//! Command-line tools for inspecting and maintaining a local replica.
//!
//! # Commands
//!
//! - `inspect` - Display record counts, journal statistics and cursors
//! - `cursor show` / `cursor reset` - Read or forget sync cursors
//! - `compact` - Rewrite the journal to one frame per live record

mod commands;
mod error;
mod record;

use clap::{Parser, Subcommand, ValueEnum};
use error::CliError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Replica command-line maintenance tools.
#[derive(Parser)]
#[command(name = "replica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts, journal statistics and cursors
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show or reset sync cursors
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Compact the journal
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CursorAction {
    /// List every stored cursor
    Show,
    /// Forget the cursor of a collection; its next sync pulls everything
    Reset {
        /// Collection name
        collection: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli.path, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: Option<PathBuf>, command: Commands) -> Result<(), CliError> {
    let replica_path = || path.clone().ok_or(CliError::MissingPath);

    match command {
        Commands::Inspect { format } => {
            commands::inspect::run(&replica_path()?, format)?;
        }
        Commands::Cursor { action } => match action {
            CursorAction::Show => commands::cursor::show(&replica_path()?)?,
            CursorAction::Reset { collection } => {
                commands::cursor::reset(&replica_path()?, &collection)?;
            }
        },
        Commands::Compact { dry_run } => {
            commands::compact::run(&replica_path()?, dry_run)?;
        }
        Commands::Version => {
            println!("Replica CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Replica Core v{}", replica_core::VERSION);
        }
    }

    Ok(())
}
