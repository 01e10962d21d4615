//! QuoteCart CLI
//!
//! Command-line tools for QuoteCart carts.
//!
//! # Commands
//!
//! - `demo` - Run a scripted session against an in-memory remote
//! - `inspect` - Decode and display a persisted cart

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// QuoteCart command-line tools.
#[derive(Parser)]
#[command(name = "quotecart")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session with an offline period and a conflicting edit
    Demo {
        /// Conflict strategy (server-wins, client-wins, merge, prompt-user)
        #[arg(short, long, default_value = "merge")]
        strategy: String,

        /// Save the final cart to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode and display a persisted cart
    Inspect {
        /// Path to the cart file
        path: PathBuf,

        /// Show undo/redo history
        #[arg(long)]
        history: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            strategy,
            save,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            commands::demo::run(&strategy, save.as_deref(), format)?;
        }
        Commands::Inspect {
            path,
            history,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            commands::inspect::run(&path, history, format)?;
        }
        Commands::Version => {
            println!("QuoteCart CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("QuoteCart Core v{}", quotecart_core::VERSION);
        }
    }

    Ok(())
}
