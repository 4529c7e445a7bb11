//! SkewGuard CLI
//!
//! Demonstrations of keyed transaction serialization against the in-memory
//! snapshot-isolated store.
//!
//! # Commands
//!
//! - `contend` - Hammer one key from many threads and report the outcome
//! - `write-skew` - Run the on-call doctors scenario with and without locking

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// SkewGuard keyed-serialization demos.
#[derive(Parser)]
#[command(name = "skewguard")]
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
    /// Contend on one key from many threads
    Contend {
        /// Key every thread locks
        #[arg(short, long, default_value = "order-42")]
        key: String,

        /// Number of concurrent threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Acquire attempts per thread
        #[arg(short, long, default_value = "25")]
        attempts: usize,

        /// Lock timeout per acquire, in milliseconds
        #[arg(long, default_value = "10")]
        timeout_ms: u64,

        /// How long a winner holds the key, in milliseconds
        #[arg(long, default_value = "1")]
        hold_ms: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show write skew and how keyed serialization prevents it
    WriteSkew {
        /// Doctors on call at the start (at least two)
        #[arg(short, long, value_delimiter = ',', default_value = "alice,bob")]
        doctors: Vec<String>,

        /// How long a serialized transaction holds the lock, in milliseconds
        #[arg(long, default_value = "5")]
        hold_ms: u64,

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
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Contend {
            key,
            threads,
            attempts,
            timeout_ms,
            hold_ms,
            format,
        } => {
            commands::contend::run(&key, threads, attempts, timeout_ms, hold_ms, &format)?;
        }
        Commands::WriteSkew {
            doctors,
            hold_ms,
            format,
        } => {
            commands::write_skew::run(&doctors, hold_ms, &format)?;
        }
        Commands::Version => {
            println!("SkewGuard CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
