//! Rewind CLI
//!
//! Offline inspection of record/replay logs.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod inspect;

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use inspect::Format;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Rewind - inspect deterministic record/replay logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every entry of a log
    Inspect {
        /// Path to log file
        #[arg(short, long, default_value = rewind_core::DEFAULT_LOG_NAME)]
        log: PathBuf,
        /// One JSON object per entry
        #[arg(long)]
        json: bool,
        /// Payload bytes to show per entry
        #[arg(long, default_value_t = 16)]
        preview: usize,
    },
    /// Count entries per kind, thread and release tag
    Summary {
        /// Path to log file
        #[arg(short, long, default_value = rewind_core::DEFAULT_LOG_NAME)]
        log: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn open_log(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).wrap_err_with(|| format!("cannot open log {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    let cli = Cli::parse();

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match cli.command {
        Commands::Inspect { log, json, preview } => {
            let format = if json { Format::Json } else { Format::Text };
            let count = inspect::dump(open_log(&log)?, &mut out, format, preview)
                .wrap_err_with(|| format!("failed to inspect {}", log.display()))?;
            tracing::debug!(entries = count, log = %log.display(), "log inspected");
        }
        Commands::Summary { log, json } => {
            let summary = inspect::summarize(open_log(&log)?);
            if json {
                serde_json::to_writer_pretty(&mut out, &summary)?;
                writeln!(out)?;
            } else {
                summary.write_text(&mut out)?;
            }
        }
    }

    out.flush()?;
    Ok(())
}
