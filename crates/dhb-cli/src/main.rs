use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dhb_core::commands::backup::{self, BackupRequest};
use dhb_core::config::BackupConfig;

#[derive(Parser)]
#[command(
    name = "dhb",
    version,
    about = "Space-efficient hard-link snapshots of a directory tree",
    long_about = "Each run creates a timestamp-named backup set under the destination. \
Files unchanged since the previous set become hard links, so repeated backups \
only cost the space of what changed. Put gitignore-style patterns in \
<source>/.dhbignore to exclude paths."
)]
struct Cli {
    /// Source folder to back up
    #[arg(long)]
    source: PathBuf,

    /// Destination folder that holds the backup sets
    #[arg(long)]
    destination: PathBuf,

    /// Delete older backup sets when the destination runs out of space
    #[arg(long)]
    auto_delete: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let request = BackupRequest {
        source: cli.source,
        dest: cli.destination,
        config: BackupConfig {
            auto_delete: cli.auto_delete,
            ..BackupConfig::default()
        },
    };

    match backup::run(&request) {
        Ok(summary) if summary.is_partial() => {
            // The set and its manifest exist, but some files were skipped.
            tracing::warn!(
                set = %summary.set_name,
                failed = summary.failures.len(),
                "backup completed with failures"
            );
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("backup failed: {e}");
            ExitCode::FAILURE
        }
    }
}
