//! export_detections - dump the SQLite detection log as CSV

use anyhow::{Context, Result};
use clap::Parser;

use fruit_ripeness::storage::{write_csv, DetectionLog, SqliteDetectionLog};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the detection log database.
    #[arg(long, env = "RIPENESS_LOG_PATH", default_value = "detections.db")]
    db_path: String,
    /// Output CSV path; stdout when omitted.
    #[arg(long)]
    output: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut log = SqliteDetectionLog::open(&args.db_path)?;
    let entries = log.entries()?;
    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path))?;
            write_csv(&entries, std::io::BufWriter::new(file))?;
            eprintln!("exported {} detections to {}", entries.len(), path);
        }
        None => write_csv(&entries, std::io::stdout().lock())?,
    }
    Ok(())
}
