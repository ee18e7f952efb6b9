/// ERA5 forcing converter: reads a merged ERA5 download (JSON) and writes it
/// in the legacy `lon × lat (× level) × time` forcing layout with scaled
/// integer variables.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use frost_core::forcing::{era5_to_legacy, Era5Dataset};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "era_forcing", about = "Convert merged ERA5 data to the legacy forcing layout")]
struct Args {
    /// Merged ERA5 dataset JSON
    #[arg(short, long)]
    input: PathBuf,

    /// Output JSON, written as `{"era": {...}}`
    #[arg(short, long, default_value = "era_forcing.json")]
    output: PathBuf,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
    let ds: Era5Dataset = serde_json::from_str(&text).context("Failed to parse ERA5 dataset")?;
    info!(
        n_time = ds.time.len(),
        n_level = ds.level.len(),
        n_lat = ds.latitude.len(),
        n_lon = ds.longitude.len(),
        "ERA5 dataset loaded"
    );

    let era = era5_to_legacy(&ds)?;
    let wrapped = serde_json::json!({ "era": era });
    fs::write(&args.output, serde_json::to_string(&wrapped)?)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;
    eprintln!("[era_forcing] Wrote {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_installs_once() {
        assert!(setup_logging(true).is_ok());
        assert!(setup_logging(false).is_err(), "a second global subscriber must be refused");
    }

    #[test]
    fn output_defaults() {
        let a = Args::parse_from(["era_forcing", "--input", "era5.json"]);
        assert_eq!(a.output, PathBuf::from("era_forcing.json"));
        assert!(!a.verbose);
    }
}
