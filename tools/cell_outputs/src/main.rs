/// Model output merger: stacks per-grid-cell cluster output files into one
/// `(gridcell, time, depth)` dataset, or reads a single point-run file.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use frost_core::outputs::{
    read_cluster_parallel, read_point_file, JsonStructReader, DEFAULT_DEPTH_RANGE, DEFAULT_MAX_DEPTH,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "cell_outputs", about = "Merge per-grid-cell model outputs")]
struct Args {
    /// Directory holding cluster output files
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Only files whose name starts with this prefix
    #[arg(long, default_value = "")]
    prefix: String,

    /// Depth of the top layer (m)
    #[arg(long, default_value_t = DEFAULT_DEPTH_RANGE.0, allow_hyphen_values = true)]
    depth_top: f64,

    /// Depth of the bottom layer (m)
    #[arg(long, default_value_t = DEFAULT_DEPTH_RANGE.1, allow_hyphen_values = true)]
    depth_bottom: f64,

    /// Read a single point-run file instead of a cluster directory
    #[arg(long)]
    point: Option<PathBuf>,

    /// Soil column depth below the lowest layer for point runs (m)
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: f64,

    /// Output JSON
    #[arg(short, long, default_value = "cell_outputs.json")]
    output: PathBuf,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

/// `.json` files in `dir` starting with `prefix`, sorted by name.
fn discover(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|x| x == "json"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    files.sort();
    Ok(files)
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

    let json = if let Some(point) = &args.point {
        let p = read_point_file(point, args.max_depth, &JsonStructReader)?;
        info!(elevation = p.elevation, n_depth = p.depth.len(), n_time = p.times.len(), "point file read");
        serde_json::to_string(&p)?
    } else {
        let files = discover(&args.dir, &args.prefix)?;
        if files.is_empty() {
            bail!("No output files matching '{}*.json' in {}", args.prefix, args.dir.display());
        }
        eprintln!("Merging {} cell files from {} ...", files.len(), args.dir.display());
        let ds = read_cluster_parallel(&files, (args.depth_top, args.depth_bottom), &JsonStructReader)?;
        eprintln!(
            "  {} cells, {} steps, {} depths, {} variables",
            ds.gridcells.len(),
            ds.times.len(),
            ds.depth.len(),
            ds.variables.len()
        );
        serde_json::to_string(&ds)?
    };

    fs::write(&args.output, json).with_context(|| format!("Cannot write {}", args.output.display()))?;
    eprintln!("[cell_outputs] Wrote {}", args.output.display());
    Ok(())
}
