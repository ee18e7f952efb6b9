/// Snow-melt day tool: reads a classification cube (or raw granules) as JSON,
/// runs melt-day detection once per calendar year, writes the day-of-year
/// rasters as JSON.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use frost_core::scene::{composite_granules, Granule};
use frost_core::{melt_day_by_year, ClassificationCube, MeltParams};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "melt_doy", about = "Per-pixel snow-melt day of year from a classification cube")]
struct Args {
    /// Classification cube JSON (or a granule list with --granules)
    #[arg(short, long)]
    input: PathBuf,

    /// Treat the input as an ungrouped list of granules and composite them first
    #[arg(long)]
    granules: bool,

    /// MeltParams JSON; missing fields take their defaults
    #[arg(long)]
    params: Option<PathBuf>,

    /// Override the coverage threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Override the smoothing window (time steps)
    #[arg(long)]
    window: Option<usize>,

    /// Override the snow class code
    #[arg(long)]
    snow_code: Option<u8>,

    /// Output JSON (one raster per year)
    #[arg(short, long, default_value = "melt_doy.json")]
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

// ── Parameters ───────────────────────────────────────────────────────────────

/// File parameters (or defaults) with command-line overrides applied.
fn resolve_params(base: Option<MeltParams>, args: &Args) -> MeltParams {
    let mut p = base.unwrap_or_default();
    if let Some(t) = args.threshold {
        p.coverage_threshold = t;
    }
    if let Some(w) = args.window {
        p.smoothing_window = w;
    }
    if let Some(c) = args.snow_code {
        p.snow_code = c;
    }
    p
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_cube(args: &Args) -> Result<ClassificationCube> {
    if args.granules {
        let granules: Vec<Granule> = read_json(&args.input)?;
        info!(granules = granules.len(), "compositing granules");
        Ok(composite_granules(&granules)?)
    } else {
        read_json(&args.input)
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;

    let base = args.params.as_deref().map(read_json::<MeltParams>).transpose()?;
    let params = resolve_params(base, &args);
    params.validate()?;

    let cube = load_cube(&args)?;
    info!(
        width = cube.width(),
        height = cube.height(),
        steps = cube.n_times(),
        years = ?cube.years(),
        "cube loaded"
    );

    let rasters = melt_day_by_year(&cube, &params)?;
    for r in &rasters {
        eprintln!(
            "  {}: {} of {} pixels with a melt day ({} steps)",
            r.year,
            r.n_valid(),
            r.width * r.height,
            r.n_steps
        );
    }

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&args.output, serde_json::to_string(&rasters)?)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;
    eprintln!("[melt_doy] Wrote {} rasters to {}", rasters.len(), args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["melt_doy", "--input", "cube.json"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_without_file_or_flags() {
        assert_eq!(resolve_params(None, &args(&[])), MeltParams::default());
    }

    #[test]
    fn flags_override_file() {
        let file = MeltParams { snow_code: 3, coverage_threshold: 0.5, smoothing_window: 4 };
        let p = resolve_params(Some(file), &args(&["--window", "7", "--threshold", "0.8"]));
        assert_eq!(p.smoothing_window, 7);
        assert_eq!(p.coverage_threshold, 0.8);
        assert_eq!(p.snow_code, 3, "untouched fields come from the file");
    }

    #[test]
    fn granule_input_composites() {
        let dir = std::env::temp_dir().join(format!("melt_doy_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("granules.json");
        fs::write(
            &path,
            r#"[{"time":"2021-05-01T10:00:00","width":1,"height":1,"data":[0]},
                {"time":"2021-05-01T10:00:00","width":1,"height":1,"data":[11]}]"#,
        )
        .unwrap();
        let a = Args::parse_from(["melt_doy", "--input", path.to_str().unwrap(), "--granules"]);
        let cube = load_cube(&a).unwrap();
        assert_eq!(cube.n_times(), 1);
        assert_eq!(cube.get(0, 0, 0), Some(11));
        fs::remove_dir_all(&dir).ok();
    }
}
