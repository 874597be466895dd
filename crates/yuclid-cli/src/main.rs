use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use yuclid_core::{EngineError, SweepOptions};

#[derive(Parser)]
#[command(name = "yuclid", version, about = "Declarative benchmark sweep driver")]
struct Cli {
    /// Configuration document (JSON or YAML)
    #[arg(short, long, default_value = "yuclid.json")]
    input: PathBuf,
    /// Output file for trial records; default is trials.<timestamp>.json
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Comma-separated presets to apply, e.g. large,machine1
    #[arg(short, long)]
    presets: Option<String>,
    /// Restrict a dimension to listed values, e.g. dim=val1,val2 (repeatable)
    #[arg(short, long)]
    select: Vec<String>,
    /// Overwrite the document's iteration order, e.g. dim1,dim2
    #[arg(short = 'r', long)]
    order: Option<String>,
    /// Dump both name and value for every dimension
    #[arg(long)]
    verbose_data: bool,
    /// Fold metric samples into one array-valued record per point
    #[arg(long)]
    fold: bool,
    /// Abort the whole run on the first trial or metric error
    #[arg(short = 'A', long)]
    abort_on_error: bool,
    /// Directory for per-trial scratch files
    #[arg(long, default_value = ".yuclid")]
    cache_directory: PathBuf,
    /// Enumerate the points that would run without executing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{}", err);
        let code = err
            .downcast_ref::<EngineError>()
            .map(EngineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.is_file() {
        return Err(EngineError::Config(format!("'{}' does not exist", cli.input.display())).into());
    }
    let output = resolve_output(cli.output);
    std::fs::create_dir_all(&cli.cache_directory)?;
    info!("input configuration: '{}'", cli.input.display());
    if !cli.dry_run {
        info!("output data: '{}'", output.display());
    }

    let options = SweepOptions {
        presets: split_csv(cli.presets.as_deref()),
        select: cli.select,
        order: cli.order.as_deref().map(|o| split_csv(Some(o))),
        fold: cli.fold,
        verbose_data: cli.verbose_data,
        abort_on_error: cli.abort_on_error,
        dry_run: cli.dry_run,
        cache_directory: cli.cache_directory,
        output,
    };
    let summary = yuclid_core::run_sweep(&cli.input, &options)?;
    if cli.dry_run {
        info!("dry run complete: {} point(s)", summary.points);
    } else {
        info!(
            "run complete: {} point(s), {} record(s), {} error(s)",
            summary.points,
            summary.records,
            summary.trial_errors + summary.metric_errors
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Default output name carries a timestamp; an explicit name gets `.json`
/// appended when missing, matching the original driver's behavior.
fn resolve_output(requested: Option<PathBuf>) -> PathBuf {
    match requested {
        Some(path) => {
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                path
            } else {
                let mut name = path.into_os_string();
                name.push(".json");
                PathBuf::from(name)
            }
        }
        None => {
            let now = chrono::Local::now().format("%Y%m%d-%H%M");
            PathBuf::from(format!("trials.{}.json", now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_drops_empty_parts() {
        assert_eq!(split_csv(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(split_csv(None).is_empty());
    }

    #[test]
    fn resolve_output_appends_json_extension() {
        assert_eq!(
            resolve_output(Some(PathBuf::from("results"))),
            PathBuf::from("results.json")
        );
        assert_eq!(
            resolve_output(Some(PathBuf::from("results.json"))),
            PathBuf::from("results.json")
        );
    }

    #[test]
    fn default_output_is_timestamped_json() {
        let name = resolve_output(None);
        let name = name.to_string_lossy();
        assert!(name.starts_with("trials."));
        assert!(name.ends_with(".json"));
    }
}
