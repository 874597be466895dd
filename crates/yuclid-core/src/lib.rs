//! Experiment-space and trial-execution engine for the `yuclid` sweep
//! driver: a declarative multi-dimensional parameter space, named presets
//! restricting it, and templated shell commands executed once per point of
//! the restricted Cartesian product, one JSON record per trial.

pub mod config;
pub mod error;
pub mod runner;
pub mod space;
pub mod template;
pub mod writer;

use std::path::{Path, PathBuf};
use tracing::info;

pub use config::{build_environment, load_config, ConfigDoc};
pub use error::EngineError;
pub use runner::{RunOptions, RunSummary, TrialRunner};
pub use space::{Dimension, Point, Preset, Space, SpaceValue};
pub use writer::{MetricSamples, RecordWriter};

/// Everything the CLI hands to a run, resolved from flags.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Preset names to apply, already split on commas.
    pub presets: Vec<String>,
    /// Raw `dim=value1,value2` selections.
    pub select: Vec<String>,
    /// Replaces the document's `order` list when present.
    pub order: Option<Vec<String>>,
    pub fold: bool,
    pub verbose_data: bool,
    pub abort_on_error: bool,
    pub dry_run: bool,
    pub cache_directory: PathBuf,
    pub output: PathBuf,
}

/// Loads the configuration, composes the subspace, and either enumerates it
/// (dry run) or executes setup plus one trial per point, appending records
/// to the output file.
pub fn run_sweep(input: &Path, options: &SweepOptions) -> Result<RunSummary, EngineError> {
    let doc = config::load_config(input)?;
    let env = config::build_environment(&doc);
    let space = Space::from_document(&doc.space)?;
    let presets = space::resolve_presets(&space, &doc.presets)?;
    let selected = space::select_presets(&presets, &options.presets)?;
    let subspace = space::compose_subspace(&space, &selected)?;
    let subspace = space::apply_selection(&subspace, &options.select)?;
    let order_request = options.order.as_ref().unwrap_or(&doc.order);
    let order = space::resolve_order(&space, order_request)?;
    let metrics = doc.metric_commands()?;

    let run_options = RunOptions {
        fold: options.fold,
        verbose_data: options.verbose_data,
        abort_on_error: options.abort_on_error,
        cache_directory: options.cache_directory.clone(),
    };
    let trial_runner = TrialRunner::new(
        &space,
        &subspace,
        &order,
        &env,
        &doc.trial,
        &metrics,
        &run_options,
    );

    if options.dry_run {
        return Ok(trial_runner.dry_run());
    }

    runner::run_setup(&doc.setup, &space, &env, options.abort_on_error)?;
    info!("writing to '{}'", options.output.display());
    let mut writer = RecordWriter::open(&options.output)?;
    trial_runner.run(&mut writer)
}
