use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::space::{points, Point, Space};
use crate::template::{substitute_global, substitute_point, unresolved_placeholders};
use crate::writer::{MetricSamples, RecordWriter};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub fold: bool,
    pub verbose_data: bool,
    pub abort_on_error: bool,
    pub cache_directory: PathBuf,
}

/// Totals for one run, reported at the end and inspected by tests.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub points: usize,
    pub records: usize,
    pub trial_errors: usize,
    pub metric_errors: usize,
    pub invalid_samples: usize,
}

/// Executes trials strictly sequentially: one external process at a time,
/// each a blocking call with no timeout. The output handle and environment
/// overlay are owned here for the run's duration; nothing is shared.
pub struct TrialRunner<'a> {
    space: &'a Space,
    subspace: &'a Space,
    order: &'a [String],
    env: &'a BTreeMap<String, String>,
    trial_template: &'a str,
    metrics: &'a [(String, String)],
    options: &'a RunOptions,
}

impl<'a> TrialRunner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        space: &'a Space,
        subspace: &'a Space,
        order: &'a [String],
        env: &'a BTreeMap<String, String>,
        trial_template: &'a str,
        metrics: &'a [(String, String)],
        options: &'a RunOptions,
    ) -> Self {
        TrialRunner {
            space,
            subspace,
            order,
            env,
            trial_template,
            metrics,
            options,
        }
    }

    /// Enumerates every point of the ordered product without executing or
    /// writing anything.
    pub fn dry_run(&self) -> RunSummary {
        let total = self.subspace.size();
        let mut summary = RunSummary::default();
        for (index, point) in points(self.subspace, self.order).enumerate() {
            info!("[{}/{}] dry run: {}", index + 1, total, point.label());
            summary.points += 1;
        }
        summary
    }

    /// Runs every point of the ordered product. Individual trial or metric
    /// failures are reported and the run continues, unless abort-on-error
    /// escalates the first of them.
    pub fn run(&self, writer: &mut RecordWriter) -> Result<RunSummary, EngineError> {
        let total = self.subspace.size();
        let mut summary = RunSummary::default();
        for (index, point) in points(self.subspace, self.order).enumerate() {
            let point_id = format!("yuclid.{:08x}.tmp", index);
            info!("[{}/{}] {}: started", index + 1, total, point.label());
            self.run_point(&point, &point_id, writer, &mut summary)?;
            info!("[{}/{}] {}: completed", index + 1, total, point.label());
        }
        Ok(summary)
    }

    fn run_point(
        &self,
        point: &Point,
        point_id: &str,
        writer: &mut RecordWriter,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        let command = self.render_command(self.trial_template, point, point_id);
        let status = run_shell_silent(&command, self.env)?;
        if !status.success() {
            summary.trial_errors += 1;
            self.report_error(format!(
                "{}: failed trial (code {})",
                point.label(),
                describe_status(&status)
            ))?;
        }

        let mut samples = Vec::with_capacity(self.metrics.len());
        let mut invalid = 0;
        for (metric, template) in self.metrics {
            let command = self.render_command(template, point, point_id);
            let output = run_shell_captured(&command, self.env)?;
            if !output.status.success() {
                summary.metric_errors += 1;
                self.report_error(format!(
                    "{}: failed metric '{}' (code {})",
                    point.label(),
                    metric,
                    describe_status(&output.status)
                ))?;
            }
            let values = parse_samples(&String::from_utf8_lossy(&output.stdout));
            invalid += values.iter().filter(|v| v.is_none()).count();
            samples.push(MetricSamples {
                name: metric.clone(),
                values,
            });
        }
        if invalid > 0 {
            summary.invalid_samples += invalid;
            if !self.options.fold {
                warn!(
                    "{}: {} metric sample(s) were not numeric",
                    point.label(),
                    invalid
                );
            }
        }

        let written = writer.write_point(
            point,
            &samples,
            self.options.fold,
            self.options.verbose_data,
        )?;
        summary.records += written;
        summary.points += 1;
        if !samples.is_empty() {
            info!("obtained {}", format_samples(&samples));
        }
        Ok(())
    }

    fn render_command(&self, template: &str, point: &Point, point_id: &str) -> String {
        let text = substitute_global(template, self.space);
        let text = substitute_point(&text, point, point_id, &self.options.cache_directory);
        for token in unresolved_placeholders(&text) {
            warn!("unresolved placeholder '${{yuclid.{}}}' left verbatim", token);
        }
        text
    }

    fn report_error(&self, message: String) -> Result<(), EngineError> {
        error!("{}", message);
        if self.options.abort_on_error {
            Err(EngineError::Aborted(message))
        } else {
            Ok(())
        }
    }
}

/// One-time setup commands, run before any trial under the same environment
/// overlay. Only global substitution applies: there is no point in scope.
pub fn run_setup(
    commands: &[String],
    space: &Space,
    env: &BTreeMap<String, String>,
    abort_on_error: bool,
) -> Result<(), EngineError> {
    if commands.is_empty() {
        return Ok(());
    }
    info!("starting setup");
    let mut errors = false;
    for raw in commands {
        let command = substitute_global(raw, space);
        for token in unresolved_placeholders(&command) {
            warn!("unresolved placeholder '${{yuclid.{}}}' left verbatim", token);
        }
        let status = run_shell_inherit(&command, env)?;
        if !status.success() {
            errors = true;
            let message = format!(
                "setup: '{}' failed (code {})",
                command,
                describe_status(&status)
            );
            error!("{}", message);
            if abort_on_error {
                return Err(EngineError::Aborted(message));
            }
        }
    }
    if errors {
        warn!("errors have occurred during setup");
    }
    info!("setup completed");
    Ok(())
}

fn shell_command(command: &str, env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).envs(env);
    cmd
}

fn run_shell_inherit(command: &str, env: &BTreeMap<String, String>) -> Result<ExitStatus, EngineError> {
    Ok(shell_command(command, env).status()?)
}

fn run_shell_silent(command: &str, env: &BTreeMap<String, String>) -> Result<ExitStatus, EngineError> {
    Ok(shell_command(command, env)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?)
}

fn run_shell_captured(command: &str, env: &BTreeMap<String, String>) -> Result<Output, EngineError> {
    Ok(shell_command(command, env).output()?)
}

/// One sample per non-empty stdout line; lines that do not parse as floats
/// become missing samples instead of aborting the point.
fn parse_samples(stdout: &str) -> Vec<Option<f64>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<f64>().ok())
        .collect()
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

fn format_samples(samples: &[MetricSamples]) -> String {
    samples
        .iter()
        .map(|m| {
            let rendered: Vec<String> = m
                .values
                .iter()
                .map(|v| match v {
                    Some(x) => x.to_string(),
                    None => "nan".to_string(),
                })
                .collect();
            format!("{}=[{}]", m.name, rendered.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_samples_maps_bad_lines_to_none() {
        let values = parse_samples("1.5\n\n  2.25 \nnot-a-number\n-3\n");
        assert_eq!(
            values,
            vec![Some(1.5), Some(2.25), None, Some(-3.0)]
        );
    }

    #[test]
    fn parse_samples_of_empty_output_is_empty() {
        assert!(parse_samples("").is_empty());
        assert!(parse_samples("\n\n").is_empty());
    }

    #[test]
    fn shell_env_overlay_reaches_subprocesses() {
        let mut env = BTreeMap::new();
        env.insert("YUCLID_TEST_VALUE".to_string(), "7.5".to_string());
        let output =
            run_shell_captured("echo $YUCLID_TEST_VALUE", &env).expect("shell available");
        assert!(output.status.success());
        let values = parse_samples(&String::from_utf8_lossy(&output.stdout));
        assert_eq!(values, vec![Some(7.5)]);
    }

    #[test]
    fn nonzero_exit_is_reported_in_status() {
        let env = BTreeMap::new();
        let status = run_shell_silent("exit 3", &env).expect("shell available");
        assert!(!status.success());
        assert_eq!(describe_status(&status), "3");
    }

    #[test]
    fn format_samples_renders_missing_as_nan() {
        let samples = vec![MetricSamples {
            name: "time".to_string(),
            values: vec![Some(1.5), None],
        }];
        assert_eq!(format_samples(&samples), "time=[1.5, nan]");
    }
}
