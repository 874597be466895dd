use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{config, EngineError};
use crate::space::render_value;

/// The parsed configuration document.
///
/// `space` and `metrics` keep declaration order: dimension order becomes the
/// default iteration order and metrics execute in the order they are listed.
#[derive(Debug, Deserialize)]
pub struct ConfigDoc {
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    pub space: Map<String, Value>,
    #[serde(default)]
    pub presets: Map<String, Value>,
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub setup: Vec<String>,
    pub trial: String,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

impl ConfigDoc {
    /// Metric name/command pairs in declaration order.
    pub fn metric_commands(&self) -> Result<Vec<(String, String)>, EngineError> {
        let mut commands = Vec::with_capacity(self.metrics.len());
        for (name, raw) in &self.metrics {
            let command = raw
                .as_str()
                .ok_or_else(|| config(format!("metric '{}' must be a shell command string", name)))?;
            commands.push((name.clone(), command.to_string()));
        }
        Ok(commands)
    }
}

pub fn load_config(path: &Path) -> Result<ConfigDoc, EngineError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| config(format!("cannot read '{}': {}", path.display(), e)))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        let value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|e| config(format!("cannot parse '{}': {}", path.display(), e)))?;
        let json = serde_json::to_value(value)
            .map_err(|e| config(format!("cannot parse '{}': {}", path.display(), e)))?;
        serde_json::from_value(json)
            .map_err(|e| config(format!("invalid configuration '{}': {}", path.display(), e)))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| config(format!("invalid configuration '{}': {}", path.display(), e)))
    }
}

/// Extra environment variables overlaid on the process environment for every
/// setup, trial, and metric subprocess. Values are stringified.
pub fn build_environment(doc: &ConfigDoc) -> BTreeMap<String, String> {
    doc.env
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v)))
        .collect()
}
