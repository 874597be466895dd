use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::error::{config, EngineError};

/// One entry on a dimension. The display name is always a string, even when
/// the underlying value is numeric; presets and selections key on it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceValue {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub values: Vec<SpaceValue>,
}

impl Dimension {
    pub fn display_names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.name.as_str())
    }
}

/// An ordered set of dimensions. Declaration order is significant: it is the
/// default iteration order of the Cartesian product.
#[derive(Debug, Clone, Default)]
pub struct Space {
    dimensions: Vec<Dimension>,
}

/// Renders a raw value the way it appears in substituted commands: strings
/// unquoted, everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Space {
    /// Builds the space from the document's `space` mapping.
    ///
    /// A key suffixed `:expr` (or `:py`, kept for older documents) holds a
    /// restricted expression instead of a value list. Malformed entries are
    /// skipped with a warning rather than failing the whole document.
    pub fn from_document(raw: &Map<String, Value>) -> Result<Space, EngineError> {
        let mut dimensions = Vec::with_capacity(raw.len());
        for (key, entry) in raw {
            let dimension = if let Some(name) = expression_dimension(key) {
                let expr = entry.as_str().ok_or_else(|| {
                    config(format!("dimension '{}' expression must be a string", name))
                })?;
                let scalars = eval_expression(expr)
                    .map_err(|e| config(format!("dimension '{}': {}", name, e)))?;
                Dimension {
                    name: name.to_string(),
                    values: scalars
                        .into_iter()
                        .map(|v| SpaceValue {
                            name: render_value(&v),
                            value: v,
                        })
                        .collect(),
                }
            } else {
                let entries = entry.as_array().ok_or_else(|| {
                    config(format!("dimension '{}' must be a list of values", key))
                })?;
                Dimension {
                    name: key.clone(),
                    values: collect_values(key, entries),
                }
            };
            if dimension.values.is_empty() {
                return Err(config(format!(
                    "dimension '{}' has no usable values",
                    dimension.name
                )));
            }
            let mut seen: Vec<&str> = Vec::new();
            for value in &dimension.values {
                if seen.contains(&value.name.as_str()) {
                    return Err(config(format!(
                        "duplicate display name '{}' in dimension '{}'",
                        value.name, dimension.name
                    )));
                }
                seen.push(&value.name);
            }
            dimensions.push(dimension);
        }
        Ok(Space { dimensions })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Number of points in the full Cartesian product.
    pub fn size(&self) -> usize {
        self.dimensions.iter().map(|d| d.values.len()).product()
    }
}

fn expression_dimension(key: &str) -> Option<&str> {
    key.strip_suffix(":expr").or_else(|| key.strip_suffix(":py"))
}

fn collect_values(dimension: &str, entries: &[Value]) -> Vec<SpaceValue> {
    let mut values = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match entry {
            Value::String(_) | Value::Number(_) => values.push(SpaceValue {
                name: render_value(entry),
                value: entry.clone(),
            }),
            Value::Object(map) => match map.get("value") {
                Some(value) => {
                    let name = map
                        .get("name")
                        .map(render_value)
                        .unwrap_or_else(|| render_value(value));
                    values.push(SpaceValue {
                        name,
                        value: value.clone(),
                    });
                }
                None => warn!(
                    "skipping entry {} of dimension '{}': missing 'value'",
                    index, dimension
                ),
            },
            other => warn!(
                "skipping entry {} of dimension '{}': unsupported value {}",
                index, dimension, other
            ),
        }
    }
    values
}

/// Restricted replacement for the original dynamic expression evaluation:
/// either `range(start, stop[, step])` over integers (half-open) or a
/// comma-separated list of scalars.
fn eval_expression(expr: &str) -> Result<Vec<Value>, String> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err("empty expression".to_string());
    }
    if let Some(args) = trimmed
        .strip_prefix("range(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<i64> = args
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("range argument '{}' is not an integer", p.trim()))
            })
            .collect::<Result<_, _>>()?;
        let (start, stop, step) = match parts.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, step] => (*start, *stop, *step),
            _ => return Err("range takes one to three arguments".to_string()),
        };
        if step == 0 {
            return Err("range step must be nonzero".to_string());
        }
        let mut out = Vec::new();
        let mut current = start;
        while (step > 0 && current < stop) || (step < 0 && current > stop) {
            out.push(Value::from(current));
            current += step;
        }
        return Ok(out);
    }
    Ok(trimmed
        .split(',')
        .map(|part| {
            let part = part.trim();
            if let Ok(i) = part.parse::<i64>() {
                Value::from(i)
            } else if let Ok(f) = part.parse::<f64>() {
                Value::from(f)
            } else {
                Value::String(part.to_string())
            }
        })
        .collect())
}

/// A named partial restriction: dimension name to allowed display names,
/// glob expansion already resolved.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    restrictions: Vec<(String, Vec<String>)>,
}

impl Preset {
    pub fn restricts(&self, dimension: &str) -> Option<&[String]> {
        self.restrictions
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, names)| names.as_slice())
    }
}

/// Validates every declared preset against the space and expands globs.
pub fn resolve_presets(
    space: &Space,
    raw: &Map<String, Value>,
) -> Result<Vec<Preset>, EngineError> {
    let mut presets = Vec::with_capacity(raw.len());
    for (name, body) in raw {
        let body = body
            .as_object()
            .ok_or_else(|| config(format!("preset '{}' must be a mapping", name)))?;
        let mut restrictions = Vec::with_capacity(body.len());
        for (dim_name, requested) in body {
            let dimension = space.get(dim_name).ok_or_else(|| {
                config(format!(
                    "preset '{}' references unknown dimension '{}'",
                    name, dim_name
                ))
            })?;
            let requested: Vec<&Value> = match requested {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            let mut resolved: Vec<String> = Vec::new();
            let mut unknown: Vec<String> = Vec::new();
            for item in requested {
                let literal = render_value(item);
                if item.is_string() && literal.contains('*') {
                    for candidate in dimension.display_names() {
                        if glob_match(&literal, candidate)
                            && !resolved.iter().any(|r| r == candidate)
                        {
                            resolved.push(candidate.to_string());
                        }
                    }
                } else if dimension.display_names().any(|n| n == literal) {
                    if !resolved.contains(&literal) {
                        resolved.push(literal);
                    }
                } else {
                    unknown.push(literal);
                }
            }
            if !unknown.is_empty() {
                return Err(config(format!(
                    "unknown values in preset '{}' for dimension '{}': {}",
                    name,
                    dim_name,
                    unknown.join(", ")
                )));
            }
            if resolved.is_empty() {
                error!("empty dimension '{}' in preset '{}'", dim_name, name);
            }
            restrictions.push((dim_name.clone(), resolved));
        }
        presets.push(Preset {
            name: name.clone(),
            restrictions,
        });
    }
    Ok(presets)
}

/// Picks the requested presets by name, in request order.
pub fn select_presets(presets: &[Preset], requested: &[String]) -> Result<Vec<Preset>, EngineError> {
    let mut selected = Vec::with_capacity(requested.len());
    for name in requested {
        let preset = presets
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| config(format!("preset '{}' does not exist", name)))?;
        selected.push(preset.clone());
    }
    Ok(selected)
}

/// Anchored match where `*` stands for zero or more characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Applies the selected presets to the space.
///
/// Surviving values keep the space's original relative order, not the
/// preset's declaration order. Two selected presets restricting the same
/// dimension conflict fatally; an emptied dimension is fatal.
pub fn compose_subspace(space: &Space, selected: &[Preset]) -> Result<Space, EngineError> {
    let mut dimensions = Vec::with_capacity(space.dimensions().len());
    for dimension in space.dimensions() {
        let relevant: Vec<&Preset> = selected
            .iter()
            .filter(|p| p.restricts(&dimension.name).is_some())
            .collect();
        let values = match relevant.as_slice() {
            [] => dimension.values.clone(),
            [preset] => {
                let allowed = preset
                    .restricts(&dimension.name)
                    .unwrap_or_default();
                dimension
                    .values
                    .iter()
                    .filter(|v| allowed.iter().any(|a| a == &v.name))
                    .cloned()
                    .collect()
            }
            conflicting => {
                let names: Vec<&str> = conflicting.iter().map(|p| p.name.as_str()).collect();
                return Err(config(format!(
                    "dimension '{}' conflicts in presets: {}",
                    dimension.name,
                    names.join(", ")
                )));
            }
        };
        if values.is_empty() {
            return Err(config(format!(
                "empty dimension '{}' in subspace",
                dimension.name
            )));
        }
        dimensions.push(Dimension {
            name: dimension.name.clone(),
            values,
        });
    }
    Ok(Space { dimensions })
}

/// Intersects the subspace with ad-hoc `dim=value1,value2` selections.
/// Unknown values are dropped with a warning; an unknown dimension or an
/// emptied dimension is fatal.
pub fn apply_selection(subspace: &Space, selections: &[String]) -> Result<Space, EngineError> {
    let mut result = subspace.clone();
    for raw in selections {
        let (dim_name, values) = raw.split_once('=').ok_or_else(|| {
            config(format!(
                "invalid selection '{}': expected dim=value1,value2",
                raw
            ))
        })?;
        let dimension = result
            .dimensions
            .iter_mut()
            .find(|d| d.name == dim_name)
            .ok_or_else(|| config(format!("unknown dimension '{}' in selection", dim_name)))?;
        let requested: Vec<&str> = values.split(',').map(str::trim).collect();
        for name in &requested {
            if !dimension.display_names().any(|n| &n == name) {
                warn!(
                    "ignoring unknown value '{}' for dimension '{}'",
                    name, dim_name
                );
            }
        }
        dimension
            .values
            .retain(|v| requested.iter().any(|r| *r == v.name));
        if dimension.values.is_empty() {
            return Err(config(format!("empty dimension '{}'", dim_name)));
        }
    }
    Ok(result)
}

/// Iteration order of dimensions: declaration order, with every dimension
/// named in `requested` moved to the back while the rest keep their
/// relative order.
pub fn resolve_order(space: &Space, requested: &[String]) -> Result<Vec<String>, EngineError> {
    let mut order: Vec<String> = space
        .dimensions()
        .iter()
        .map(|d| d.name.clone())
        .collect();
    for name in requested {
        let index = order.iter().position(|n| n == name).ok_or_else(|| {
            config(format!(
                "dimension '{}' specified in 'order' does not exist",
                name
            ))
        })?;
        let moved = order.remove(index);
        order.push(moved);
    }
    Ok(order)
}

/// One fully-resolved assignment, in iteration order. Materialized once per
/// step of the product and discarded after the trial.
#[derive(Debug, Clone)]
pub struct Point {
    pub coords: Vec<(String, SpaceValue)>,
}

impl Point {
    pub fn get(&self, dimension: &str) -> Option<&SpaceValue> {
        self.coords
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, v)| v)
    }

    /// Dot-joined display names, used in log lines.
    pub fn label(&self) -> String {
        self.coords
            .iter()
            .map(|(_, v)| v.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Cartesian product of the subspace in the given dimension order; the last
/// dimension of the order varies fastest.
pub fn points<'a>(subspace: &'a Space, order: &[String]) -> PointIter<'a> {
    let dims: Vec<&Dimension> = order
        .iter()
        .filter_map(|name| subspace.get(name))
        .collect();
    let done = dims.iter().any(|d| d.values.is_empty());
    let indices = vec![0; dims.len()];
    PointIter {
        dims,
        indices,
        done,
    }
}

pub struct PointIter<'a> {
    dims: Vec<&'a Dimension>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a> Iterator for PointIter<'a> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        if self.done {
            return None;
        }
        let coords = self
            .dims
            .iter()
            .zip(&self.indices)
            .map(|(dim, &idx)| (dim.name.clone(), dim.values[idx].clone()))
            .collect();
        let mut advanced = false;
        for i in (0..self.dims.len()).rev() {
            self.indices[i] += 1;
            if self.indices[i] < self.dims[i].values.len() {
                advanced = true;
                break;
            }
            self.indices[i] = 0;
        }
        if !advanced {
            self.done = true;
        }
        Some(Point { coords })
    }
}
