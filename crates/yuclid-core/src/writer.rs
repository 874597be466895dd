use serde_json::{json, Map, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::EngineError;
use crate::space::Point;

/// Samples captured for one metric at one point, in stdout order. `None`
/// marks a line that did not parse as a number.
#[derive(Debug, Clone)]
pub struct MetricSamples {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Append-only line-oriented JSON record stream. Records are flushed after
/// each point so partial progress survives interruption; a record is never
/// mutated once written.
pub struct RecordWriter {
    file: File,
    written: usize,
}

impl RecordWriter {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RecordWriter { file, written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Serializes one point's results: one record per sample row in unfolded
    /// mode (shorter metrics padded with null), one record with array-valued
    /// metrics in folded mode. Returns the number of records written.
    pub fn write_point(
        &mut self,
        point: &Point,
        metrics: &[MetricSamples],
        fold: bool,
        verbose: bool,
    ) -> Result<usize, EngineError> {
        let base = point_fields(point, verbose);
        let mut count = 0;
        if fold {
            let mut record = base;
            for metric in metrics {
                record.insert(
                    metric.name.clone(),
                    Value::Array(metric.values.iter().map(sample_value).collect()),
                );
            }
            self.write_line(&Value::Object(record))?;
            count += 1;
        } else {
            let rows = metrics.iter().map(|m| m.values.len()).max().unwrap_or(0);
            for row in 0..rows {
                let mut record = base.clone();
                for metric in metrics {
                    let sample = metric.values.get(row).copied().flatten();
                    record.insert(metric.name.clone(), sample_value(&sample));
                }
                self.write_line(&Value::Object(record))?;
                count += 1;
            }
        }
        self.file.flush()?;
        self.written += count;
        Ok(count)
    }

    fn write_line(&mut self, record: &Value) -> Result<(), EngineError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(())
    }
}

// JSON has no NaN; missing or non-numeric samples become null.
fn sample_value(sample: &Option<f64>) -> Value {
    match sample {
        Some(x) if x.is_finite() => json!(x),
        _ => Value::Null,
    }
}

fn point_fields(point: &Point, verbose: bool) -> Map<String, Value> {
    let mut fields = Map::new();
    for (dimension, value) in &point.coords {
        if verbose {
            fields.insert(
                dimension.clone(),
                json!({"name": value.name, "value": value.value}),
            );
        } else {
            fields.insert(dimension.clone(), Value::String(value.name.clone()));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceValue;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    fn temp_output() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "yuclid_writer_test_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir.join("trials.json")
    }

    fn sample_point() -> Point {
        Point {
            coords: vec![
                (
                    "opt".to_string(),
                    SpaceValue {
                        name: "O2".to_string(),
                        value: json!("-O2"),
                    },
                ),
                (
                    "threads".to_string(),
                    SpaceValue {
                        name: "4".to_string(),
                        value: json!(4),
                    },
                ),
            ],
        }
    }

    fn read_records(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .expect("read output")
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json line"))
            .collect()
    }

    #[test]
    fn unfolded_mode_expands_rows_and_pads_with_null() {
        let path = temp_output();
        let mut writer = RecordWriter::open(&path).expect("open");
        let metrics = vec![
            MetricSamples {
                name: "time".to_string(),
                values: vec![Some(1.5), Some(1.6), Some(1.7)],
            },
            MetricSamples {
                name: "mem".to_string(),
                values: vec![Some(12.0), None],
            },
        ];
        let count = writer
            .write_point(&sample_point(), &metrics, false, false)
            .expect("write");
        assert_eq!(count, 3);
        let records = read_records(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["opt"], json!("O2"));
        assert_eq!(records[0]["threads"], json!("4"));
        assert_eq!(records[0]["time"], json!(1.5));
        assert_eq!(records[0]["mem"], json!(12.0));
        assert_eq!(records[1]["mem"], Value::Null);
        assert_eq!(records[2]["time"], json!(1.7));
        assert_eq!(records[2]["mem"], Value::Null);
    }

    #[test]
    fn folded_mode_writes_one_record_with_arrays() {
        let path = temp_output();
        let mut writer = RecordWriter::open(&path).expect("open");
        let metrics = vec![MetricSamples {
            name: "time".to_string(),
            values: vec![Some(1.5), None, Some(1.7)],
        }];
        let count = writer
            .write_point(&sample_point(), &metrics, true, false)
            .expect("write");
        assert_eq!(count, 1);
        let records = read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["time"], json!([1.5, null, 1.7]));
    }

    #[test]
    fn verbose_mode_writes_name_value_pairs() {
        let path = temp_output();
        let mut writer = RecordWriter::open(&path).expect("open");
        let metrics = vec![MetricSamples {
            name: "time".to_string(),
            values: vec![Some(2.0)],
        }];
        writer
            .write_point(&sample_point(), &metrics, false, true)
            .expect("write");
        let records = read_records(&path);
        assert_eq!(records[0]["opt"], json!({"name": "O2", "value": "-O2"}));
        assert_eq!(records[0]["threads"], json!({"name": "4", "value": 4}));
    }

    #[test]
    fn writer_appends_across_points() {
        let path = temp_output();
        let mut writer = RecordWriter::open(&path).expect("open");
        let metrics = vec![MetricSamples {
            name: "time".to_string(),
            values: vec![Some(1.0)],
        }];
        writer
            .write_point(&sample_point(), &metrics, false, false)
            .expect("first");
        writer
            .write_point(&sample_point(), &metrics, false, false)
            .expect("second");
        assert_eq!(writer.written(), 2);
        assert_eq!(read_records(&path).len(), 2);
    }
}
