//! Result tables and their CSV / JSON export

use crate::error::{EvalError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Model output for every feature row
#[derive(Debug, Clone)]
pub struct Predictions {
    /// Instrument-family names, one per probability column
    pub class_names: Vec<String>,
    /// Rounded probabilities (n_samples × n_classes)
    pub probabilities: Array2<f64>,
    /// Argmax of the unrounded probabilities
    pub class_pred: Vec<usize>,
}

impl Predictions {
    pub fn n_samples(&self) -> usize {
        self.class_pred.len()
    }
}

/// One evaluated sample: metadata, split, prediction and correctness
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub sample_id: String,
    pub midi_number: i64,
    pub family_id: i64,
    pub split: String,
    /// Metadata fields passed through verbatim
    pub values: Vec<String>,
    pub probabilities: Vec<f64>,
    pub class_pred: usize,
    pub correct_class: bool,
}

/// The joined per-sample table written to `predictions.csv`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionTable {
    pub index_name: String,
    pub metadata_columns: Vec<String>,
    pub probability_columns: Vec<String>,
    pub rows: Vec<SampleRecord>,
}

impl PredictionTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(
            self.metadata_columns.len() + self.probability_columns.len() + 4,
        );
        header.push(self.index_name.clone());
        header.extend(self.metadata_columns.iter().cloned());
        header.push("split".to_string());
        header.extend(self.probability_columns.iter().cloned());
        header.push("class_pred".to_string());
        header.push("correct_class".to_string());
        header
    }
}

/// Correct/incorrect counts for one MIDI pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PitchCount {
    pub midi_number: u8,
    pub correct: u64,
    pub incorrect: u64,
}

/// Aggregated counts for one pitch bin
///
/// Percentages are `None` for an empty bin and serialize as empty CSV fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchBin {
    /// Lowest MIDI number in the bin
    pub bin: u32,
    pub correct: u64,
    pub incorrect: u64,
    pub total: u64,
    pub correct_perc: Option<f64>,
    pub incorrect_perc: Option<f64>,
}

impl PitchBin {
    pub fn from_counts(bin: u32, correct: u64, incorrect: u64) -> Self {
        let total = correct + incorrect;
        let (correct_perc, incorrect_perc) = if total > 0 {
            (
                Some(correct as f64 / total as f64),
                Some(incorrect as f64 / total as f64),
            )
        } else {
            (None, None)
        };
        Self {
            bin,
            correct,
            incorrect,
            total,
            correct_perc,
            incorrect_perc,
        }
    }
}

/// Per-split accuracy in the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub samples: usize,
    pub correct: usize,
    pub accuracy: Option<f64>,
}

/// Run summary written next to the tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub version: String,
    pub total_samples: usize,
    pub classes: Vec<String>,
    pub splits: BTreeMap<String, SplitSummary>,
    pub evaluated_split: String,
    pub bin_width: usize,
    pub evaluated_samples: u64,
    pub empty_bins: usize,
}

impl EvaluationSummary {
    pub fn build(
        table: &PredictionTable,
        classes: &[String],
        bins: &[PitchBin],
        evaluated_split: &str,
        bin_width: usize,
    ) -> Self {
        let mut splits: BTreeMap<String, SplitSummary> = BTreeMap::new();
        for row in &table.rows {
            let entry = splits.entry(row.split.clone()).or_insert(SplitSummary {
                samples: 0,
                correct: 0,
                accuracy: None,
            });
            entry.samples += 1;
            if row.correct_class {
                entry.correct += 1;
            }
        }
        for summary in splits.values_mut() {
            if summary.samples > 0 {
                summary.accuracy = Some(summary.correct as f64 / summary.samples as f64);
            }
        }

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            total_samples: table.len(),
            classes: classes.to_vec(),
            splits,
            evaluated_split: evaluated_split.to_string(),
            bin_width,
            evaluated_samples: bins.iter().map(|b| b.total).sum(),
            empty_bins: bins.iter().filter(|b| b.total == 0).count(),
        }
    }
}

/// Round to a fixed number of decimal digits
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Write the joined per-sample table
pub fn export_predictions(table: &PredictionTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| EvalError::Export(format!("{}: {}", path.display(), e)))?;
    writer
        .write_record(table.header())
        .map_err(|e| EvalError::Export(format!("{}: {}", path.display(), e)))?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(row.values.len() + row.probabilities.len() + 4);
        record.push(row.sample_id.clone());
        record.extend(row.values.iter().cloned());
        record.push(row.split.clone());
        record.extend(row.probabilities.iter().map(|p| p.to_string()));
        record.push(row.class_pred.to_string());
        record.push(format_bool(row.correct_class).to_string());
        writer
            .write_record(&record)
            .map_err(|e| EvalError::Export(format!("{}: {}", path.display(), e)))?;
    }
    writer.flush()?;

    info!(rows = table.len(), path = %path.display(), "wrote predictions");
    Ok(())
}

/// Read back a table written by [`export_predictions`]
pub fn read_predictions(path: &Path) -> Result<PredictionTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let split_col = headers
        .iter()
        .position(|h| h == "split")
        .ok_or_else(|| malformed(path, "missing column 'split'"))?;
    let class_col = headers
        .iter()
        .position(|h| h == "class_pred")
        .ok_or_else(|| malformed(path, "missing column 'class_pred'"))?;
    let correct_col = headers
        .iter()
        .position(|h| h == "correct_class")
        .ok_or_else(|| malformed(path, "missing column 'correct_class'"))?;
    if split_col == 0 || class_col < split_col || correct_col < class_col {
        return Err(malformed(path, "unexpected column order"));
    }

    let metadata_columns = headers[1..split_col].to_vec();
    let probability_columns = headers[split_col + 1..class_col].to_vec();
    let midi_col = metadata_columns
        .iter()
        .position(|h| h == "midi_number")
        .ok_or_else(|| malformed(path, "missing column 'midi_number'"))?
        + 1;
    let family_col = metadata_columns
        .iter()
        .position(|h| h == "family_id")
        .ok_or_else(|| malformed(path, "missing column 'family_id'"))?
        + 1;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |col: usize| record.get(col).unwrap_or("");
        let sample_id = field(0).to_string();
        let context = |column: &str| format!("sample '{}': bad {}", sample_id, column);

        let midi_number = crate::dataset::parse_integer(field(midi_col))
            .map_err(|_| malformed(path, &context("midi_number")))?;
        let family_id = crate::dataset::parse_integer(field(family_col))
            .map_err(|_| malformed(path, &context("family_id")))?;
        let probabilities = (split_col + 1..class_col)
            .map(|col| field(col).trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| malformed(path, &context("probability")))?;
        let class_pred = field(class_col)
            .trim()
            .parse::<usize>()
            .map_err(|_| malformed(path, &context("class_pred")))?;
        let correct_class =
            parse_bool(field(correct_col)).ok_or_else(|| malformed(path, &context("correct_class")))?;

        rows.push(SampleRecord {
            midi_number,
            family_id,
            split: field(split_col).to_string(),
            values: (1..split_col).map(|col| field(col).to_string()).collect(),
            probabilities,
            class_pred,
            correct_class,
            sample_id,
        });
    }

    Ok(PredictionTable {
        index_name: headers[0].clone(),
        metadata_columns,
        probability_columns,
        rows,
    })
}

/// Write the per-bin aggregate table
pub fn export_bins(bins: &[PitchBin], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| EvalError::Export(format!("{}: {}", path.display(), e)))?;
    for bin in bins {
        writer
            .serialize(bin)
            .map_err(|e| EvalError::Export(format!("{}: {}", path.display(), e)))?;
    }
    writer.flush()?;

    info!(bins = bins.len(), path = %path.display(), "wrote pitch bins");
    Ok(())
}

/// Read back a table written by [`export_bins`]
pub fn read_bins(path: &Path) -> Result<Vec<PitchBin>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bins = Vec::new();
    for bin in reader.deserialize() {
        bins.push(bin?);
    }
    Ok(bins)
}

/// Write the run summary as pretty JSON
pub fn export_summary(summary: &EvaluationSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "wrote summary");
    Ok(())
}

fn malformed(path: &Path, msg: &str) -> EvalError {
    EvalError::MalformedInput(format!("{}: {}", path.display(), msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, split: &str, correct: bool) -> SampleRecord {
        SampleRecord {
            sample_id: id.to_string(),
            midi_number: 60,
            family_id: 1,
            split: split.to_string(),
            values: vec!["60".to_string(), "1".to_string()],
            probabilities: vec![0.25, 0.75],
            class_pred: if correct { 1 } else { 0 },
            correct_class: correct,
        }
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456789, 5), 0.12346);
        assert_eq!(round_to(0.5, 0), 1.0);
        assert_eq!(round_to(f64::from(0.1f32), 5), 0.1);
    }

    #[test]
    fn test_pitch_bin_percentages() {
        let bin = PitchBin::from_counts(16, 3, 1);
        assert_eq!(bin.total, 4);
        assert_eq!(bin.correct_perc, Some(0.75));
        assert_eq!(bin.incorrect_perc, Some(0.25));

        let empty = PitchBin::from_counts(24, 0, 0);
        assert_eq!(empty.total, 0);
        assert_eq!(empty.correct_perc, None);
        assert_eq!(empty.incorrect_perc, None);
    }

    #[test]
    fn test_bins_csv_keeps_empty_percentages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bins.csv");
        let bins = vec![PitchBin::from_counts(0, 2, 2), PitchBin::from_counts(8, 0, 0)];
        export_bins(&bins, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("bin,correct,incorrect,total,correct_perc,incorrect_perc")
        );
        assert_eq!(lines.next(), Some("0,2,2,4,0.5,0.5"));
        assert_eq!(lines.next(), Some("8,0,0,0,,"));

        assert_eq!(read_bins(&path).unwrap(), bins);
    }

    #[test]
    fn test_predictions_header_layout() {
        let table = PredictionTable {
            index_name: String::new(),
            metadata_columns: vec!["midi_number".to_string(), "family_id".to_string()],
            probability_columns: vec!["proba_brass".to_string(), "proba_string".to_string()],
            rows: vec![sample("0", "valid", true)],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        export_predictions(&table, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(",midi_number,family_id,split,proba_brass,proba_string,class_pred,correct_class")
        );
        assert_eq!(lines.next(), Some("0,60,1,valid,0.25,0.75,1,True"));
    }

    #[test]
    fn test_summary_accuracy_per_split() {
        let table = PredictionTable {
            rows: vec![
                sample("0", "train", true),
                sample("1", "valid", true),
                sample("2", "valid", false),
                sample("3", "valid", false),
            ],
            ..Default::default()
        };
        let bins = vec![PitchBin::from_counts(0, 1, 2), PitchBin::from_counts(8, 0, 0)];
        let summary = EvaluationSummary::build(&table, &[], &bins, "valid", 8);

        assert_eq!(summary.total_samples, 4);
        assert_eq!(summary.splits["train"].accuracy, Some(1.0));
        assert_eq!(summary.splits["valid"].correct, 1);
        assert_eq!(summary.evaluated_samples, 3);
        assert_eq!(summary.empty_bins, 1);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
