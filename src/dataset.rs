//! Dataset loading: feature arrays, metadata tables and split indices

use crate::analysis::{PitchBin, PitchCount, PredictionTable, Predictions};
use crate::config::Config;
use crate::error::{EvalError, Result};
use ndarray::{Array2, ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::NpzReader;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Feature matrix and targets read from the `.npz` archive
#[derive(Debug, Clone)]
pub struct FeatureTargets {
    /// Features flattened to (n_samples, n_features)
    pub x: Array2<f32>,
    /// Targets as stored, converted to f64
    pub y: ArrayD<f64>,
}

impl FeatureTargets {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Number of target rows (first axis of `y`)
    pub fn n_targets(&self) -> usize {
        self.y.shape().first().copied().unwrap_or(0)
    }

    /// One integer label per row, available when `y` is one-dimensional
    pub fn target_labels(&self) -> Option<Vec<i64>> {
        if self.y.ndim() != 1 {
            return None;
        }
        Some(self.y.iter().map(|&v| v.round() as i64).collect())
    }
}

/// One row of `parameters_with_targets.csv`
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRow {
    pub sample_id: String,
    pub midi_number: i64,
    pub family_id: i64,
    /// Every non-index field in header order, as read
    pub values: Vec<String>,
}

/// Sample metadata keyed by sample id
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    /// Header of the index column (often empty)
    pub index_name: String,
    /// Non-index column names
    pub columns: Vec<String>,
    pub rows: Vec<ParameterRow>,
}

impl ParameterTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRow {
    pub sample_id: String,
    pub split: String,
}

/// Split assignment per sample id (`splits.csv`)
#[derive(Debug, Clone, Default)]
pub struct SplitTable {
    pub rows: Vec<SplitRow>,
}

/// Row positions per split name (`splits.json`)
#[derive(Debug, Clone, Default)]
pub struct SplitIndices {
    pub indices: BTreeMap<String, Vec<usize>>,
}

/// Everything read from a dataset root before inference
#[derive(Debug, Clone)]
pub struct Dataset {
    pub root: PathBuf,
    pub features: FeatureTargets,
    pub parameters: ParameterTable,
    pub splits: SplitTable,
    pub split_indices: SplitIndices,
}

impl Dataset {
    /// Load all inputs below `data_dir`; any missing or malformed file is fatal
    pub fn load<P: AsRef<Path>>(data_dir: P, config: &Config) -> Result<Self> {
        let root = data_dir.as_ref().to_path_buf();
        validate_inputs(&root, config)?;

        let paths = &config.paths;
        let features = load_features(paths.ml_input(&root, &paths.features_file))?;
        let parameters = load_parameters(paths.ml_input(&root, &paths.parameters_file))?;
        let splits = load_splits(paths.ml_input(&root, &paths.splits_file))?;
        let split_indices = load_split_indices(paths.ml_input(&root, &paths.split_indices_file))?;

        debug!(
            samples = features.n_samples(),
            features = features.n_features(),
            metadata_rows = parameters.len(),
            split_rows = splits.rows.len(),
            "dataset loaded"
        );

        Ok(Dataset {
            root,
            features,
            parameters,
            splits,
            split_indices,
        })
    }
}

/// Evaluation state threaded through the passes
#[derive(Debug, Clone)]
pub struct EvaluationState {
    /// Loaded inputs
    pub dataset: Dataset,
    /// Configuration reference
    pub config: Config,

    // Pass 0: Preflight
    /// Split label per metadata row, joined by sample id
    pub splits_by_row: Vec<String>,

    // Pass 1: Inference
    /// Model output per feature row
    pub predictions: Option<Predictions>,

    // Pass 2: Join
    /// Joined per-sample table
    pub table: PredictionTable,

    // Pass 3: Pitch error
    /// Counts per MIDI pitch for the evaluated split
    pub pitch_counts: Vec<PitchCount>,
    /// Counts per pitch bin
    pub pitch_bins: Vec<PitchBin>,
}

impl EvaluationState {
    /// Load a dataset root and create the initial state
    pub fn load<P: AsRef<Path>>(data_dir: P, config: &Config) -> Result<Self> {
        let dataset = Dataset::load(data_dir, config)?;
        Ok(Self::from_dataset(dataset, config))
    }

    /// Create a state around an already loaded dataset
    pub fn from_dataset(dataset: Dataset, config: &Config) -> Self {
        EvaluationState {
            dataset,
            config: config.clone(),
            splits_by_row: Vec::new(),
            predictions: None,
            table: PredictionTable::default(),
            pitch_counts: Vec::new(),
            pitch_bins: Vec::new(),
        }
    }
}

/// Input files expected below a dataset root
pub fn required_inputs(data_dir: &Path, config: &Config) -> Vec<PathBuf> {
    let paths = &config.paths;
    [
        &paths.features_file,
        &paths.parameters_file,
        &paths.splits_file,
        &paths.split_indices_file,
    ]
    .iter()
    .map(|file| paths.ml_input(data_dir, file))
    .collect()
}

/// Check that every expected input file exists
pub fn validate_inputs(data_dir: &Path, config: &Config) -> Result<()> {
    if !data_dir.is_dir() {
        return Err(EvalError::MissingInput(format!(
            "dataset directory {} does not exist",
            data_dir.display()
        )));
    }
    for path in required_inputs(data_dir, config) {
        require_file(&path)?;
    }
    Ok(())
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EvalError::MissingInput(path.display().to_string()))
    }
}

/// Load `x` and `y` from a NumPy `.npz` archive
pub fn load_features<P: AsRef<Path>>(path: P) -> Result<FeatureTargets> {
    let path = path.as_ref();
    require_file(path)?;

    let file = File::open(path)?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| EvalError::MalformedInput(format!("{}: {}", path.display(), e)))?;
    let names = npz
        .names()
        .map_err(|e| EvalError::MalformedInput(format!("{}: {}", path.display(), e)))?;

    let x = read_npz_array(&mut npz, &names, "x", path)?;
    let y = read_npz_array(&mut npz, &names, "y", path)?;

    let x = flatten_features(x.mapv(|v| v as f32)).map_err(|msg| {
        EvalError::MalformedInput(format!("{}: array 'x' {}", path.display(), msg))
    })?;
    if y.ndim() == 0 {
        return Err(EvalError::MalformedInput(format!(
            "{}: array 'y' is a scalar",
            path.display()
        )));
    }

    Ok(FeatureTargets { x, y })
}

/// Read one array by key, accepting both `key` and `key.npy` entry names
fn read_npz_array(
    npz: &mut NpzReader<File>,
    names: &[String],
    key: &str,
    path: &Path,
) -> Result<ArrayD<f64>> {
    let entry = names
        .iter()
        .find(|name| name.as_str() == key || name.strip_suffix(".npy") == Some(key))
        .cloned()
        .ok_or_else(|| {
            EvalError::MalformedInput(format!(
                "{}: no array '{}' (found {:?})",
                path.display(),
                key,
                names
            ))
        })?;

    if let Ok(array) = npz.by_name::<OwnedRepr<f64>, IxDyn>(&entry) {
        return Ok(array);
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<f32>, IxDyn>(&entry) {
        return Ok(array.mapv(f64::from));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, IxDyn>(&entry) {
        return Ok(array.mapv(|v| v as f64));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i32>, IxDyn>(&entry) {
        return Ok(array.mapv(f64::from));
    }
    npz.by_name::<OwnedRepr<u8>, IxDyn>(&entry)
        .map(|array| array.mapv(f64::from))
        .map_err(|e| {
            EvalError::MalformedInput(format!(
                "{}: array '{}' has an unsupported element type ({})",
                path.display(),
                key,
                e
            ))
        })
}

/// Flatten everything after the first axis into one feature axis
pub fn flatten_features(x: ArrayD<f32>) -> std::result::Result<Array2<f32>, String> {
    let shape = x.shape().to_vec();
    let (n_samples, n_features) = match shape.as_slice() {
        [] => return Err("is a scalar".to_string()),
        [n] => (*n, 1),
        [n, rest @ ..] => (*n, rest.iter().product()),
    };
    x.as_standard_layout()
        .into_owned()
        .into_shape((n_samples, n_features))
        .map_err(|e| format!("cannot be reshaped from {:?}: {}", shape, e))
}

/// Load the sample metadata table; the first column is the sample id
pub fn load_parameters<P: AsRef<Path>>(path: P) -> Result<ParameterTable> {
    let path = path.as_ref();
    require_file(path)?;

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(EvalError::MalformedInput(format!(
            "{}: expected an index column and data columns",
            path.display()
        )));
    }

    let index_name = headers[0].to_string();
    let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    let midi_col = column_position(&headers, "midi_number", path)?;
    let family_col = column_position(&headers, "family_id", path)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |col: usize| record.get(col).unwrap_or("");
        let sample_id = field(0).to_string();
        let midi_number = parse_integer(field(midi_col))
            .map_err(|msg| malformed_field(path, line, "midi_number", &msg))?;
        let family_id = parse_integer(field(family_col))
            .map_err(|msg| malformed_field(path, line, "family_id", &msg))?;
        rows.push(ParameterRow {
            sample_id,
            midi_number,
            family_id,
            values: record.iter().skip(1).map(str::to_string).collect(),
        });
    }

    Ok(ParameterTable {
        index_name,
        columns,
        rows,
    })
}

/// Load the split assignment table; the first column is the sample id
pub fn load_splits<P: AsRef<Path>>(path: P) -> Result<SplitTable> {
    let path = path.as_ref();
    require_file(path)?;

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let split_col = column_position(&headers, "split", path)?;
    if split_col == 0 {
        return Err(EvalError::MalformedInput(format!(
            "{}: 'split' must not be the index column",
            path.display()
        )));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let split = record.get(split_col).unwrap_or("").trim().to_string();
        if split.is_empty() {
            return Err(malformed_field(path, line, "split", "empty value"));
        }
        rows.push(SplitRow {
            sample_id: record.get(0).unwrap_or("").to_string(),
            split,
        });
    }

    Ok(SplitTable { rows })
}

/// Load the split index document; only its `indices` field is read
pub fn load_split_indices<P: AsRef<Path>>(path: P) -> Result<SplitIndices> {
    let path = path.as_ref();
    require_file(path)?;

    let content = std::fs::read_to_string(path)?;
    let document: Value = serde_json::from_str(&content)
        .map_err(|e| EvalError::MalformedInput(format!("{}: {}", path.display(), e)))?;
    let indices = document.get("indices").ok_or_else(|| {
        EvalError::MalformedInput(format!("{}: missing 'indices' field", path.display()))
    })?;

    let entries: Vec<(String, &Value)> = match indices {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => {
            return Err(EvalError::MalformedInput(format!(
                "{}: 'indices' must be an object or array, got {}",
                path.display(),
                other
            )))
        }
    };

    let mut result = BTreeMap::new();
    for (name, value) in entries {
        match decode_index_list(value) {
            Some(list) => {
                result.insert(name, list);
            }
            None => debug!(split = %name, "skipping undecodable index list"),
        }
    }

    Ok(SplitIndices { indices: result })
}

/// Decode a plain JSON array or a jsonpickle numpy object with a `values` array
pub fn decode_index_list(value: &Value) -> Option<Vec<usize>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().map(|n| n as usize))
            .collect(),
        Value::Object(map) => map.get("values").and_then(decode_index_list),
        _ => None,
    }
}

/// Parse an integer column value, accepting integral floats such as "60.0"
pub fn parse_integer(raw: &str) -> std::result::Result<i64, String> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => Err(format!("'{}' is not an integer", raw)),
    }
}

fn column_position(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        EvalError::MalformedInput(format!("{}: missing column '{}'", path.display(), name))
    })
}

fn malformed_field(path: &Path, line: usize, column: &str, msg: &str) -> EvalError {
    // +2: header line and 1-based numbering
    EvalError::MalformedInput(format!(
        "{} line {}: column '{}': {}",
        path.display(),
        line + 2,
        column,
        msg
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("60"), Ok(60));
        assert_eq!(parse_integer(" 61.0 "), Ok(61));
        assert_eq!(parse_integer("-3"), Ok(-3));
        assert!(parse_integer("60.5").is_err());
        assert!(parse_integer("").is_err());
        assert!(parse_integer("nan").is_err());
    }

    #[test]
    fn test_decode_index_list() {
        let plain = serde_json::json!([0, 3, 5]);
        assert_eq!(decode_index_list(&plain), Some(vec![0, 3, 5]));

        let pickled = serde_json::json!({
            "py/object": "numpy.ndarray",
            "dtype": "int64",
            "values": [2, 4]
        });
        assert_eq!(decode_index_list(&pickled), Some(vec![2, 4]));

        let binary = serde_json::json!({ "py/b64": "AAAA" });
        assert_eq!(decode_index_list(&binary), None);
    }

    #[test]
    fn test_flatten_features() {
        let x = Array::from_shape_vec(IxDyn(&[2, 3, 2]), (0..12).map(|v| v as f32).collect())
            .unwrap();
        let flat = flatten_features(x).unwrap();
        assert_eq!(flat.dim(), (2, 6));
        assert_eq!(flat[[1, 0]], 6.0);

        let column = Array::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(flatten_features(column).unwrap().dim(), (3, 1));
    }

    #[test]
    fn test_load_parameters_keeps_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters_with_targets.csv");
        std::fs::write(
            &path,
            ",instrument,midi_number,family_id\n0,violin,60,3\n1,flute,72.0,1\n",
        )
        .unwrap();

        let table = load_parameters(&path).unwrap();
        assert_eq!(table.index_name, "");
        assert_eq!(table.columns, vec!["instrument", "midi_number", "family_id"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].sample_id, "1");
        assert_eq!(table.rows[1].midi_number, 72);
        assert_eq!(table.rows[1].family_id, 1);
        assert_eq!(table.rows[0].values, vec!["violin", "60", "3"]);
    }

    #[test]
    fn test_load_parameters_requires_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters_with_targets.csv");
        std::fs::write(&path, ",midi_number\n0,60\n").unwrap();

        let err = load_parameters(&path).unwrap_err();
        assert!(matches!(err, EvalError::MalformedInput(_)));
        assert!(err.to_string().contains("family_id"));
    }

    #[test]
    fn test_load_parameters_rejects_bad_pitch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters_with_targets.csv");
        std::fs::write(&path, ",midi_number,family_id\n0,sixty,1\n").unwrap();

        let err = load_parameters(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_splits(dir.path().join("splits.csv")).unwrap_err();
        assert!(matches!(err, EvalError::MissingInput(_)));
    }

    #[test]
    fn test_load_split_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.json");
        std::fs::write(
            &path,
            r#"{"indices": {"train": [0, 1], "valid": {"values": [2]}, "test": []}}"#,
        )
        .unwrap();

        let indices = load_split_indices(&path).unwrap();
        assert_eq!(indices.indices["train"], vec![0, 1]);
        assert_eq!(indices.indices["valid"], vec![2]);
        assert!(indices.indices["test"].is_empty());
    }

    #[test]
    fn test_split_indices_require_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.json");
        std::fs::write(&path, r#"{"other": 1}"#).unwrap();
        assert!(matches!(
            load_split_indices(&path),
            Err(EvalError::MalformedInput(_))
        ));
    }
}
