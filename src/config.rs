//! Configuration system for the pitch error analysis

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of MIDI pitches covered by the pitch index (0..=127)
pub const MIDI_PITCH_COUNT: usize = 128;

/// Chart formats `report.image_formats` may list
pub const SUPPORTED_IMAGE_FORMATS: [&str; 3] = ["pdf", "svg", "png"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub paths: PathsConfig,
    pub inference: InferenceConfig,
    pub aggregation: AggregationConfig,
    pub report: ReportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            paths: PathsConfig::default(),
            inference: InferenceConfig::default(),
            aggregation: AggregationConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// File layout relative to the dataset root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub ml_inputs_dir: String,
    pub features_file: String,
    pub parameters_file: String,
    pub splits_file: String,
    pub split_indices_file: String,
    pub model_dir: String,
    pub model_file: String,
    pub label_encoder_file: String,
    pub evaluation_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ml_inputs_dir: "ml-inputs".to_string(),
            features_file: "features_targets.npz".to_string(),
            parameters_file: "parameters_with_targets.csv".to_string(),
            splits_file: "splits.csv".to_string(),
            split_indices_file: "splits.json".to_string(),
            model_dir: "model".to_string(),
            model_file: "model.json".to_string(),
            label_encoder_file: "instr_family_le.json".to_string(),
            evaluation_dir: "evaluation".to_string(),
        }
    }
}

impl PathsConfig {
    /// Resolve a file inside the `ml-inputs` directory of a dataset root
    pub fn ml_input(&self, data_dir: &Path, file: &str) -> std::path::PathBuf {
        data_dir.join(&self.ml_inputs_dir).join(file)
    }
}

/// Inference output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Decimal digits kept on probability columns
    pub probability_decimals: u32,
    /// Prefix of the per-class probability columns
    pub probability_prefix: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            probability_decimals: 5,
            probability_prefix: "proba_".to_string(),
        }
    }
}

/// What to do with a MIDI number outside 0..=127
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRangePolicy {
    /// Abort the run naming the offending sample
    Error,
    /// Skip the sample in the pitch analysis
    Drop,
    /// Clamp the pitch into 0..=127
    Clamp,
}

/// Pitch aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Split analysed for error by pitch
    pub split: String,
    /// Width of a pitch bin in semitones
    pub bin_width: usize,
    pub out_of_range: OutOfRangePolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            split: "valid".to_string(),
            bin_width: 8,
            out_of_range: OutOfRangePolicy::Error,
        }
    }
}

/// Output tables and chart configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub predictions_file: String,
    /// Stem shared by the bin table and the chart files
    pub bins_stem: String,
    pub summary_file: String,
    /// Chart formats to render ("pdf", "svg", "png"); empty disables the chart
    pub image_formats: Vec<String>,
    pub image_size: [u32; 2],
    pub title: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            predictions_file: "predictions.csv".to_string(),
            bins_stem: "error_by_midi_valid_bins".to_string(),
            summary_file: "summary.json".to_string(),
            image_formats: vec!["pdf".to_string()],
            image_size: [1500, 500],
            title: "Error (absolute, relative) by pitch bins".to_string(),
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> Result<()> {
    if config.aggregation.bin_width == 0 {
        return Err(EvalError::ConfigValidation(
            "aggregation.bin_width must be > 0".to_string(),
        ));
    }
    if config.aggregation.bin_width > MIDI_PITCH_COUNT {
        return Err(EvalError::ConfigValidation(format!(
            "aggregation.bin_width must be <= {}",
            MIDI_PITCH_COUNT
        )));
    }
    if config.aggregation.split.trim().is_empty() {
        return Err(EvalError::ConfigValidation(
            "aggregation.split must not be empty".to_string(),
        ));
    }

    // Joined columns are recognised by this prefix
    if config.inference.probability_prefix.is_empty() {
        return Err(EvalError::ConfigValidation(
            "inference.probability_prefix must not be empty".to_string(),
        ));
    }

    // f64 carries ~15 significant digits
    if config.inference.probability_decimals > 15 {
        return Err(EvalError::ConfigValidation(
            "inference.probability_decimals must be <= 15".to_string(),
        ));
    }

    for format in &config.report.image_formats {
        if !SUPPORTED_IMAGE_FORMATS.contains(&format.as_str()) {
            return Err(EvalError::ConfigValidation(format!(
                "unsupported image format '{}' (expected one of {:?})",
                format, SUPPORTED_IMAGE_FORMATS
            )));
        }
    }
    if config.report.image_size[0] == 0 || config.report.image_size[1] == 0 {
        return Err(EvalError::ConfigValidation(
            "report.image_size must be non-zero".to_string(),
        ));
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| EvalError::MissingInput(format!("{}: {}", path.display(), e)))?;
    let config: Config = serde_json::from_str(&content).map_err(|e| {
        EvalError::ConfigValidation(format!("{}: {}", path.display(), e))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
