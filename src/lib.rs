//! Pitch Error Analysis for Instrument-Family Classifiers
//!
//! Runs a trained classifier over a precomputed feature archive, joins the
//! predictions with sample metadata and reports how the error rate depends on
//! the pitch of the note, in fixed-width MIDI bins.

pub mod analysis;
pub mod chart;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod passes;

pub use config::Config;
pub use dataset::{Dataset, EvaluationState};
pub use error::{EvalError, Result as EvalResult};
pub use model::{Classifier, InstrumentClassifier, LabelEncoder};

use analysis::EvaluationSummary;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files written by one evaluation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub predictions: PathBuf,
    pub bins: PathBuf,
    pub summary: PathBuf,
    pub charts: Vec<PathBuf>,
}

/// Final state of a run together with the files it produced
#[derive(Debug)]
pub struct EvaluationOutcome {
    pub state: EvaluationState,
    pub files: ReportFiles,
}

/// Main evaluation pipeline
pub struct PitchErrorAnalysis {
    config: Config,
}

impl PitchErrorAnalysis {
    /// Create a pipeline with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Evaluate the dataset below `data_dir` with the model stored in
    /// `model_dir` (default `<data_dir>/model`), writing results to
    /// `output_dir` (default `<data_dir>/evaluation`)
    pub fn process<P: AsRef<Path>>(
        &self,
        data_dir: P,
        model_dir: Option<&Path>,
        output_dir: Option<&Path>,
    ) -> EvalResult<EvaluationOutcome> {
        let data_dir = data_dir.as_ref();
        let model_dir = model_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join(&self.config.paths.model_dir));

        let classifier = InstrumentClassifier::load(
            &model_dir,
            &self.config.paths.model_file,
            &self.config.paths.label_encoder_file,
        )?;
        info!(
            model = %model_dir.display(),
            classes = ?classifier.instr_family_le.classes,
            "loaded classifier"
        );

        self.process_with_classifier(data_dir, &classifier, output_dir)
    }

    /// Evaluate with an already loaded classifier
    pub fn process_with_classifier<P: AsRef<Path>>(
        &self,
        data_dir: P,
        classifier: &InstrumentClassifier,
        output_dir: Option<&Path>,
    ) -> EvalResult<EvaluationOutcome> {
        config::validate_config(&self.config)?;

        let data_dir = data_dir.as_ref();
        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join(&self.config.paths.evaluation_dir));

        // Load inputs
        let mut state = EvaluationState::load(data_dir, &self.config)?;

        // Run all passes
        self.run_pipeline(&mut state, classifier)?;

        // Export results
        let files = self.export_results(&state, &output_dir)?;

        Ok(EvaluationOutcome { state, files })
    }

    /// Execute the passes in order; nothing is written here
    pub fn run_pipeline(
        &self,
        state: &mut EvaluationState,
        classifier: &InstrumentClassifier,
    ) -> EvalResult<()> {
        // Pass 0: Preflight & Join-Key Validation
        passes::pass_0::run(state, &self.config)?;

        // Pass 1: Inference
        passes::pass_1::run(state, &self.config, classifier)?;

        // Pass 2: Join Predictions with Ground Truth
        passes::pass_2::run(state, &self.config)?;

        // Pass 3: Error by Pitch
        passes::pass_3::run(state, &self.config)?;

        Ok(())
    }

    /// Write tables, summary and charts
    pub fn export_results(
        &self,
        state: &EvaluationState,
        output_dir: &Path,
    ) -> EvalResult<ReportFiles> {
        let report = &self.config.report;
        std::fs::create_dir_all(output_dir)?;

        let predictions = output_dir.join(&report.predictions_file);
        analysis::export_predictions(&state.table, &predictions)?;

        let bins = output_dir.join(format!("{}.csv", report.bins_stem));
        analysis::export_bins(&state.pitch_bins, &bins)?;

        let classes = state
            .predictions
            .as_ref()
            .map(|p| p.class_names.clone())
            .unwrap_or_default();
        let summary_data = EvaluationSummary::build(
            &state.table,
            &classes,
            &state.pitch_bins,
            &self.config.aggregation.split,
            self.config.aggregation.bin_width,
        );
        let summary = output_dir.join(&report.summary_file);
        analysis::export_summary(&summary_data, &summary)?;

        let charts = chart::render_charts(&state.pitch_bins, output_dir, report)?;

        info!(dir = %output_dir.display(), "results written");
        Ok(ReportFiles {
            predictions,
            bins,
            summary,
            charts,
        })
    }
}

/// Validate configuration and the presence of input files
pub fn validate_input<P: AsRef<Path>>(data_dir: P, config: &Config) -> EvalResult<()> {
    // Check input files exist
    dataset::validate_inputs(data_dir.as_ref(), config)?;

    // Validate configuration
    config::validate_config(config)?;

    Ok(())
}
