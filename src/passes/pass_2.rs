//! Pass 2: Join Predictions with Ground Truth

use crate::analysis::{PredictionTable, Predictions, SampleRecord};
use crate::config::Config;
use crate::dataset::{EvaluationState, ParameterTable};
use crate::error::{EvalError, Result};
use tracing::info;

/// Build the joined per-sample table with its correctness flag
pub fn run(state: &mut EvaluationState, config: &Config) -> Result<()> {
    info!("Pass 2: join predictions");

    let predictions = state.predictions.as_ref().ok_or_else(|| {
        EvalError::Inference("join requested before inference ran".to_string())
    })?;

    let table = join_predictions(
        &state.dataset.parameters,
        &state.splits_by_row,
        predictions,
        &config.inference.probability_prefix,
    )?;

    let correct = table.rows.iter().filter(|r| r.correct_class).count();
    info!(
        rows = table.len(),
        correct,
        "  ✓ {:.1}% correct overall",
        if table.is_empty() {
            0.0
        } else {
            100.0 * correct as f64 / table.len() as f64
        }
    );
    state.table = table;
    Ok(())
}

/// Attach splits and predictions to metadata rows
///
/// Splits were already resolved by sample id; predictions follow feature row
/// order, so all three inputs must have the same length.
pub fn join_predictions(
    parameters: &ParameterTable,
    splits_by_row: &[String],
    predictions: &Predictions,
    probability_prefix: &str,
) -> Result<PredictionTable> {
    if splits_by_row.len() != parameters.len() {
        return Err(EvalError::JoinKeyMismatch(format!(
            "{} split labels for {} metadata rows",
            splits_by_row.len(),
            parameters.len()
        )));
    }
    if predictions.n_samples() != parameters.len()
        || predictions.probabilities.nrows() != parameters.len()
    {
        return Err(EvalError::ShapeMismatch(format!(
            "{} predictions for {} metadata rows",
            predictions.n_samples(),
            parameters.len()
        )));
    }

    let rows = parameters
        .rows
        .iter()
        .zip(splits_by_row)
        .zip(predictions.probabilities.outer_iter())
        .zip(&predictions.class_pred)
        .map(|(((row, split), proba), &class_pred)| SampleRecord {
            sample_id: row.sample_id.clone(),
            midi_number: row.midi_number,
            family_id: row.family_id,
            split: split.clone(),
            values: row.values.clone(),
            probabilities: proba.to_vec(),
            class_pred,
            correct_class: is_correct(row.family_id, class_pred),
        })
        .collect();

    Ok(PredictionTable {
        index_name: parameters.index_name.clone(),
        metadata_columns: parameters.columns.clone(),
        probability_columns: predictions
            .class_names
            .iter()
            .map(|name| format!("{}{}", probability_prefix, name))
            .collect(),
        rows,
    })
}

/// `family_id == class_pred`; a negative id never matches
pub fn is_correct(family_id: i64, class_pred: usize) -> bool {
    usize::try_from(family_id).map_or(false, |id| id == class_pred)
}
