//! Pass 0: Preflight & Join-Key Validation

use crate::config::Config;
use crate::dataset::{EvaluationState, FeatureTargets, ParameterTable, SplitIndices, SplitTable};
use crate::error::{EvalError, Result};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Columns appended by the join; metadata must not already carry them
const RESERVED_COLUMNS: [&str; 3] = ["split", "class_pred", "correct_class"];

/// Check array shapes and table keys, then resolve the split of every metadata row
pub fn run(state: &mut EvaluationState, config: &Config) -> Result<()> {
    info!("Pass 0: preflight");

    let dataset = &state.dataset;
    check_feature_rows(&dataset.features, &dataset.parameters)?;
    check_reserved_columns(&dataset.parameters, &config.inference.probability_prefix)?;

    let splits_by_row = join_splits(&dataset.parameters, &dataset.splits)?;

    let mismatched = count_target_mismatches(&dataset.features, &dataset.parameters);
    if mismatched > 0 {
        warn!(
            rows = mismatched,
            "targets in the feature archive disagree with family_id; row order may be misaligned"
        );
    }

    for (split, stray) in check_split_indices(&dataset.split_indices, &splits_by_row) {
        warn!(split = %split, positions = stray, "split index positions disagree with splits table");
    }

    if !splits_by_row.iter().any(|s| s == &config.aggregation.split) {
        warn!(split = %config.aggregation.split, "no samples in the evaluated split");
    }

    info!(
        samples = splits_by_row.len(),
        features = dataset.features.n_features(),
        "  ✓ inputs consistent"
    );
    state.splits_by_row = splits_by_row;
    Ok(())
}

/// Feature rows, target rows and metadata rows must all agree
pub fn check_feature_rows(features: &FeatureTargets, parameters: &ParameterTable) -> Result<()> {
    if features.n_samples() != features.n_targets() {
        return Err(EvalError::ShapeMismatch(format!(
            "features have {} rows but targets have {}",
            features.n_samples(),
            features.n_targets()
        )));
    }
    if features.n_samples() != parameters.len() {
        return Err(EvalError::ShapeMismatch(format!(
            "features have {} rows but the metadata table has {}",
            features.n_samples(),
            parameters.len()
        )));
    }
    Ok(())
}

fn check_reserved_columns(parameters: &ParameterTable, probability_prefix: &str) -> Result<()> {
    for column in &parameters.columns {
        if RESERVED_COLUMNS.contains(&column.as_str()) || column.starts_with(probability_prefix) {
            return Err(EvalError::JoinKeyMismatch(format!(
                "metadata column '{}' collides with a joined column",
                column
            )));
        }
    }
    Ok(())
}

/// Join split labels onto metadata rows by sample id
///
/// Both tables must have unique ids and every metadata row needs a split.
/// Split rows without metadata are ignored.
pub fn join_splits(parameters: &ParameterTable, splits: &SplitTable) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(parameters.len());
    for row in &parameters.rows {
        if !seen.insert(row.sample_id.as_str()) {
            return Err(EvalError::JoinKeyMismatch(format!(
                "duplicate sample id '{}' in metadata table",
                row.sample_id
            )));
        }
    }

    let mut by_id: HashMap<&str, &str> = HashMap::with_capacity(splits.rows.len());
    for row in &splits.rows {
        if by_id
            .insert(row.sample_id.as_str(), row.split.as_str())
            .is_some()
        {
            return Err(EvalError::JoinKeyMismatch(format!(
                "duplicate sample id '{}' in splits table",
                row.sample_id
            )));
        }
    }

    let joined = parameters
        .rows
        .iter()
        .map(|row| {
            by_id
                .get(row.sample_id.as_str())
                .map(|split| split.to_string())
                .ok_or_else(|| {
                    EvalError::JoinKeyMismatch(format!(
                        "sample id '{}' has no split assignment",
                        row.sample_id
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    if by_id.len() > joined.len() {
        warn!(
            rows = by_id.len() - joined.len(),
            "split rows without metadata are ignored"
        );
    }

    Ok(joined)
}

/// Rows where a one-dimensional target disagrees with `family_id`
pub fn count_target_mismatches(features: &FeatureTargets, parameters: &ParameterTable) -> usize {
    match features.target_labels() {
        Some(labels) => labels
            .iter()
            .zip(&parameters.rows)
            .filter(|(label, row)| **label != row.family_id)
            .count(),
        None => 0,
    }
}

/// Per split name, the number of index positions pointing at a row of another split
pub fn check_split_indices(indices: &SplitIndices, splits_by_row: &[String]) -> Vec<(String, usize)> {
    indices
        .indices
        .iter()
        .filter_map(|(name, positions)| {
            let stray = positions
                .iter()
                .filter(|&&pos| splits_by_row.get(pos).map_or(true, |s| s != name))
                .count();
            (stray > 0).then(|| (name.clone(), stray))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ParameterRow, SplitRow};
    use ndarray::{Array1, Array2};
    use std::collections::BTreeMap;

    fn parameters(ids: &[&str]) -> ParameterTable {
        ParameterTable {
            index_name: String::new(),
            columns: vec!["midi_number".to_string(), "family_id".to_string()],
            rows: ids
                .iter()
                .enumerate()
                .map(|(i, id)| ParameterRow {
                    sample_id: id.to_string(),
                    midi_number: 60,
                    family_id: i as i64 % 2,
                    values: vec!["60".to_string(), (i % 2).to_string()],
                })
                .collect(),
        }
    }

    fn splits(pairs: &[(&str, &str)]) -> SplitTable {
        SplitTable {
            rows: pairs
                .iter()
                .map(|(id, split)| SplitRow {
                    sample_id: id.to_string(),
                    split: split.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_join_splits_by_key_not_position() {
        let params = parameters(&["a", "b", "c"]);
        let table = splits(&[("c", "test"), ("a", "train"), ("b", "valid")]);
        let joined = join_splits(&params, &table).unwrap();
        assert_eq!(joined, vec!["train", "valid", "test"]);
    }

    #[test]
    fn test_join_splits_requires_assignment() {
        let params = parameters(&["a", "b"]);
        let table = splits(&[("a", "train")]);
        let err = join_splits(&params, &table).unwrap_err();
        assert!(matches!(err, EvalError::JoinKeyMismatch(_)));
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_join_splits_rejects_duplicates() {
        let params = parameters(&["a", "a"]);
        let table = splits(&[("a", "train")]);
        assert!(join_splits(&params, &table).is_err());

        let params = parameters(&["a"]);
        let table = splits(&[("a", "train"), ("a", "valid")]);
        assert!(join_splits(&params, &table).is_err());
    }

    #[test]
    fn test_feature_row_mismatch_is_fatal() {
        let features = FeatureTargets {
            x: Array2::zeros((2, 4)),
            y: Array1::<f64>::zeros(2).into_dyn(),
        };
        let params = parameters(&["a", "b", "c"]);
        assert!(matches!(
            check_feature_rows(&features, &params),
            Err(EvalError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_target_mismatch_count() {
        let features = FeatureTargets {
            x: Array2::zeros((3, 1)),
            y: Array1::from(vec![0.0, 0.0, 0.0]).into_dyn(),
        };
        // family ids are 0, 1, 0
        let params = parameters(&["a", "b", "c"]);
        assert_eq!(count_target_mismatches(&features, &params), 1);
    }

    #[test]
    fn test_split_indices_cross_check() {
        let mut indices = BTreeMap::new();
        indices.insert("train".to_string(), vec![0, 1]);
        indices.insert("valid".to_string(), vec![2, 7]);
        let indices = SplitIndices { indices };
        let by_row = vec!["train".to_string(), "train".to_string(), "valid".to_string()];

        assert_eq!(
            check_split_indices(&indices, &by_row),
            vec![("valid".to_string(), 1)]
        );
    }

    #[test]
    fn test_reserved_column_collision() {
        let mut params = parameters(&["a"]);
        params.columns.push("split".to_string());
        assert!(check_reserved_columns(&params, "proba_").is_err());

        let mut params = parameters(&["a"]);
        params.columns.push("proba_brass".to_string());
        assert!(check_reserved_columns(&params, "proba_").is_err());
    }
}
