//! Tests for Pass 2: Join Predictions with Ground Truth

use ndarray::Array2;
use pitcheval::analysis::{export_predictions, read_predictions, Predictions};
use pitcheval::dataset::{ParameterRow, ParameterTable};
use pitcheval::passes::pass_2::{is_correct, join_predictions};
use pitcheval::EvalError;

#[cfg(test)]
mod tests {
    use super::*;

    /// (midi_number, family_id, class_pred, split)
    const FIXTURE: [(i64, i64, usize, &str); 12] = [
        (21, 0, 0, "train"),
        (33, 1, 1, "valid"),
        (45, 2, 0, "valid"),
        (57, 0, 2, "test"),
        (60, 1, 1, "valid"),
        (64, 2, 2, "train"),
        (67, 0, 1, "valid"),
        (72, 1, 0, "test"),
        (76, 2, 2, "valid"),
        (81, 0, 0, "valid"),
        (88, 1, 2, "train"),
        (96, 2, 1, "valid"),
    ];

    fn create_parameters() -> ParameterTable {
        ParameterTable {
            index_name: String::new(),
            columns: vec![
                "instrument".to_string(),
                "midi_number".to_string(),
                "family_id".to_string(),
            ],
            rows: FIXTURE
                .iter()
                .enumerate()
                .map(|(i, (midi, family, _, _))| ParameterRow {
                    sample_id: (i * 10).to_string(),
                    midi_number: *midi,
                    family_id: *family,
                    values: vec![
                        format!("instr, {}", i),
                        midi.to_string(),
                        family.to_string(),
                    ],
                })
                .collect(),
        }
    }

    fn create_predictions() -> Predictions {
        let n = FIXTURE.len();
        let mut probabilities = Array2::<f64>::from_elem((n, 3), 0.1);
        for (i, (_, _, pred, _)) in FIXTURE.iter().enumerate() {
            probabilities[[i, *pred]] = 0.8;
        }
        probabilities[[0, 1]] = 0.12346;
        probabilities[[0, 2]] = 0.07654;
        Predictions {
            class_names: vec!["brass".to_string(), "string".to_string(), "reed".to_string()],
            probabilities,
            class_pred: FIXTURE.iter().map(|(_, _, pred, _)| *pred).collect(),
        }
    }

    fn create_splits() -> Vec<String> {
        FIXTURE.iter().map(|(_, _, _, s)| s.to_string()).collect()
    }

    #[test]
    fn test_correct_class_matches_labels() {
        let table =
            join_predictions(&create_parameters(), &create_splits(), &create_predictions(), "proba_")
                .unwrap();

        assert_eq!(table.len(), FIXTURE.len());
        for (row, (_, family, pred, _)) in table.rows.iter().zip(FIXTURE.iter()) {
            assert_eq!(row.correct_class, *family == *pred as i64);
            assert_eq!(row.class_pred, *pred);
        }
        let correct = table.rows.iter().filter(|r| r.correct_class).count();
        assert_eq!(correct, 6);
    }

    #[test]
    fn test_probability_columns_named_after_classes() {
        let table =
            join_predictions(&create_parameters(), &create_splits(), &create_predictions(), "proba_")
                .unwrap();
        assert_eq!(
            table.probability_columns,
            vec!["proba_brass", "proba_string", "proba_reed"]
        );
        assert_eq!(table.rows[3].split, "test");
        assert_eq!(table.rows[3].sample_id, "30");
    }

    #[test]
    fn test_row_count_mismatch_is_rejected() {
        let mut parameters = create_parameters();
        parameters.rows.pop();
        let mut splits = create_splits();
        splits.pop();

        let result = join_predictions(&parameters, &splits, &create_predictions(), "proba_");
        assert!(matches!(result, Err(EvalError::ShapeMismatch(_))));
    }

    #[test]
    fn test_split_count_mismatch_is_rejected() {
        let mut splits = create_splits();
        splits.pop();
        let result = join_predictions(&create_parameters(), &splits, &create_predictions(), "proba_");
        assert!(matches!(result, Err(EvalError::JoinKeyMismatch(_))));
    }

    #[test]
    fn test_negative_family_never_correct() {
        assert!(!is_correct(-1, 0));
        assert!(is_correct(3, 3));
        assert!(!is_correct(3, 2));
    }

    #[test]
    fn test_predictions_csv_round_trip() {
        let table =
            join_predictions(&create_parameters(), &create_splits(), &create_predictions(), "proba_")
                .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");

        export_predictions(&table, &path).unwrap();
        let reread = read_predictions(&path).unwrap();

        let flags: Vec<bool> = reread.rows.iter().map(|r| r.correct_class).collect();
        let expected: Vec<bool> = table.rows.iter().map(|r| r.correct_class).collect();
        assert_eq!(flags, expected);

        // Quoted metadata and rounded probabilities survive unchanged
        assert_eq!(reread, table);
        assert_eq!(reread.rows[0].values[0], "instr, 0");
        assert_eq!(reread.rows[0].probabilities, vec![0.8, 0.12346, 0.07654]);
    }
}
