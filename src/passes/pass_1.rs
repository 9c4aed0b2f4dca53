//! Pass 1: Inference

use crate::analysis::{round_to, Predictions};
use crate::config::Config;
use crate::dataset::EvaluationState;
use crate::error::{EvalError, Result};
use crate::model::InstrumentClassifier;
use tracing::info;

/// Predict class probabilities and classes for every feature row
pub fn run(
    state: &mut EvaluationState,
    config: &Config,
    classifier: &InstrumentClassifier,
) -> Result<()> {
    info!(
        samples = state.dataset.features.n_samples(),
        classes = classifier.instr_family_le.len(),
        "Pass 1: inference"
    );

    let predictions = predict(
        classifier,
        state.dataset.features.x.view(),
        config.inference.probability_decimals,
    )?;

    info!("  ✓ {} predictions", predictions.n_samples());
    state.predictions = Some(predictions);
    Ok(())
}

/// Run the model and round the probabilities for stable output
pub fn predict(
    classifier: &InstrumentClassifier,
    x: ndarray::ArrayView2<'_, f32>,
    decimals: u32,
) -> Result<Predictions> {
    let n_samples = x.nrows();
    let n_classes = classifier.instr_family_le.len();

    let proba = classifier.model.predict_proba(x.view())?;
    if proba.dim() != (n_samples, n_classes) {
        return Err(EvalError::Inference(format!(
            "expected probabilities of shape ({}, {}), got {:?}",
            n_samples,
            n_classes,
            proba.dim()
        )));
    }

    let class_pred = classifier.model.predict_classes(x)?;
    if class_pred.len() != n_samples {
        return Err(EvalError::Inference(format!(
            "expected {} class predictions, got {}",
            n_samples,
            class_pred.len()
        )));
    }
    if let Some(&bad) = class_pred.iter().find(|&&c| c >= n_classes) {
        return Err(EvalError::Inference(format!(
            "predicted class {} outside the {} known classes",
            bad, n_classes
        )));
    }

    Ok(Predictions {
        class_names: classifier.instr_family_le.classes.clone(),
        probabilities: proba.mapv(|p| round_to(f64::from(p), decimals)),
        class_pred,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classifier, LabelEncoder};
    use ndarray::{array, Array2, ArrayView2};

    /// Returns fixed probabilities regardless of input
    struct FixedModel(Array2<f32>);

    impl Classifier for FixedModel {
        fn n_classes(&self) -> usize {
            self.0.ncols()
        }

        fn predict_proba(&self, _x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
            Ok(self.0.clone())
        }
    }

    fn classifier(proba: Array2<f32>) -> InstrumentClassifier {
        let classes = (0..proba.ncols()).map(|i| format!("family_{}", i)).collect();
        InstrumentClassifier::new(Box::new(FixedModel(proba)), LabelEncoder::new(classes)).unwrap()
    }

    #[test]
    fn test_probabilities_are_rounded() {
        let clf = classifier(array![[0.123456f32, 0.876544], [0.9, 0.1]]);
        let x = Array2::<f32>::zeros((2, 3));
        let predictions = predict(&clf, x.view(), 5).unwrap();

        assert_eq!(predictions.probabilities[[0, 0]], 0.12346);
        assert_eq!(predictions.probabilities[[0, 1]], 0.87654);
        assert_eq!(predictions.class_pred, vec![1, 0]);
        assert_eq!(predictions.class_names, vec!["family_0", "family_1"]);
    }

    #[test]
    fn test_row_count_mismatch_is_fatal() {
        let clf = classifier(array![[0.5f32, 0.5]]);
        let x = Array2::<f32>::zeros((3, 3));
        assert!(matches!(
            predict(&clf, x.view(), 5),
            Err(EvalError::Inference(_))
        ));
    }
}
