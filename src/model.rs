//! Instrument-family classifier: model artifacts and inference
//!
//! The trained network is read from a JSON description of dense layers:
//!
//! ```text
//! { "layers": [ { "weights": [[..], ..], "bias": [..], "activation": "relu" }, .. ] }
//! ```
//!
//! `weights` is stored as (inputs × outputs). Any other model can be plugged
//! into the pipeline through the [`Classifier`] trait.

use crate::error::{EvalError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A model that maps a feature matrix to class probabilities
pub trait Classifier {
    /// Number of classes in the output layer
    fn n_classes(&self) -> usize;

    /// Class probabilities of shape (n_samples, n_classes)
    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>>;

    /// Index of the most probable class per sample
    fn predict_classes(&self, x: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        Ok(argmax_rows(&self.predict_proba(x)?))
    }
}

/// Row-wise argmax; ties resolve to the lowest class index
pub fn argmax_rows(proba: &Array2<f32>) -> Vec<usize> {
    proba
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |(best_i, best_p), (i, &p)| {
                    if p > best_p {
                        (i, p)
                    } else {
                        (best_i, best_p)
                    }
                })
                .0
        })
        .collect()
}

/// Layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

/// Serialized dense layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default = "default_activation")]
    pub activation: Activation,
}

fn default_activation() -> Activation {
    Activation::Linear
}

/// Serialized network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let mut out = input.dot(&self.weights) + &self.bias;
        match self.activation {
            Activation::Linear => {}
            Activation::Relu => out.mapv_inplace(|v| v.max(0.0)),
            Activation::Sigmoid => out.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => out.mapv_inplace(f32::tanh),
            Activation::Softmax => softmax_rows(&mut out),
        }
        out
    }
}

/// Numerically stable softmax applied to each row in place
pub fn softmax_rows(values: &mut Array2<f32>) {
    for mut row in values.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}

/// Feed-forward network of dense layers
#[derive(Debug, Clone)]
pub struct DenseClassifier {
    layers: Vec<DenseLayer>,
}

impl DenseClassifier {
    /// Build a network, checking that consecutive layer shapes chain
    pub fn from_spec(spec: ModelSpec) -> Result<Self> {
        if spec.layers.is_empty() {
            return Err(EvalError::ModelLoad("model has no layers".to_string()));
        }

        let mut layers: Vec<DenseLayer> = Vec::with_capacity(spec.layers.len());
        for (idx, layer) in spec.layers.into_iter().enumerate() {
            let n_in = layer.weights.len();
            let n_out = layer.weights.first().map_or(0, Vec::len);
            if n_in == 0 || n_out == 0 {
                return Err(EvalError::ModelLoad(format!("layer {} has empty weights", idx)));
            }
            if layer.weights.iter().any(|row| row.len() != n_out) {
                return Err(EvalError::ModelLoad(format!(
                    "layer {} has ragged weight rows",
                    idx
                )));
            }
            if layer.bias.len() != n_out {
                return Err(EvalError::ModelLoad(format!(
                    "layer {} bias has {} entries, expected {}",
                    idx,
                    layer.bias.len(),
                    n_out
                )));
            }
            if let Some(prev) = layers.last() {
                if prev.weights.ncols() != n_in {
                    return Err(EvalError::ModelLoad(format!(
                        "layer {} expects {} inputs but layer {} produces {}",
                        idx,
                        n_in,
                        idx - 1,
                        prev.weights.ncols()
                    )));
                }
            }

            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((n_in, n_out), flat)
                .map_err(|e| EvalError::ModelLoad(format!("layer {}: {}", idx, e)))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
        }

        Ok(Self { layers })
    }

    /// Read a network from its JSON description
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EvalError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let spec: ModelSpec = serde_json::from_str(&content)
            .map_err(|e| EvalError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_spec(spec)
    }

    /// Width of the expected feature vector
    pub fn n_features(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.nrows())
    }
}

impl Classifier for DenseClassifier {
    fn n_classes(&self) -> usize {
        self.layers.last().map_or(0, |l| l.weights.ncols())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.n_features() {
            return Err(EvalError::ShapeMismatch(format!(
                "model expects {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }

        let mut activations = x.to_owned();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }

        if activations.iter().any(|v| !v.is_finite()) {
            return Err(EvalError::Inference(
                "model produced non-finite outputs".to_string(),
            ));
        }
        Ok(activations)
    }
}

/// Ordered instrument-family names; position = class index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    #[serde(alias = "classes_")]
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EvalError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let encoder: LabelEncoder = serde_json::from_str(&content)
            .map_err(|e| EvalError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        if encoder.classes.is_empty() {
            return Err(EvalError::ModelLoad(format!(
                "{}: label encoder has no classes",
                path.display()
            )));
        }
        Ok(encoder)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class name for an index, if known
    pub fn inverse_transform(&self, class: usize) -> Option<&str> {
        self.classes.get(class).map(String::as_str)
    }
}

/// Trained model plus the encoder naming its output classes
pub struct InstrumentClassifier {
    pub model: Box<dyn Classifier>,
    pub instr_family_le: LabelEncoder,
}

impl std::fmt::Debug for InstrumentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentClassifier")
            .field("n_classes", &self.model.n_classes())
            .field("instr_family_le", &self.instr_family_le)
            .finish()
    }
}

impl InstrumentClassifier {
    /// Pair a model with its label encoder, checking the class counts agree
    pub fn new(model: Box<dyn Classifier>, instr_family_le: LabelEncoder) -> Result<Self> {
        if model.n_classes() != instr_family_le.len() {
            return Err(EvalError::ModelLoad(format!(
                "model has {} outputs but the label encoder names {} classes",
                model.n_classes(),
                instr_family_le.len()
            )));
        }
        Ok(Self {
            model,
            instr_family_le,
        })
    }

    /// Load `model_file` and `label_encoder_file` from a model directory
    pub fn load<P: AsRef<Path>>(
        model_dir: P,
        model_file: &str,
        label_encoder_file: &str,
    ) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(EvalError::MissingInput(format!(
                "model directory {} does not exist",
                model_dir.display()
            )));
        }
        let model = DenseClassifier::load(model_dir.join(model_file))?;
        let encoder = LabelEncoder::load(model_dir.join(label_encoder_file))?;
        Self::new(Box::new(model), encoder)
    }
}
