use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::cancel::CancellationToken;
use super::classifier::{validate_dataset, Classifier, DatasetShape, Sample};
use super::error::ClassifierError;
use super::params::TrainParams;
use super::utils::{argmax, softmax};

const FORMAT_VERSION: u32 = 1;

/// Multinomial logistic regression trained with mini-batch gradient descent.
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    seed: Option<u64>,
    state: Option<SoftmaxState>,
}

#[derive(Debug, Clone)]
struct SoftmaxState {
    /// `[classes, features]`
    weights: Array2<f32>,
    bias: Array1<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    format_version: u32,
    seed: Option<u64>,
    num_classes: usize,
    num_features: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl SoftmaxClassifier {
    pub fn num_classes(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.bias.len())
    }

    pub fn num_features(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.weights.ncols())
    }

    fn trained_state(&self, features: &[f32]) -> Result<&SoftmaxState, ClassifierError> {
        let state = self.state.as_ref().ok_or(ClassifierError::NotTrained)?;
        if features.len() != state.weights.ncols() {
            return Err(ClassifierError::ValidationError(format!(
                "Expected {} features, got {}",
                state.weights.ncols(),
                features.len()
            )));
        }
        Ok(state)
    }

    fn serialize(&self, state: &SoftmaxState) -> Result<Vec<u8>, ClassifierError> {
        let persisted = PersistedState {
            format_version: FORMAT_VERSION,
            seed: self.seed,
            num_classes: state.weights.nrows(),
            num_features: state.weights.ncols(),
            weights: state.weights.iter().copied().collect(),
            bias: state.bias.to_vec(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }
}

impl Classifier for SoftmaxClassifier {
    fn with_seed(seed: Option<u64>) -> Self {
        Self { seed, state: None }
    }

    fn train(
        &mut self,
        dataset: &[Sample],
        params: &TrainParams,
        progress: &mut dyn FnMut(f32),
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClassifierError> {
        let DatasetShape {
            num_features,
            num_classes,
        } = validate_dataset(dataset)?;
        params.validate()?;

        let flat: Vec<f32> = dataset.iter().flat_map(|s| s.features.iter().copied()).collect();
        let inputs = Array2::from_shape_vec((dataset.len(), num_features), flat)
            .map_err(|e| ClassifierError::ValidationError(format!("Failed to build input matrix: {}", e)))?;
        let labels: Vec<usize> = dataset.iter().map(|s| s.label).collect();

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut weights = Array2::<f32>::zeros((num_classes, num_features));
        let mut bias = Array1::<f32>::zeros(num_classes);
        let mut order: Vec<usize> = (0..dataset.len()).collect();

        info!(
            "Training softmax classifier: {} samples, {} features, {} classes, {} epochs",
            dataset.len(),
            num_features,
            num_classes,
            params.epochs
        );

        for epoch in 0..params.epochs {
            if cancel.is_cancelled() {
                debug!("Cancellation observed before epoch {}", epoch + 1);
                return Err(ClassifierError::Canceled);
            }

            order.shuffle(&mut rng);
            let mut loss = 0.0f32;
            for batch in order.chunks(params.batch_size) {
                let x = inputs.select(Axis(0), batch);
                let mut probs = x.dot(&weights.t()) + &bias;
                for (mut row, &i) in probs.axis_iter_mut(Axis(0)).zip(batch) {
                    let p = softmax(row.view());
                    loss -= p[labels[i]].max(1e-12).ln();
                    row.assign(&p);
                    row[labels[i]] -= 1.0;
                }

                let scale = params.learning_rate / batch.len() as f32;
                let grad_w = probs.t().dot(&x);
                let grad_b = probs.sum_axis(Axis(0));
                weights = &weights * (1.0 - params.learning_rate * params.l2) - &(grad_w * scale);
                bias = &bias - &(grad_b * scale);
            }

            if !loss.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(ClassifierError::TrainingError(format!(
                    "Optimization diverged at epoch {}",
                    epoch + 1
                )));
            }
            debug!("Epoch {}/{}: loss {:.4}", epoch + 1, params.epochs, loss / dataset.len() as f32);
            progress((epoch + 1) as f32 / params.epochs as f32);
        }

        let state = SoftmaxState { weights, bias };
        let payload = self.serialize(&state)?;
        self.state = Some(state);
        Ok(payload)
    }

    fn predict(&self, features: &[f32]) -> Result<usize, ClassifierError> {
        let probabilities = self.predict_probabilities(features)?;
        argmax(&probabilities)
            .ok_or_else(|| ClassifierError::ModelError("Model has no classes".into()))
    }

    fn predict_probabilities(&self, features: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        let state = self.trained_state(features)?;
        let input = Array1::from_vec(features.to_vec());
        let logits = state.weights.dot(&input) + &state.bias;
        Ok(softmax(logits.view()).to_vec())
    }

    fn restore(payload: &[u8]) -> Result<Self, ClassifierError> {
        let persisted: PersistedState = serde_json::from_slice(payload)?;
        if persisted.format_version != FORMAT_VERSION {
            return Err(ClassifierError::ModelError(format!(
                "Unsupported model format version {} (expected {})",
                persisted.format_version, FORMAT_VERSION
            )));
        }
        if persisted.num_classes == 0 || persisted.num_features == 0 {
            return Err(ClassifierError::ModelError("Model has an empty shape".into()));
        }
        if persisted.bias.len() != persisted.num_classes {
            return Err(ClassifierError::ModelError(format!(
                "Bias has {} entries, expected {}",
                persisted.bias.len(),
                persisted.num_classes
            )));
        }
        if persisted.weights.iter().chain(&persisted.bias).any(|w| !w.is_finite()) {
            return Err(ClassifierError::ModelError("Model contains non-finite weights".into()));
        }
        let weights = Array2::from_shape_vec((persisted.num_classes, persisted.num_features), persisted.weights)
            .map_err(|e| ClassifierError::ModelError(format!("Weight matrix has the wrong size: {}", e)))?;

        Ok(Self {
            seed: persisted.seed,
            state: Some(SoftmaxState {
                weights,
                bias: Array1::from_vec(persisted.bias),
            }),
        })
    }

    fn is_trained(&self) -> bool {
        self.state.is_some()
    }
}
