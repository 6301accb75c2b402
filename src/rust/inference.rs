use std::fmt;

use crate::classifier::{Classifier, ClassifierError};
use crate::features::Featurizer;
use crate::model_id::{Credentials, ModelId};
use crate::repository::{Model, ModelRepository, StorageError};
use crate::utterance::parse_utterance;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("Model {model_id} is incompatible: {reason}")]
    IncompatibleModel { model_id: ModelId, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentScore {
    pub name: String,
    pub confidence: f32,
}

impl fmt::Display for IntentScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.1}%", self.name, self.confidence * 100.0)
    }
}

/// Ranks the intents of a persisted model for incoming text.
///
/// Prediction takes `&self`, so a loaded predictor can be shared across
/// threads behind an `Arc`.
pub struct IntentPredictor<C: Classifier> {
    model_id: ModelId,
    intents: Vec<String>,
    featurizer: Featurizer,
    classifier: C,
}

impl<C: Classifier> IntentPredictor<C> {
    /// Loads the model from `repository` and restores its classifier.
    pub async fn load<R: ModelRepository + ?Sized>(
        repository: &R,
        model_id: &ModelId,
        credentials: &Credentials,
    ) -> Result<Self, InferenceError> {
        let model = repository.get_model(model_id, credentials).await?;
        Self::from_model(&model)
    }

    pub fn from_model(model: &Model) -> Result<Self, InferenceError> {
        let incompatible = |reason: String| InferenceError::IncompatibleModel {
            model_id: model.model_id.clone(),
            reason,
        };
        let featurizer =
            Featurizer::new(model.feature_width, &model.entities).map_err(|e| incompatible(e.to_string()))?;
        let classifier = C::restore(&model.payload)?;
        if model.intents.is_empty() {
            return Err(incompatible("model has no intents".into()));
        }

        log::info!("Loaded model {} with {} intents", model.model_id, model.intents.len());
        Ok(Self {
            model_id: model.model_id.clone(),
            intents: model.intents.clone(),
            featurizer,
            classifier,
        })
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn intents(&self) -> &[String] {
        &self.intents
    }

    /// Returns every intent with its confidence, most likely first.
    pub fn predict(&self, text: &str) -> Result<Vec<IntentScore>, InferenceError> {
        if text.trim().is_empty() {
            return Err(ClassifierError::ValidationError("Input text cannot be empty".into()).into());
        }

        let features = self.featurizer.featurize(&parse_utterance(text));
        let probabilities = self.classifier.predict_probabilities(&features)?;
        if probabilities.len() != self.intents.len() {
            return Err(InferenceError::IncompatibleModel {
                model_id: self.model_id.clone(),
                reason: format!(
                    "classifier knows {} classes but the model lists {} intents",
                    probabilities.len(),
                    self.intents.len()
                ),
            });
        }

        let mut scores: Vec<IntentScore> = self
            .intents
            .iter()
            .zip(probabilities)
            .map(|(name, confidence)| IntentScore {
                name: name.clone(),
                confidence,
            })
            .collect();
        scores.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scores)
    }

    /// Returns the most likely intent.
    pub fn predict_intent(&self, text: &str) -> Result<IntentScore, InferenceError> {
        self.predict(text)?
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::IncompatibleModel {
                model_id: self.model_id.clone(),
                reason: "model has no intents".into(),
            })
    }
}
