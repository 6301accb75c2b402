use serde::{Deserialize, Serialize};

use super::error::ClassifierError;

/// Hyper-parameters of a training run.
///
/// # Example
/// ```
/// use intentforge::TrainParams;
///
/// let params = TrainParams::default()
///     .with_epochs(20)
///     .with_learning_rate(0.25);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    /// Number of full passes over the dataset. Progress is reported and
    /// cancellation is checked once per epoch.
    pub epochs: usize,
    pub learning_rate: f32,
    /// L2 regularization strength
    pub l2: f32,
    pub batch_size: usize,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 40,
            learning_rate: 0.5,
            l2: 1e-4,
            batch_size: 16,
        }
    }
}

impl TrainParams {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_l2(mut self, l2: f32) -> Self {
        self.l2 = l2;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Validates the parameters according to the following rules:
    /// - At least one epoch
    /// - Learning rate finite and strictly positive
    /// - L2 finite and non-negative
    /// - Batch size of at least one
    pub fn validate(&self) -> Result<(), ClassifierError> {
        const MAX_EPOCHS: usize = 10_000;

        if self.epochs == 0 {
            return Err(ClassifierError::ValidationError("Epochs must be at least 1".into()));
        }
        if self.epochs > MAX_EPOCHS {
            return Err(ClassifierError::ValidationError(format!(
                "Too many epochs ({}, max is {})",
                self.epochs, MAX_EPOCHS
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ClassifierError::ValidationError(format!(
                "Learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(ClassifierError::ValidationError(format!(
                "L2 regularization cannot be negative, got {}",
                self.l2
            )));
        }
        if self.batch_size == 0 {
            return Err(ClassifierError::ValidationError("Batch size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TrainParams::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_params() {
        for params in [
            TrainParams::default().with_epochs(0),
            TrainParams::default().with_learning_rate(0.0),
            TrainParams::default().with_learning_rate(f32::NAN),
            TrainParams::default().with_l2(-1.0),
            TrainParams::default().with_batch_size(0),
        ] {
            assert!(matches!(params.validate(), Err(ClassifierError::ValidationError(_))));
        }
    }
}
