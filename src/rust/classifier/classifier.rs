use super::cancel::CancellationToken;
use super::error::ClassifierError;
use super::params::TrainParams;

/// One training example: a feature vector and the index of its class.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f32>,
    pub label: usize,
}

impl Sample {
    pub fn new(features: Vec<f32>, label: usize) -> Self {
        Self { features, label }
    }
}

/// Capability interface of a probability-capable classification backend.
///
/// The orchestrator only talks to this trait, so a different numeric engine
/// can be swapped in without touching the training lifecycle.
///
/// # Thread Safety
///
/// `predict` and `predict_probabilities` take `&self` and may be called
/// concurrently once the classifier is trained. `train` takes `&mut self`;
/// callers must not train the same instance twice at once.
///
/// ```rust
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use intentforge::{CancellationToken, Classifier, Sample, SoftmaxClassifier, TrainParams};
///
/// let mut classifier = SoftmaxClassifier::with_seed(Some(7));
/// let dataset = vec![
///     Sample::new(vec![1.0, 0.0], 0),
///     Sample::new(vec![0.0, 1.0], 1),
/// ];
/// let payload = classifier.train(&dataset, &TrainParams::default(), &mut |_| {}, &CancellationToken::new())?;
/// assert_eq!(classifier.predict(&[0.9, 0.1])?, 0);
///
/// let restored = SoftmaxClassifier::restore(&payload)?;
/// assert_eq!(restored.predict(&[0.1, 0.9])?, 1);
/// # Ok(())
/// # }
/// ```
pub trait Classifier: Send + Sync + 'static {
    /// Creates an untrained classifier.
    ///
    /// With `Some(seed)` training and prediction are reproducible for identical
    /// input. With `None` the engine seeds itself from the OS and runs may differ.
    fn with_seed(seed: Option<u64>) -> Self
    where
        Self: Sized;

    /// Fits the classifier and returns its serialized state.
    ///
    /// The dataset is validated before any work starts: it must be non-empty,
    /// every feature vector must be non-empty and every label must be below the
    /// number of samples. `progress` receives values in
    /// `[0, 1]` in non-decreasing order. `cancel` is polled between units of
    /// work; a cancellation surfaces as [`ClassifierError::Canceled`].
    fn train(
        &mut self,
        dataset: &[Sample],
        params: &TrainParams,
        progress: &mut dyn FnMut(f32),
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClassifierError>;

    /// Returns the most probable class index.
    fn predict(&self, features: &[f32]) -> Result<usize, ClassifierError>;

    /// Returns one probability per class, summing to one.
    fn predict_probabilities(&self, features: &[f32]) -> Result<Vec<f32>, ClassifierError>;

    /// Rebuilds a trained classifier from a payload returned by [`train`](Self::train).
    fn restore(payload: &[u8]) -> Result<Self, ClassifierError>
    where
        Self: Sized;

    fn is_trained(&self) -> bool;
}

/// Shape of a validated dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DatasetShape {
    pub num_features: usize,
    pub num_classes: usize,
}

/// Shape checks shared by every backend.
///
/// Labels are class indices, so a dataset of `n` samples can name at most `n`
/// classes; anything larger is rejected before a backend sizes its parameters.
pub(crate) fn validate_dataset(dataset: &[Sample]) -> Result<DatasetShape, ClassifierError> {
    let first = dataset
        .first()
        .ok_or_else(|| ClassifierError::ValidationError("Dataset cannot be empty".into()))?;
    let width = first.features.len();
    let mut max_label = 0;

    for (i, sample) in dataset.iter().enumerate() {
        if sample.features.is_empty() {
            return Err(ClassifierError::ValidationError(format!(
                "Sample {} has an empty feature vector",
                i + 1
            )));
        }
        if sample.features.len() != width {
            return Err(ClassifierError::ValidationError(format!(
                "Sample {} has {} features, expected {}",
                i + 1,
                sample.features.len(),
                width
            )));
        }
        if sample.features.iter().any(|x| !x.is_finite()) {
            return Err(ClassifierError::ValidationError(format!(
                "Sample {} contains a non-finite feature",
                i + 1
            )));
        }
        if sample.label >= dataset.len() {
            return Err(ClassifierError::ValidationError(format!(
                "Sample {} has label {}, but {} samples can cover at most {} classes",
                i + 1,
                sample.label,
                dataset.len(),
                dataset.len()
            )));
        }
        max_label = max_label.max(sample.label);
    }

    let num_classes = max_label
        .checked_add(1)
        .ok_or_else(|| ClassifierError::ValidationError("Too many classes".into()))?;
    Ok(DatasetShape {
        num_features: width,
        num_classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dataset() {
        assert!(matches!(validate_dataset(&[]), Err(ClassifierError::ValidationError(_))));
        assert!(validate_dataset(&[Sample::new(vec![], 0)]).is_err());
        assert!(validate_dataset(&[Sample::new(vec![1.0], 0), Sample::new(vec![1.0, 2.0], 1)]).is_err());
        assert!(validate_dataset(&[Sample::new(vec![f32::NAN], 0)]).is_err());
        assert_eq!(
            validate_dataset(&[Sample::new(vec![1.0, 2.0], 0)]),
            Ok(DatasetShape { num_features: 2, num_classes: 1 })
        );
    }

    #[test]
    fn test_labels_are_bounded_by_dataset_size() {
        assert!(matches!(
            validate_dataset(&[Sample::new(vec![1.0], usize::MAX)]),
            Err(ClassifierError::ValidationError(_))
        ));
        assert!(validate_dataset(&[Sample::new(vec![1.0], 0), Sample::new(vec![1.0], 2)]).is_err());

        let shape = validate_dataset(&[Sample::new(vec![1.0], 1), Sample::new(vec![1.0], 0)]).unwrap();
        assert_eq!(shape.num_classes, 2);
    }
}
