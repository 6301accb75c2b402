use std::fmt;

/// Represents the different types of errors a classifier backend can report.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// The dataset, the features or the training parameters are malformed
    ValidationError(String),
    /// `predict` or `predict_probabilities` was called before `train` or `restore`
    NotTrained,
    /// A persisted payload could not be decoded or does not fit this backend
    ModelError(String),
    /// Training observed a cancellation request and stopped
    Canceled,
    /// The numeric engine failed while fitting
    TrainingError(String),
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::NotTrained => write!(f, "Classifier is not trained"),
            Self::ModelError(msg) => write!(f, "Model error: {}", msg),
            Self::Canceled => write!(f, "Training was canceled"),
            Self::TrainingError(msg) => write!(f, "Training error: {}", msg),
        }
    }
}

impl std::error::Error for ClassifierError {}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::ModelError(err.to_string())
    }
}
