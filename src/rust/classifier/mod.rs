mod cancel;
#[allow(clippy::module_inception)]
mod classifier;
mod error;
mod params;
mod softmax;
mod utils;

pub use cancel::CancellationToken;
pub use classifier::{Classifier, Sample};
pub use error::ClassifierError;
pub use params::TrainParams;
pub use softmax::SoftmaxClassifier;

pub(crate) use utils::normalize_vector;
