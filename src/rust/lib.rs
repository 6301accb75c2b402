//! Training and inference core for intent classification.
//!
//! The crate turns annotated training utterances into a persisted intent
//! classifier and answers predictions from it:
//!
//! - [`parse_utterance`] strips `[value](slot)` annotations and maps slot offsets
//! - [`TrainingOrchestrator`] runs cancelable, pollable training sessions
//! - [`ModelRepository`] persists trained models per tenant
//! - [`Classifier`] is the backend contract, implemented by [`SoftmaxClassifier`]
//!
//! # Basic Usage
//!
//! ```rust
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use intentforge::{
//!     Credentials, InMemoryModelRepository, Intent, IntentPredictor, RuntimeConfig,
//!     SoftmaxClassifier, TrainingOrchestrator, TrainingSet, TrainingStatus,
//! };
//!
//! let repository = Arc::new(InMemoryModelRepository::new());
//! let orchestrator =
//!     TrainingOrchestrator::<SoftmaxClassifier, _>::new(Arc::clone(&repository), RuntimeConfig::default());
//!
//! let set = TrainingSet {
//!     intent_defs: vec![
//!         Intent::new("greet").with_utterances(vec!["hello", "hi there", "good morning"]),
//!         Intent::new("book_flight")
//!             .with_utterances(vec!["book a flight to [Paris](city)", "I want to fly to [Rome](city)"])
//!             .with_slot("city", vec!["any"]),
//!     ],
//!     entity_defs: vec![],
//!     language_code: "en".into(),
//!     seed: 42,
//! };
//! let credentials = Credentials::new("my-app", "my-secret");
//!
//! let session = orchestrator.train(set, credentials.clone()).await;
//! assert_eq!(session.status, TrainingStatus::Done);
//!
//! let predictor =
//!     IntentPredictor::<SoftmaxClassifier>::load(repository.as_ref(), &session.model_id, &credentials).await?;
//! let best = predictor.predict_intent("hello there")?;
//! println!("Predicted intent: {}", best);
//! # Ok(())
//! # }
//! ```
//!
//! # Polling and cancellation
//!
//! [`TrainingOrchestrator::start_training`] registers the session immediately and
//! trains in the background. Callers poll
//! [`get_training_status`](TrainingOrchestrator::get_training_status) and may
//! [`request_cancel`](TrainingOrchestrator::request_cancel); cancellation is
//! observed between intents and between training epochs.

pub mod classifier;
pub mod features;
pub mod inference;
pub mod model_id;
pub mod repository;
mod runtime;
pub mod training;
pub mod training_set;
pub mod utterance;

pub use classifier::{CancellationToken, Classifier, ClassifierError, Sample, SoftmaxClassifier, TrainParams};
pub use features::{Featurizer, DEFAULT_FEATURE_WIDTH};
pub use inference::{InferenceError, IntentPredictor, IntentScore};
pub use model_id::{Credentials, ModelId, ParseModelIdError};
pub use repository::{FsModelRepository, InMemoryModelRepository, Model, ModelRepository, StorageError};
pub use runtime::RuntimeConfig;
pub use training::{
    TrainingError, TrainingErrorKind, TrainingOrchestrator, TrainingSession, TrainingStatus,
};
pub use training_set::{Entity, EntityKind, Intent, ListEntityValue, SlotDefinition, TrainingSet, TrainingSetError};
pub use utterance::{parse_utterance, ParsedUtterance, SlotOccurrence, Span};

pub fn init_logger() {
    env_logger::init();
}
