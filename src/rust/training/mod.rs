//! Training lifecycle: session registry and orchestration.

mod orchestrator;
mod session;

pub use orchestrator::TrainingOrchestrator;
pub use session::{
    ProgressReporter, SessionKey, SessionStore, TrainingError, TrainingErrorKind, TrainingSession, TrainingSlot,
    TrainingStatus,
};
