//! Persistence of trained models.
//!
//! A model is stored under an artifact key derived from its [`ModelId`] and the
//! owning tenant's [`Credentials`]. Saving again under the same key replaces
//! the previous artifact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;

use crate::model_id::{Credentials, ModelId};
use crate::training_set::Entity;

mod fs;
mod memory;

pub use fs::FsModelRepository;
pub use memory::InMemoryModelRepository;

/// A trained model and the metadata needed to use it for inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub model_id: ModelId,
    pub credentials: Credentials,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Intent names, indexed by classifier label.
    pub intents: Vec<String>,
    pub entities: Vec<Entity>,
    pub feature_width: usize,
    /// Classifier state; only the classifier backend knows its format.
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Model not found: {key}")]
    NotFound { key: String },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Corrupted model file {key}: {reason}")]
    Corrupted { key: String, reason: String },
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

/// Storage key of a model for one tenant.
pub fn artifact_key(model_id: &ModelId, credentials: &Credentials) -> String {
    format!("{}.{}", model_id, credentials.digest())
}

#[async_trait]
pub trait ModelRepository: Send + Sync + 'static {
    /// Stores `model` for `credentials`, replacing any model saved under the same key.
    async fn save_model(&self, model: &Model, credentials: &Credentials) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] when nothing is stored under the key.
    async fn get_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<Model, StorageError>;

    async fn has_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<bool, StorageError>;
}
