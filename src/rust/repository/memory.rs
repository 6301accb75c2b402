use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{artifact_key, Model, ModelRepository, StorageError};
use crate::model_id::{Credentials, ModelId};

/// Process-local repository; contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct InMemoryModelRepository {
    models: RwLock<HashMap<String, Model>>,
}

impl InMemoryModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.models.read().await.is_empty()
    }
}

#[async_trait]
impl ModelRepository for InMemoryModelRepository {
    async fn save_model(&self, model: &Model, credentials: &Credentials) -> Result<(), StorageError> {
        let mut stored = model.clone();
        stored.credentials = credentials.clone();
        self.models
            .write()
            .await
            .insert(artifact_key(&model.model_id, credentials), stored);
        Ok(())
    }

    async fn get_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<Model, StorageError> {
        let key = artifact_key(model_id, credentials);
        self.models
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound { key })
    }

    async fn has_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<bool, StorageError> {
        Ok(self
            .models
            .read()
            .await
            .contains_key(&artifact_key(model_id, credentials)))
    }
}
