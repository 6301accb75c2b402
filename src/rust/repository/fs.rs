use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{artifact_key, Model, ModelRepository, StorageError};
use crate::model_id::{Credentials, ModelId};
use crate::training_set::Entity;

const MODEL_EXTENSION: &str = "model";

/// First line of a model file. The classifier payload follows the newline verbatim.
#[derive(Debug, Serialize, Deserialize)]
struct ModelHeader {
    model_id: ModelId,
    app_id: String,
    credentials_digest: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    intents: Vec<String>,
    entities: Vec<Entity>,
    feature_width: usize,
    payload_sha256: String,
    payload_len: usize,
}

/// Stores one file per model under a models directory.
#[derive(Clone, Debug)]
pub struct FsModelRepository {
    models_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FsModelRepository {
    /// Creates a repository in the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("INTENTFORGE_HOME") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("intentforge").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("intentforge").join("models");
        }

        // 4. If all else fails, use system temp directory
        env::temp_dir().join("intentforge").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model_path(&self, model_id: &ModelId, credentials: &Credentials) -> PathBuf {
        self.models_dir
            .join(format!("{}.{}", artifact_key(model_id, credentials), MODEL_EXTENSION))
    }

    /// Lists the ids of every model stored for `credentials`.
    pub async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelId>, StorageError> {
        let suffix = format!(".{}.{}", credentials.digest(), MODEL_EXTENSION);
        let mut entries = tokio::fs::read_dir(&self.models_dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(&suffix) {
                match id.parse::<ModelId>() {
                    Ok(id) => ids.push(id),
                    Err(e) => log::warn!("Skipping unrecognized model file {}: {}", name, e),
                }
            }
        }
        ids.sort_by_key(|id| id.to_string());
        Ok(ids)
    }

    /// Deletes a stored model, returning whether it existed.
    pub async fn remove_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<bool, StorageError> {
        let _lock = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.get_model_path(model_id, credentials)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every model of `credentials` whose id is not in `keep`.
    pub async fn prune_models(&self, credentials: &Credentials, keep: &[ModelId]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for id in self.list_models(credentials).await? {
            if !keep.contains(&id) && self.remove_model(&id, credentials).await? {
                log::info!("Pruned model {}", id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn checksum(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl ModelRepository for FsModelRepository {
    async fn save_model(&self, model: &Model, credentials: &Credentials) -> Result<(), StorageError> {
        let header = ModelHeader {
            model_id: model.model_id.clone(),
            app_id: credentials.app_id.clone(),
            credentials_digest: credentials.digest(),
            started_at: model.started_at,
            finished_at: model.finished_at,
            intents: model.intents.clone(),
            entities: model.entities.clone(),
            feature_width: model.feature_width,
            payload_sha256: Self::checksum(&model.payload),
            payload_len: model.payload.len(),
        };
        let mut bytes = serde_json::to_vec(&header)?;
        bytes.push(b'\n');
        bytes.extend_from_slice(&model.payload);

        let path = self.get_model_path(&model.model_id, credentials);
        let tmp_path = path.with_extension(format!("{}.tmp", MODEL_EXTENSION));

        let _lock = self.write_lock.lock().await;
        log::debug!("Writing {} bytes to {:?}", bytes.len(), tmp_path);
        tokio::fs::write(&tmp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        log::info!("Saved model {} to {:?}", model.model_id, path);
        Ok(())
    }

    async fn get_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<Model, StorageError> {
        let key = artifact_key(model_id, credentials);
        let path = self.get_model_path(model_id, credentials);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::NotFound { key }),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Read {} bytes from {:?}", bytes.len(), path);

        let corrupted = |reason: &str| StorageError::Corrupted {
            key: key.clone(),
            reason: reason.to_string(),
        };
        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupted("missing header"))?;
        let header: ModelHeader =
            serde_json::from_slice(&bytes[..split]).map_err(|e| corrupted(&format!("bad header: {}", e)))?;
        let payload = &bytes[split + 1..];

        if header.model_id != *model_id || header.credentials_digest != credentials.digest() {
            return Err(corrupted("header does not match the requested key"));
        }
        if payload.len() != header.payload_len {
            return Err(corrupted(&format!(
                "payload has {} bytes, expected {}",
                payload.len(),
                header.payload_len
            )));
        }
        let actual = Self::checksum(payload);
        if actual != header.payload_sha256 {
            log::error!("Checksum mismatch for model {}", key);
            return Err(StorageError::ChecksumMismatch {
                key,
                expected: header.payload_sha256,
                actual,
            });
        }

        Ok(Model {
            model_id: header.model_id,
            credentials: credentials.clone(),
            started_at: header.started_at,
            finished_at: header.finished_at,
            intents: header.intents,
            entities: header.entities,
            feature_width: header.feature_width,
            payload: payload.to_vec(),
        })
    }

    async fn has_model(&self, model_id: &ModelId, credentials: &Credentials) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.get_model_path(model_id, credentials)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::sample_model;

    fn repository() -> (tempfile::TempDir, FsModelRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsModelRepository::new(dir.path().join("models")).unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_save_and_get() -> Result<(), StorageError> {
        let (_dir, repo) = repository();
        let model = sample_model(1);
        let creds = model.credentials.clone();

        assert!(!repo.has_model(&model.model_id, &creds).await?);
        repo.save_model(&model, &creds).await?;
        assert!(repo.has_model(&model.model_id, &creds).await?);
        assert_eq!(repo.get_model(&model.model_id, &creds).await?, model);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_overwrites() -> Result<(), StorageError> {
        let (_dir, repo) = repository();
        let mut model = sample_model(1);
        let creds = model.credentials.clone();
        repo.save_model(&model, &creds).await?;

        model.payload = b"newer".to_vec();
        repo.save_model(&model, &creds).await?;
        assert_eq!(repo.get_model(&model.model_id, &creds).await?.payload, b"newer");
        assert_eq!(repo.list_models(&creds).await?, vec![model.model_id.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_models_are_partitioned_by_credentials() -> Result<(), StorageError> {
        let (_dir, repo) = repository();
        let model = sample_model(1);
        repo.save_model(&model, &model.credentials).await?;

        let other = Credentials::new("app", "other-secret");
        assert!(!repo.has_model(&model.model_id, &other).await?);
        assert!(matches!(
            repo.get_model(&model.model_id, &other).await,
            Err(StorageError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected() -> Result<(), StorageError> {
        let (_dir, repo) = repository();
        let model = sample_model(1);
        let creds = model.credentials.clone();
        repo.save_model(&model, &creds).await?;

        let path = repo.get_model_path(&model.model_id, &creds);
        let mut bytes = std::fs::read(&path)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&path, &bytes)?;
        assert!(matches!(
            repo.get_model(&model.model_id, &creds).await,
            Err(StorageError::ChecksumMismatch { .. })
        ));

        std::fs::write(&path, b"garbage")?;
        assert!(matches!(
            repo.get_model(&model.model_id, &creds).await,
            Err(StorageError::Corrupted { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_models() -> Result<(), StorageError> {
        let (_dir, repo) = repository();
        let keep = sample_model(1);
        let stale = sample_model(2);
        let creds = keep.credentials.clone();
        repo.save_model(&keep, &creds).await?;
        repo.save_model(&stale, &creds).await?;

        assert_eq!(repo.prune_models(&creds, &[keep.model_id.clone()]).await?, 1);
        assert!(repo.has_model(&keep.model_id, &creds).await?);
        assert!(!repo.has_model(&stale.model_id, &creds).await?);
        assert!(!repo.remove_model(&stale.model_id, &creds).await?);
        Ok(())
    }

    #[test]
    fn test_default_models_dir() {
        env::set_var("INTENTFORGE_HOME", "/tmp/intentforge-test-home");
        let path = FsModelRepository::get_default_models_dir();
        assert_eq!(path, PathBuf::from("/tmp/intentforge-test-home/models"));
        env::remove_var("INTENTFORGE_HOME");

        let path = FsModelRepository::get_default_models_dir();
        assert!(path.ends_with("intentforge/models"));
    }
}
