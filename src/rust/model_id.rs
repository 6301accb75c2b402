use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::training_set::{is_valid_language_code, TrainingSet};

const HASH_LEN: usize = 16;

/// Tenant identity; every session and model is partitioned by it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub app_id: String,
    pub app_secret: String,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Stable digest of both fields, safe to embed in storage keys.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.app_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.app_secret.as_bytes());
        truncated_hex(hasher)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Identity of a trained model.
///
/// Two training sets with the same intents, entities, language and seed map to
/// the same id, so retraining unchanged data targets the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    content_hash: String,
    specification_hash: String,
    seed: u64,
    language_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid model id '{0}': expected <content>.<specification>.<seed>.<language>")]
pub struct ParseModelIdError(String);

impl ModelId {
    /// Derives the id of the model a training set would produce.
    pub fn for_training_set(set: &TrainingSet, feature_width: usize) -> Self {
        let mut content = Sha256::new();
        // serializing plain data structs cannot fail
        let intents = serde_json::to_vec(&set.intent_defs).unwrap_or_default();
        let entities = serde_json::to_vec(&set.entity_defs).unwrap_or_default();
        content.update(&intents);
        content.update([0u8]);
        content.update(&entities);

        Self {
            content_hash: truncated_hex(content),
            specification_hash: Self::specification_hash(feature_width),
            seed: set.seed,
            language_code: set.language_code.clone(),
        }
    }

    /// Hash of everything outside the training data that shapes a model.
    pub fn specification_hash(feature_width: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.update(feature_width.to_le_bytes());
        truncated_hex(hasher)
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.content_hash, self.specification_hash, self.seed, self.language_code
        )
    }
}

impl FromStr for ModelId {
    type Err = ParseModelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseModelIdError(s.to_string());
        let mut parts = s.splitn(4, '.');
        let (Some(content_hash), Some(specification_hash), Some(seed), Some(language_code)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let is_hash = |part: &str| part.len() == HASH_LEN && part.chars().all(|c| c.is_ascii_hexdigit());
        if !is_hash(content_hash) || !is_hash(specification_hash) || !is_valid_language_code(language_code) {
            return Err(invalid());
        }
        let seed = seed.parse().map_err(|_| invalid())?;

        Ok(Self {
            content_hash: content_hash.to_string(),
            specification_hash: specification_hash.to_string(),
            seed,
            language_code: language_code.to_string(),
        })
    }
}

fn truncated_hex(hasher: Sha256) -> String {
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(HASH_LEN);
    hex
}
