use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::utterance::parse_utterance;

/// Entity type every slot may reference without declaring it.
pub const ANY_ENTITY: &str = "any";

/// Everything needed to train one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub intent_defs: Vec<Intent>,
    #[serde(default)]
    pub entity_defs: Vec<Entity>,
    pub language_code: String,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Raw utterances, possibly carrying `[value](slot)` annotations.
    pub utterances: Vec<String>,
    #[serde(default)]
    pub slots: Vec<SlotDefinition>,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contexts: Vec::new(),
            utterances: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub fn with_utterances(mut self, utterances: Vec<impl Into<String>>) -> Self {
        self.utterances = utterances.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_slot(mut self, name: impl Into<String>, entities: Vec<impl Into<String>>) -> Self {
        self.slots.push(SlotDefinition {
            name: name.into(),
            entities: entities.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_contexts(mut self, contexts: Vec<impl Into<String>>) -> Self {
        self.contexts = contexts.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub name: String,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(flatten)]
    pub kind: EntityKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    List {
        values: Vec<ListEntityValue>,
        #[serde(default)]
        fuzzy: bool,
    },
    Pattern {
        pattern: String,
        #[serde(default)]
        case_sensitive: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntityValue {
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl Entity {
    pub fn list(name: impl Into<String>, values: Vec<ListEntityValue>) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::List { values, fuzzy: false },
        }
    }

    pub fn pattern(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::Pattern {
                pattern: pattern.into(),
                case_sensitive: false,
            },
        }
    }
}

impl ListEntityValue {
    pub fn new(name: impl Into<String>, synonyms: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            synonyms: synonyms.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrainingSetError {
    #[error("Language code cannot be empty")]
    EmptyLanguage,
    #[error("Language code '{0}' may only contain ASCII letters, digits, '_' and '-'")]
    InvalidLanguage(String),
    #[error("Training set must contain at least one intent")]
    NoIntents,
    #[error("Intent name cannot be empty")]
    EmptyIntentName,
    #[error("Intent '{0}' is defined more than once")]
    DuplicateIntent(String),
    #[error("Intent '{0}' must have at least one utterance")]
    NoUtterances(String),
    #[error("Utterance {index} of intent '{intent}' is empty")]
    EmptyUtterance { intent: String, index: usize },
    #[error("Entity name cannot be empty")]
    EmptyEntityName,
    #[error("Entity '{0}' is defined more than once")]
    DuplicateEntity(String),
    #[error("Pattern of entity '{entity}' is not a valid regex: {reason}")]
    InvalidPattern { entity: String, reason: String },
    #[error("Slot '{slot}' of intent '{intent}' references unknown entity '{entity}'")]
    UnknownEntity { intent: String, slot: String, entity: String },
    #[error("Utterance of intent '{intent}' annotates undeclared slot '{slot}'")]
    UndeclaredSlot { intent: String, slot: String },
}

impl TrainingSet {
    /// Checks the shape of the training set before any training work starts.
    pub fn validate(&self) -> Result<(), TrainingSetError> {
        if self.language_code.trim().is_empty() {
            return Err(TrainingSetError::EmptyLanguage);
        }
        if !is_valid_language_code(&self.language_code) {
            return Err(TrainingSetError::InvalidLanguage(self.language_code.clone()));
        }
        if self.intent_defs.is_empty() {
            return Err(TrainingSetError::NoIntents);
        }

        let mut entity_names = HashSet::new();
        for entity in &self.entity_defs {
            if entity.name.is_empty() {
                return Err(TrainingSetError::EmptyEntityName);
            }
            if !entity_names.insert(entity.name.as_str()) {
                return Err(TrainingSetError::DuplicateEntity(entity.name.clone()));
            }
            if let EntityKind::Pattern { pattern, case_sensitive } = &entity.kind {
                RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| TrainingSetError::InvalidPattern {
                        entity: entity.name.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }

        let mut intent_names = HashSet::new();
        for intent in &self.intent_defs {
            if intent.name.is_empty() {
                return Err(TrainingSetError::EmptyIntentName);
            }
            if !intent_names.insert(intent.name.as_str()) {
                return Err(TrainingSetError::DuplicateIntent(intent.name.clone()));
            }
            if intent.utterances.is_empty() {
                return Err(TrainingSetError::NoUtterances(intent.name.clone()));
            }

            for slot in &intent.slots {
                if let Some(entity) = slot
                    .entities
                    .iter()
                    .find(|e| e.as_str() != ANY_ENTITY && !entity_names.contains(e.as_str()))
                {
                    return Err(TrainingSetError::UnknownEntity {
                        intent: intent.name.clone(),
                        slot: slot.name.clone(),
                        entity: entity.clone(),
                    });
                }
            }

            for (index, raw) in intent.utterances.iter().enumerate() {
                let parsed = parse_utterance(raw);
                if parsed.utterance.trim().is_empty() {
                    return Err(TrainingSetError::EmptyUtterance {
                        intent: intent.name.clone(),
                        index,
                    });
                }
                if let Some(slot) = parsed
                    .slot_names()
                    .find(|name| !intent.slots.iter().any(|s| s.name == *name))
                {
                    return Err(TrainingSetError::UndeclaredSlot {
                        intent: intent.name.clone(),
                        slot: slot.to_string(),
                    });
                };
            }
        }

        Ok(())
    }

    pub fn intent_names(&self) -> Vec<String> {
        self.intent_defs.iter().map(|i| i.name.clone()).collect()
    }
}

/// Language codes end up in model ids and file names, so they are kept to a
/// path-safe charset.
pub(crate) fn is_valid_language_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
