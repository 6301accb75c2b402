//! Utterance to feature-vector conversion.
//!
//! Word unigrams and bigrams are hashed into a fixed number of buckets
//! (the "hashing trick"), together with indicator features for entities
//! mentioned in the text and slots annotated on it. The result is
//! L2-normalized.

use ndarray::Array1;
use regex::{Regex, RegexBuilder};
use unicode_segmentation::UnicodeSegmentation;

use crate::classifier::normalize_vector;
use crate::training_set::{Entity, EntityKind, TrainingSetError};
use crate::utterance::ParsedUtterance;

pub const DEFAULT_FEATURE_WIDTH: usize = 1024;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
enum EntityMatcher {
    List { name: String, phrases: Vec<String> },
    Pattern { name: String, regex: Regex },
}

#[derive(Debug, Clone)]
pub struct Featurizer {
    width: usize,
    entities: Vec<EntityMatcher>,
}

impl Featurizer {
    pub fn new(width: usize, entities: &[Entity]) -> Result<Self, TrainingSetError> {
        let entities = entities
            .iter()
            .map(|entity| match &entity.kind {
                EntityKind::List { values, .. } => Ok(EntityMatcher::List {
                    name: entity.name.clone(),
                    phrases: values
                        .iter()
                        .flat_map(|v| std::iter::once(&v.name).chain(v.synonyms.iter()))
                        .map(|phrase| normalize_phrase(phrase))
                        .filter(|phrase| !phrase.is_empty())
                        .collect(),
                }),
                EntityKind::Pattern { pattern, case_sensitive } => RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map(|regex| EntityMatcher::Pattern {
                        name: entity.name.clone(),
                        regex,
                    })
                    .map_err(|e| TrainingSetError::InvalidPattern {
                        entity: entity.name.clone(),
                        reason: e.to_string(),
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            width: width.max(1),
            entities,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn featurize(&self, parsed: &ParsedUtterance) -> Vec<f32> {
        let mut vector = Array1::<f32>::zeros(self.width);
        let words: Vec<String> = parsed
            .utterance
            .unicode_words()
            .map(str::to_lowercase)
            .collect();

        for word in &words {
            vector[self.bucket(&["w", word])] += 1.0;
        }
        for pair in words.windows(2) {
            vector[self.bucket(&["b", &pair[0], &pair[1]])] += 0.5;
        }

        let padded = format!(" {} ", words.join(" "));
        for matcher in &self.entities {
            let (name, found) = match matcher {
                EntityMatcher::List { name, phrases } => (
                    name,
                    phrases.iter().any(|p| padded.contains(&format!(" {} ", p))),
                ),
                EntityMatcher::Pattern { name, regex } => (name, regex.is_match(&parsed.utterance)),
            };
            if found {
                vector[self.bucket(&["e", name])] += 1.0;
            }
        }

        for slot in parsed.slot_names() {
            vector[self.bucket(&["s", slot])] += 1.0;
        }

        normalize_vector(&vector).to_vec()
    }

    fn bucket(&self, parts: &[&str]) -> usize {
        let mut hash = FNV_OFFSET;
        for part in parts {
            for byte in part.bytes().chain(std::iter::once(0xff)) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        (hash % self.width as u64) as usize
    }
}

fn normalize_phrase(phrase: &str) -> String {
    phrase
        .unicode_words()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
