//! Slot annotation parsing for training utterances.
//!
//! Training utterances carry inline slot annotations of the form
//! `[value](slotName)`. [`parse_utterance`] strips the annotation syntax and
//! reports where each slot sits in both the raw and the clean text:
//!
//! ```rust
//! use intentforge::parse_utterance;
//!
//! let parsed = parse_utterance("fly to [Paris](destination) tomorrow");
//! assert_eq!(parsed.utterance, "fly to Paris tomorrow");
//!
//! let slot = &parsed.parsed_slots[0];
//! assert_eq!(slot.name, "destination");
//! assert_eq!(&parsed.utterance[slot.clean_position.range()], "Paris");
//! ```
//!
//! Offsets are UTF-8 byte offsets, so both positions can slice their string
//! directly. Anything that does not match the annotation syntax exactly is kept
//! as literal text; parsing never fails.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

lazy_static! {
    static ref SLOT_ANNOTATION: Regex =
        Regex::new(r"\[([^\[\]]+)\]\(([\w.:-]+)\)").expect("slot annotation pattern is valid");
}

/// A half-open `[start, end)` byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// One `[value](name)` annotation found in a raw utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOccurrence {
    pub name: String,
    pub value: String,
    /// Span of the whole annotation, brackets included, in the raw text.
    pub raw_position: Span,
    /// Span of the bare value in the clean text.
    pub clean_position: Span,
}

/// Result of [`parse_utterance`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUtterance {
    /// The utterance with every annotation replaced by its value.
    pub utterance: String,
    pub parsed_slots: Vec<SlotOccurrence>,
}

impl ParsedUtterance {
    /// Names of the annotated slots, in order of appearance.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.parsed_slots.iter().map(|slot| slot.name.as_str())
    }

    /// Rebuilds the raw annotated text from the clean utterance.
    pub fn reinsert_annotations(&self) -> String {
        let mut raw = String::with_capacity(self.utterance.len());
        let mut cursor = 0;
        for slot in &self.parsed_slots {
            raw.push_str(&self.utterance[cursor..slot.clean_position.start]);
            raw.push('[');
            raw.push_str(&slot.value);
            raw.push_str("](");
            raw.push_str(&slot.name);
            raw.push(')');
            cursor = slot.clean_position.end;
        }
        raw.push_str(&self.utterance[cursor..]);
        raw
    }
}

/// Extracts slot annotations from `raw` and returns the clean utterance.
pub fn parse_utterance(raw: &str) -> ParsedUtterance {
    let mut utterance = String::with_capacity(raw.len());
    let mut parsed_slots = Vec::new();
    let mut cursor = 0;
    // bytes of annotation syntax dropped so far
    let mut removed = 0;

    for captures in SLOT_ANNOTATION.captures_iter(raw) {
        let (Some(whole), Some(value), Some(name)) = (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };

        utterance.push_str(&raw[cursor..whole.start()]);
        utterance.push_str(value.as_str());
        cursor = whole.end();

        let clean_start = whole.start() - removed;
        parsed_slots.push(SlotOccurrence {
            name: name.as_str().to_string(),
            value: value.as_str().to_string(),
            raw_position: Span::new(whole.start(), whole.end()),
            clean_position: Span::new(clean_start, clean_start + value.len()),
        });
        removed += whole.len() - value.len();
    }
    utterance.push_str(&raw[cursor..]);

    ParsedUtterance { utterance, parsed_slots }
}
