//! Vocabulary & Vectorizer
//!
//! Character-level alphabet derived from the knowledge base, and the
//! normalized frequency vectors built over it. Slot order is the order in
//! which characters were first seen during a build.

use std::collections::HashMap;

/// Characters that are always part of the vocabulary
pub const SEED_CHARS: &str =
    "，。！？；：,.!?;:abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Normalized character-frequency vector
pub type Vector = Vec<f64>;

/// Ordered set of characters with O(1) slot lookup
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    chars: Vec<char>,
    slots: HashMap<char, usize>,
}

impl Vocabulary {
    /// Build from phrases, then append the seed set
    pub fn build<'a, I>(phrases: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut vocab = Self::default();
        for phrase in phrases {
            phrase.chars().for_each(|c| vocab.insert(c));
        }
        SEED_CHARS.chars().for_each(|c| vocab.insert(c));
        vocab
    }

    fn insert(&mut self, c: char) {
        if !self.slots.contains_key(&c) {
            self.slots.insert(c, self.chars.len());
            self.chars.push(c);
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, c: char) -> bool {
        self.slots.contains_key(&c)
    }

    pub fn slot(&self, c: char) -> Option<usize> {
        self.slots.get(&c).copied()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Turn text into a frequency vector over this vocabulary.
    ///
    /// Unknown characters are skipped. The result sums to 1.0 when at least
    /// one character was recognized and is all zero otherwise.
    pub fn vectorize(&self, text: &str) -> Vector {
        let mut vector = vec![0.0; self.chars.len()];
        let mut total = 0usize;

        for c in text.chars() {
            if let Some(slot) = self.slot(c) {
                vector[slot] += 1.0;
                total += 1;
            }
        }

        if total > 0 {
            let total = total as f64;
            for v in &mut vector {
                *v /= total;
            }
        }

        vector
    }
}
