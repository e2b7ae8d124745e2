//! Knowledge Base
//!
//! Ordered mapping from a canonical entry id (the authored prompt key) to a
//! structured record of triggers, answers and relevance. Owns the memoized
//! vocabulary, which is dropped whenever the table changes.

use crate::error::Result;
use crate::vocabulary::{Vector, Vocabulary};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Built-in table shipped with the crate
const BUILTIN_TABLE: &str = include_str!("../data/knowledge.toml");

/// Relevance used by `add_knowledge` callers that have no better figure
pub const DEFAULT_RELEVANCE: f64 = 0.8;

/// Separators accepted between authored alternatives
const DELIMITERS: [char; 2] = ['|', '｜'];

/// One knowledge-base record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeEntry {
    /// Canonical id: the prompt key exactly as authored
    pub id: String,
    pub triggers: Vec<String>,
    pub answers: Vec<String>,
    /// Authored preference weight in [0, 1]
    pub relevance: f64,
}

impl KnowledgeEntry {
    /// Parse delimiter-separated authored text into a record.
    ///
    /// Relevance is clamped to [0, 1]; a non-finite value falls back to
    /// [`DEFAULT_RELEVANCE`].
    pub fn parse(prompt: &str, answer: &str, relevance: f64) -> Self {
        let relevance = if relevance.is_finite() {
            relevance.clamp(0.0, 1.0)
        } else {
            log::warn!(
                "Non-finite relevance {} for {:?}, using {}",
                relevance,
                prompt,
                DEFAULT_RELEVANCE
            );
            DEFAULT_RELEVANCE
        };

        Self {
            id: prompt.to_string(),
            triggers: split_alternatives(prompt),
            answers: split_alternatives(answer),
            relevance,
        }
    }

    /// First authored answer, used as the reply for a match
    pub fn primary_answer(&self) -> &str {
        self.answers.first().map(String::as_str).unwrap_or_default()
    }

    /// Short label for result metadata
    pub fn label(&self) -> String {
        const MAX_CHARS: usize = 30;
        if self.id.chars().count() > MAX_CHARS {
            let head: String = self.id.chars().take(MAX_CHARS).collect();
            format!("{head}...")
        } else {
            self.id.clone()
        }
    }
}

fn split_alternatives(text: &str) -> Vec<String> {
    text.split(DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
struct KnowledgeTable {
    #[serde(default)]
    entry: Vec<AuthoredEntry>,
}

#[derive(Debug, Deserialize)]
struct AuthoredEntry {
    prompt: String,
    answer: String,
    #[serde(default = "default_relevance")]
    relevance: f64,
}

fn default_relevance() -> f64 {
    DEFAULT_RELEVANCE
}

/// Knowledge base with lazily built vocabulary
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
    index: HashMap<String, usize>,
    vocabulary: RwLock<Option<Arc<Vocabulary>>>,
}

impl KnowledgeBase {
    /// Empty knowledge base
    pub fn new() -> Self {
        Self::default()
    }

    /// Knowledge base populated with the built-in table
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TABLE)
    }

    /// Parse a `[[entry]]` TOML table
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: KnowledgeTable = toml::from_str(content)?;
        let mut kb = Self::new();
        for entry in table.entry {
            kb.insert(KnowledgeEntry::parse(&entry.prompt, &entry.answer, entry.relevance));
        }
        Ok(kb)
    }

    /// Load a knowledge table from disk
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading knowledge table from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Insert or overwrite an entry by exact prompt key.
    ///
    /// Returns the number of entries afterwards.
    pub fn add_knowledge(&mut self, prompt: &str, answer: &str, relevance: f64) -> usize {
        let entry = KnowledgeEntry::parse(prompt, answer, relevance);
        if self.index.contains_key(prompt) {
            log::info!("Updating knowledge: {}", entry.label());
        } else {
            log::info!("Adding knowledge: {}", entry.label());
        }
        self.insert(entry);
        self.entries.len()
    }

    fn insert(&mut self, entry: KnowledgeEntry) {
        match self.index.get(&entry.id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        self.invalidate_vocabulary();
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct triggers in table order
    pub fn distinct_triggers(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|e| e.triggers.iter())
            .map(String::as_str)
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Relevance of the first entry listing `trigger`
    pub fn relevance_of(&self, trigger: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.triggers.iter().any(|t| t == trigger))
            .map(|e| e.relevance)
    }

    /// Memoized vocabulary; built on first use after a change
    pub fn vocabulary(&self) -> Arc<Vocabulary> {
        if let Some(vocab) = self.vocabulary.read().as_ref() {
            return Arc::clone(vocab);
        }

        let mut slot = self.vocabulary.write();
        // another reader may have built it between the two locks
        if let Some(vocab) = slot.as_ref() {
            return Arc::clone(vocab);
        }

        let phrases = self
            .entries
            .iter()
            .flat_map(|e| e.triggers.iter().chain(e.answers.iter()))
            .map(String::as_str);
        let vocab = Arc::new(Vocabulary::build(phrases));
        log::debug!("Vocabulary built: {} characters", vocab.len());

        *slot = Some(Arc::clone(&vocab));
        vocab
    }

    /// Size of the vocabulary if it is currently built
    pub fn vocabulary_size(&self) -> Option<usize> {
        self.vocabulary.read().as_ref().map(|v| v.len())
    }

    pub fn is_vocabulary_built(&self) -> bool {
        self.vocabulary.read().is_some()
    }

    fn invalidate_vocabulary(&mut self) {
        *self.vocabulary.get_mut() = None;
    }

    /// Vectorize text against the current vocabulary
    pub fn text_to_vector(&self, text: &str) -> Vector {
        self.vocabulary().vectorize(text)
    }
}
