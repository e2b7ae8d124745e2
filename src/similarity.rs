//! Similarity Engine
//!
//! Layered text similarity. Cheap, high-confidence shortcuts run first
//! (exact match, containment, shared keyword category); only when none apply
//! do we fall back to a blend of character-frequency cosine and
//! character-set Jaccard, which is unreliable for very short inputs.

use crate::types::SimilarityPolicy;
use crate::vocabulary::Vocabulary;
use std::collections::HashSet;

/// Which rule decided a similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityRule {
    Exact,
    Substring,
    Keyword,
    Blended,
}

/// Similarity calculator configured by a [`SimilarityPolicy`]
#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine {
    policy: SimilarityPolicy,
}

impl SimilarityEngine {
    pub fn new(policy: SimilarityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SimilarityPolicy {
        &self.policy
    }

    /// Similarity in [0, 1] between two texts
    pub fn similarity(&self, a: &str, b: &str, vocab: &Vocabulary) -> f64 {
        self.explain(a, b, vocab).0
    }

    /// Similarity together with the rule that produced it
    pub fn explain(&self, a: &str, b: &str, vocab: &Vocabulary) -> (f64, SimilarityRule) {
        if a == b {
            return (self.policy.exact_score, SimilarityRule::Exact);
        }

        if a.contains(b) || b.contains(a) {
            return (self.policy.substring_score, SimilarityRule::Substring);
        }

        if self.share_keyword_group(a, b) {
            return (self.policy.keyword_score, SimilarityRule::Keyword);
        }

        let cosine = cosine_similarity(&vocab.vectorize(a), &vocab.vectorize(b));
        let jaccard = jaccard_similarity(a, b);
        let blended = cosine * self.policy.cosine_weight + jaccard * self.policy.jaccard_weight;

        (blended.min(1.0), SimilarityRule::Blended)
    }

    /// True when both texts mention a keyword from the same category
    pub fn share_keyword_group(&self, a: &str, b: &str) -> bool {
        self.policy.keyword_groups.iter().any(|group| {
            let hit = |text: &str| group.iter().any(|k| !k.is_empty() && text.contains(k.as_str()));
            hit(a) && hit(b)
        })
    }
}

/// Cosine similarity of two vectors, clamped to [0, 1].
///
/// Zero-norm or mismatched inputs yield 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Jaccard index over the distinct characters of two texts
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f64 / union as f64
}
