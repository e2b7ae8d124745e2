//! kb-responder: Core Data Structures
//!
//! Configuration, prediction results and statistics shared by the matching
//! pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ResponderError, Result};

/// Which stage of the predictor produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPath {
    /// Fixed keyword override
    SpecialCase,
    /// Best-scoring knowledge-base trigger
    KnowledgeBase,
    /// External search summary
    Search,
    /// Generic "still learning" reply
    Default,
    /// Internal fault collapsed at the predictor boundary
    Error,
}

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub answer: String,
    pub score: f64,
    /// Human-readable label of the match (special-case name, entry id, ...)
    pub source: String,
    pub path: MatchPath,
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
    pub cached: bool,
}

impl PredictionResult {
    pub fn new(answer: impl Into<String>, score: f64, source: impl Into<String>, path: MatchPath) -> Self {
        Self {
            answer: answer.into(),
            score,
            source: source.into(),
            path,
            response_time: Duration::ZERO,
            cached: false,
        }
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time = elapsed;
        self
    }

    pub fn is_special_case(&self) -> bool {
        self.path == MatchPath::SpecialCase
    }

    pub fn is_match(&self) -> bool {
        self.path == MatchPath::KnowledgeBase
    }

    pub fn is_search_fallback(&self) -> bool {
        self.path == MatchPath::Search
    }

    pub fn is_default(&self) -> bool {
        self.path == MatchPath::Default
    }

    pub fn is_error(&self) -> bool {
        self.path == MatchPath::Error
    }
}

/// Results of a sequential batch of predictions
#[derive(Debug, Clone, Serialize)]
pub struct BatchPrediction {
    pub results: Vec<(String, PredictionResult)>,
    #[serde(with = "duration_ms")]
    pub total_time: Duration,
}

impl BatchPrediction {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Weights of the linear scoring model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringParameters {
    pub w1: f64,
    pub w2: f64,
    pub bias: f64,
}

impl ScoringParameters {
    pub fn new(w1: f64, w2: f64, bias: f64) -> Self {
        Self { w1, w2, bias }
    }

    pub fn is_finite(&self) -> bool {
        self.w1.is_finite() && self.w2.is_finite() && self.bias.is_finite()
    }

    /// Draw each parameter uniformly from [-0.1, 0.1)
    pub fn random(rng: &mut fastrand::Rng) -> Self {
        let mut draw = || rng.f64() * 0.2 - 0.1;
        Self {
            w1: draw(),
            w2: draw(),
            bias: draw(),
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub samples: usize,
    /// Mean squared error of every epoch, in order
    pub epoch_losses: Vec<f64>,
    pub initial: ScoringParameters,
    pub weights: ScoringParameters,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Counters and derived figures describing a running responder
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponderStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub search_queries: u64,
    pub training_runs: u64,
    pub cache_size: usize,
    pub cache_hit_rate: f64,
    pub vocabulary_size: usize,
    pub knowledge_size: usize,
    pub weights: Option<ScoringParameters>,
}

/// Tunable constants of the layered similarity function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityPolicy {
    /// Score for identical strings
    pub exact_score: f64,
    /// Score when one string contains the other
    pub substring_score: f64,
    /// Score when both strings hit the same keyword group
    pub keyword_score: f64,
    pub cosine_weight: f64,
    pub jaccard_weight: f64,
    /// Keyword categories; a shared category means "same topic"
    pub keyword_groups: Vec<Vec<String>>,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        let groups: [&[&str]; 5] = [
            &["交租", "房租", "租金", "沒錢", "錢"],
            &["😭", "哭", "淚", "傷心", "難過"],
            &["開心", "高興", "快樂", "喜悅"],
            &["問題", "疑問", "問", "不懂"],
            &["幫助", "幫", "協助", "支援"],
        ];

        Self {
            exact_score: 1.0,
            substring_score: 0.9,
            keyword_score: 0.8,
            cosine_weight: 0.5,
            jaccard_weight: 0.5,
            keyword_groups: groups
                .iter()
                .map(|g| g.iter().map(|k| k.to_string()).collect())
                .collect(),
        }
    }
}

impl SimilarityPolicy {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("exact_score", self.exact_score),
            ("substring_score", self.substring_score),
            ("keyword_score", self.keyword_score),
            ("cosine_weight", self.cosine_weight),
            ("jaccard_weight", self.jaccard_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ResponderError::InvalidConfig(format!(
                    "similarity.{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.substring_score >= self.exact_score {
            return Err(ResponderError::InvalidConfig(format!(
                "similarity.substring_score ({}) must be below exact_score ({})",
                self.substring_score, self.exact_score
            )));
        }

        let blend = self.cosine_weight + self.jaccard_weight;
        if (blend - 1.0).abs() > 1e-6 {
            return Err(ResponderError::InvalidConfig(format!(
                "similarity blend weights must sum to 1, got {blend}"
            )));
        }

        Ok(())
    }
}

/// Hyper-parameters for the online training procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Only the first `pair_limit` triggers take part in pairwise samples
    pub pair_limit: usize,
    /// Pairs at or below this similarity are left out
    pub pair_threshold: f64,
    /// Report the loss every this many epochs (0 disables progress logs)
    pub log_every: usize,
    /// Train once when the predictor is constructed
    pub train_on_start: bool,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.01,
            pair_limit: 20,
            pair_threshold: 0.3,
            log_every: 10,
            train_on_start: false,
        }
    }
}

impl TrainingOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ResponderError::InvalidConfig(format!(
                "training.learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !self.pair_threshold.is_finite() {
            return Err(ResponderError::InvalidConfig(
                "training.pair_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Fall back to the search collaborator when nothing matches
    pub enable_search: bool,

    /// Upper bound for one search call
    pub search_timeout_ms: u64,

    /// Inputs this short (in chars, after normalization) never trigger a search
    pub search_min_chars: usize,

    pub cache_enabled: bool,
    pub cache_ttl_ms: u64,

    /// Minimum model score for a knowledge-base answer
    pub match_threshold: f64,

    /// Score attached to generic fallback replies
    pub default_score: f64,

    /// Seed for weight initialization, shuffling and reply selection
    pub seed: Option<u64>,

    pub similarity: SimilarityPolicy,
    pub training: TrainingOptions,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            enable_search: true,
            search_timeout_ms: 5000,
            search_min_chars: 2,
            cache_enabled: true,
            cache_ttl_ms: 300_000,
            match_threshold: 0.3,
            default_score: 0.1,
            seed: None,
            similarity: SimilarityPolicy::default(),
            training: TrainingOptions::default(),
        }
    }
}

impl ResponderConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        log::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() {
            return Err(ResponderError::InvalidConfig(
                "match_threshold must be finite".to_string(),
            ));
        }
        self.training.validate()?;
        self.similarity.validate()
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Fresh RNG honoring the configured seed
    pub fn rng(&self) -> fastrand::Rng {
        match self.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
