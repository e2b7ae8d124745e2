//! kb-responder: Knowledge-Base Conversational Responder
//!
//! Answers free text with the best-matching canned reply from a curated
//! knowledge base.
//!
//! # Architecture
//!
//! - **Vocabulary**: character alphabet of the knowledge base, built lazily
//! - **Similarity Engine**: exact / substring / keyword / cosine + Jaccard
//! - **Scoring Model**: `leaky_relu(sim*w1 + relevance*w2 + b)`, trainable
//! - **Response Cache**: TTL-bounded memoization of predictions
//! - **Search Collaborator**: optional external fallback with a timeout
//!
//! # Usage
//!
//! ```rust,no_run
//! use kb_responder::{Predictor, ResponderConfigBuilder};
//!
//! # async fn demo() -> kb_responder::Result<()> {
//! let config = ResponderConfigBuilder::new()
//!     .enable_search(false)
//!     .match_threshold(0.3)
//!     .build();
//! let predictor = Predictor::new(config)?;
//!
//! predictor.train(&Default::default())?;
//! let result = predictor.predict("壓力好大").await;
//! println!("{} ({:.2}, {})", result.answer, result.score, result.source);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod completion;
pub mod error;
pub mod knowledge;
pub mod scoring;
pub mod search;
pub mod similarity;
pub mod special_cases;
pub mod types;
pub mod vocabulary;

pub use error::{ResponderError, Result};
pub use knowledge::{KnowledgeBase, KnowledgeEntry};
pub use scoring::ScoringModel;
pub use search::SearchProvider;
pub use similarity::SimilarityEngine;
pub use special_cases::{SpecialCase, SpecialCases};
pub use types::*;

use cache::{cache_key, normalize, ResponseCache, PREDICT_OP, SEARCH_OP};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;

/// Reply returned when an internal step fails
pub const TECHNICAL_PROBLEM_ANSWER: &str = "抱歉，處理您的請求時出現了一些技術問題。請稍後再試。";

/// Generic replies for inputs nothing else could answer
pub const DEFAULT_RESPONSES: [&str; 4] = [
    "我理解了您的問題，但我需要更多信息來給出更準確的回答。",
    "這個問題很有趣！讓我思考一下如何更好地幫助您。",
    "我目前正在學習如何回答這類問題，您可以試著換個方式問問看。",
    "感謝您的提問！作為一個AI助手，我會不斷學習來更好地服務您。",
];

const SEARCH_SOURCE: &str = "智能搜索";
const DEFAULT_SOURCE: &str = "通用回應";
const ERROR_SOURCE: &str = "錯誤處理";

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    cache_hits: u64,
    search_queries: u64,
    training_runs: u64,
}

/// Orchestrates cache, special cases, knowledge-base scoring, search and
/// default replies
pub struct Predictor {
    config: ResponderConfig,
    knowledge: Arc<RwLock<KnowledgeBase>>,
    model: Arc<RwLock<ScoringModel>>,
    similarity: SimilarityEngine,
    special_cases: SpecialCases,
    cache: ResponseCache<PredictionResult>,
    search_cache: ResponseCache<String>,
    search: Option<Arc<dyn SearchProvider>>,
    rng: Mutex<fastrand::Rng>,
    counters: Mutex<Counters>,
}

impl Predictor {
    /// Create a predictor over the built-in knowledge table
    pub fn new(config: ResponderConfig) -> Result<Self> {
        Self::with_knowledge(config, KnowledgeBase::builtin()?)
    }

    /// Create a predictor over a caller-supplied knowledge base
    pub fn with_knowledge(config: ResponderConfig, knowledge: KnowledgeBase) -> Result<Self> {
        config.validate()?;

        let mut rng = config.rng();
        let model = ScoringModel::random(&mut rng);

        let predictor = Self {
            similarity: SimilarityEngine::new(config.similarity.clone()),
            special_cases: SpecialCases::default(),
            cache: ResponseCache::new(config.cache_ttl(), config.cache_enabled),
            search_cache: ResponseCache::new(config.cache_ttl(), config.cache_enabled),
            search: None,
            knowledge: Arc::new(RwLock::new(knowledge)),
            model: Arc::new(RwLock::new(model)),
            rng: Mutex::new(rng),
            counters: Mutex::new(Counters::default()),
            config,
        };

        if predictor.config.training.train_on_start {
            let options = predictor.config.training.clone();
            if let Err(e) = predictor.train(&options) {
                log::warn!("Startup training skipped: {}", e);
            }
        }

        log::info!(
            "Predictor ready: {} knowledge entries, search {}, cache {}",
            predictor.knowledge.read().len(),
            if predictor.config.enable_search { "enabled" } else { "disabled" },
            if predictor.config.cache_enabled { "enabled" } else { "disabled" },
        );

        Ok(predictor)
    }

    /// Attach a search collaborator
    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    /// Replace the special-case override table
    pub fn with_special_cases(mut self, table: SpecialCases) -> Self {
        self.special_cases = table;
        self
    }

    /// Start from fixed scoring parameters instead of random ones
    pub fn with_parameters(self, params: ScoringParameters) -> Self {
        self.model.write().set_params(params);
        self
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    /// Predict a reply. Never fails; internal faults become a fixed
    /// low-confidence answer.
    pub async fn predict(&self, input: &str) -> PredictionResult {
        match self.try_predict(input).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Prediction failed for {:?}: {}", input, e);
                PredictionResult::new(TECHNICAL_PROBLEM_ANSWER, 0.0, ERROR_SOURCE, MatchPath::Error)
            }
        }
    }

    /// Predict a reply, surfacing internal faults
    pub async fn try_predict(&self, input: &str) -> Result<PredictionResult> {
        let start = Instant::now();
        self.counters.lock().total_requests += 1;

        let key = cache_key(PREDICT_OP, input);
        if let Some(mut hit) = self.cache.get(&key) {
            self.counters.lock().cache_hits += 1;
            log::debug!("Cache hit: {}", key);
            hit.cached = true;
            hit.response_time = start.elapsed();
            return Ok(hit);
        }

        let normalized = normalize(input);
        let result = self.resolve(input, &normalized).await?;
        let result = result.with_response_time(start.elapsed());

        log::debug!("Resolved {:?} via {:?} (score {:.3})", normalized, result.path, result.score);
        self.cache.put(key, result.clone());
        Ok(result)
    }

    async fn resolve(&self, input: &str, normalized: &str) -> Result<PredictionResult> {
        if let Some(case) = self.special_cases.find(normalized) {
            return Ok(PredictionResult::new(
                case.response.clone(),
                case.score,
                case.source.clone(),
                MatchPath::SpecialCase,
            ));
        }

        if let Some(matched) = self.match_knowledge(normalized)? {
            return Ok(matched);
        }

        if self.config.enable_search && normalized.chars().count() > self.config.search_min_chars {
            if let Some(provider) = self.search.clone() {
                let summary = self.search_summary(provider.as_ref(), input.trim()).await;
                return Ok(PredictionResult::new(summary, 0.0, SEARCH_SOURCE, MatchPath::Search));
            }
        }

        let answer = {
            let mut rng = self.rng.lock();
            DEFAULT_RESPONSES[rng.usize(..DEFAULT_RESPONSES.len())]
        };
        Ok(PredictionResult::new(
            answer,
            self.config.default_score,
            DEFAULT_SOURCE,
            MatchPath::Default,
        ))
    }

    /// Scan every trigger of every entry and keep the first-seen best score
    fn match_knowledge(&self, normalized: &str) -> Result<Option<PredictionResult>> {
        let kb = self.knowledge.read();
        let vocab = kb.vocabulary();
        let model = self.model.read();

        let mut best: Option<(f64, &KnowledgeEntry)> = None;
        for entry in kb.entries() {
            for trigger in &entry.triggers {
                let sim = self.similarity.similarity(normalized, trigger, &vocab);
                let score = model.score(sim, entry.relevance);
                if !score.is_finite() {
                    return Err(ResponderError::NonFiniteScore {
                        trigger: trigger.clone(),
                    });
                }
                if best.map_or(true, |(top, _)| score > top) {
                    best = Some((score, entry));
                }
            }
        }

        Ok(match best {
            Some((score, entry)) if score >= self.config.match_threshold => Some(PredictionResult::new(
                entry.primary_answer(),
                score,
                entry.label(),
                MatchPath::KnowledgeBase,
            )),
            _ => None,
        })
    }

    async fn search_summary(&self, provider: &dyn SearchProvider, query: &str) -> String {
        self.counters.lock().search_queries += 1;

        let key = cache_key(SEARCH_OP, query);
        if let Some(summary) = self.search_cache.get(&key) {
            self.counters.lock().cache_hits += 1;
            return summary;
        }

        match search::search_with_timeout(provider, query, self.config.search_timeout()).await {
            Ok(summary) => {
                self.search_cache.put(key, summary.clone());
                summary
            }
            Err(e) => {
                log::warn!("Search via {} failed: {}", provider.name(), e);
                search::unavailable_summary(query)
            }
        }
    }

    /// Predict each input in order
    pub async fn batch_predict<S: AsRef<str>>(&self, inputs: &[S]) -> BatchPrediction {
        let start = Instant::now();
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let input = input.as_ref();
            results.push((input.to_string(), self.predict(input).await));
        }

        BatchPrediction {
            results,
            total_time: start.elapsed(),
        }
    }

    /// Train the shared scoring model against the current knowledge base.
    ///
    /// Holds the model write lock for the whole run; predictions wait.
    pub fn train(&self, options: &TrainingOptions) -> Result<TrainingReport> {
        let report = {
            let kb = self.knowledge.read();
            let mut model = self.model.write();
            let mut rng = self.rng.lock();
            model.train(&kb, &self.similarity, options, &mut rng)?
        };

        self.counters.lock().training_runs += 1;
        // cached scores came from the old weights
        self.cache.clear();
        Ok(report)
    }

    /// Insert or overwrite a knowledge entry; returns the entry count
    pub fn add_knowledge(&self, prompt: &str, answer: &str, relevance: f64) -> usize {
        let total = self.knowledge.write().add_knowledge(prompt, answer, relevance);
        self.cache.clear();
        total
    }

    /// Drop every cached prediction and search summary
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.search_cache.clear();
        log::info!("Cache cleared");
    }

    pub fn parameters(&self) -> ScoringParameters {
        self.model.read().params()
    }

    pub fn set_parameters(&self, params: ScoringParameters) {
        self.model.write().set_params(params);
        self.cache.clear();
    }

    /// Number of knowledge entries
    pub fn knowledge_len(&self) -> usize {
        self.knowledge.read().len()
    }

    /// Run `f` against the knowledge base under its read lock
    pub fn with_knowledge_base<R>(&self, f: impl FnOnce(&KnowledgeBase) -> R) -> R {
        f(&self.knowledge.read())
    }

    pub fn stats(&self) -> ResponderStats {
        let counters = self.counters.lock();
        let kb = self.knowledge.read();

        ResponderStats {
            total_requests: counters.total_requests,
            cache_hits: counters.cache_hits,
            search_queries: counters.search_queries,
            training_runs: counters.training_runs,
            cache_size: self.cache.len() + self.search_cache.len(),
            cache_hit_rate: if counters.total_requests > 0 {
                counters.cache_hits as f64 / counters.total_requests as f64
            } else {
                0.0
            },
            vocabulary_size: kb.vocabulary_size().unwrap_or(0),
            knowledge_size: kb.len(),
            weights: Some(self.parameters()),
        }
    }

    /// Get engine info
    pub fn info(&self) -> String {
        let params = self.parameters();
        format!(
            "Knowledge Responder\n\
             Knowledge entries: {}\n\
             Search: {}\n\
             Cache: {} (ttl {}ms)\n\
             Weights: w1={:.4} w2={:.4} b={:.4}",
            self.knowledge_len(),
            match (&self.search, self.config.enable_search) {
                (Some(p), true) => format!("enabled ({})", p.name()),
                (None, true) => "enabled (no provider)".to_string(),
                _ => "disabled".to_string(),
            },
            if self.config.cache_enabled { "enabled" } else { "disabled" },
            self.config.cache_ttl_ms,
            params.w1,
            params.w2,
            params.bias,
        )
    }
}

/// Builder for ResponderConfig
pub struct ResponderConfigBuilder {
    config: ResponderConfig,
}

impl ResponderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResponderConfig::default(),
        }
    }

    pub fn enable_search(mut self, enable: bool) -> Self {
        self.config.enable_search = enable;
        self
    }

    pub fn search_timeout_ms(mut self, ms: u64) -> Self {
        self.config.search_timeout_ms = ms;
        self
    }

    pub fn cache_enabled(mut self, enable: bool) -> Self {
        self.config.cache_enabled = enable;
        self
    }

    pub fn cache_ttl_ms(mut self, ms: u64) -> Self {
        self.config.cache_ttl_ms = ms;
        self
    }

    pub fn match_threshold(mut self, threshold: f64) -> Self {
        self.config.match_threshold = threshold;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn similarity(mut self, policy: SimilarityPolicy) -> Self {
        self.config.similarity = policy;
        self
    }

    pub fn training(mut self, options: TrainingOptions) -> Self {
        self.config.training = options;
        self
    }

    pub fn build(self) -> ResponderConfig {
        self.config
    }
}

impl Default for ResponderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> ResponderConfig {
        ResponderConfigBuilder::new().enable_search(false).seed(5).build()
    }

    /// Weights that turn similarity straight into score
    fn identity_params() -> ScoringParameters {
        ScoringParameters::new(1.0, 0.0, 0.0)
    }

    struct CountingSearch {
        calls: AtomicUsize,
        reply: anyhow::Result<&'static str>,
    }

    #[async_trait]
    impl SearchProvider for CountingSearch {
        async fn search(&self, _query: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(s) => Ok(s.to_string()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_greeting_is_special_case() {
        let predictor = Predictor::new(config()).unwrap();
        let result = predictor.predict("你好").await;

        assert!(result.is_special_case());
        assert!(result.score >= 0.9);
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn test_second_call_is_cached() {
        let predictor = Predictor::new(config()).unwrap();

        let first = predictor.predict("  你好 ").await;
        let second = predictor.predict("你好").await;

        assert!(second.cached);
        assert_eq!(first.answer, second.answer);
        assert_eq!(first.score, second.score);
        assert_eq!(first.source, second.source);
        assert_eq!(predictor.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_knowledge_match_with_fixed_weights() {
        let predictor = Predictor::new(config()).unwrap().with_parameters(identity_params());
        let result = predictor.predict("壓力好大").await;

        assert!(result.is_match());
        assert_eq!(result.score, 1.0);
        assert!(result.answer.contains("壓力"));
    }

    #[tokio::test]
    async fn test_ties_keep_first_entry() {
        let mut kb = KnowledgeBase::new();
        kb.add_knowledge("蘋果", "first", 0.5);
        kb.add_knowledge("蘋果|香蕉", "second", 0.5);

        let predictor = Predictor::with_knowledge(config(), kb)
            .unwrap()
            .with_parameters(identity_params());
        let result = predictor.predict("蘋果").await;

        assert_eq!(result.answer, "first");
    }

    #[tokio::test]
    async fn test_unmatched_input_falls_to_default() {
        let predictor = Predictor::new(config()).unwrap().with_parameters(identity_params());
        let result = predictor.predict("量子力學是什麼").await;

        assert!(result.is_default());
        assert!((result.score - 0.1).abs() < 1e-12);
        assert!(DEFAULT_RESPONSES.contains(&result.answer.as_str()));
    }

    #[tokio::test]
    async fn test_search_fallback_and_search_cache() {
        let provider = Arc::new(CountingSearch {
            calls: AtomicUsize::new(0),
            reply: Ok("量子力學是物理學分支"),
        });
        let config = ResponderConfigBuilder::new().enable_search(true).seed(5).build();
        let predictor = Predictor::new(config)
            .unwrap()
            .with_parameters(identity_params())
            .with_search(provider.clone());

        let result = predictor.predict("量子力學是什麼").await;
        assert!(result.is_search_fallback());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.answer, "量子力學是物理學分支");

        predictor.clear_cache();
        predictor.predict("量子力學是什麼").await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(predictor.stats().search_queries, 2);
    }

    #[tokio::test]
    async fn test_search_failure_is_recovered() {
        let provider = Arc::new(CountingSearch {
            calls: AtomicUsize::new(0),
            reply: Err(anyhow::anyhow!("offline")),
        });
        let config = ResponderConfigBuilder::new().enable_search(true).build();
        let predictor = Predictor::new(config)
            .unwrap()
            .with_parameters(identity_params())
            .with_search(provider);

        let result = predictor.predict("量子力學是什麼").await;
        assert!(result.is_search_fallback());
        assert!(result.answer.contains("量子力學是什麼"));
    }

    #[tokio::test]
    async fn test_short_input_skips_search() {
        let provider = Arc::new(CountingSearch {
            calls: AtomicUsize::new(0),
            reply: Ok("unused"),
        });
        let config = ResponderConfigBuilder::new().enable_search(true).build();
        let predictor = Predictor::new(config)
            .unwrap()
            .with_parameters(identity_params())
            .with_search(provider.clone());

        let result = predictor.predict("量子").await;
        assert!(result.is_default());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_finite_weights_become_technical_problem() {
        let predictor = Predictor::new(config())
            .unwrap()
            .with_parameters(ScoringParameters::new(f64::NAN, 0.0, 0.0));

        assert!(matches!(
            predictor.try_predict("量子力學").await,
            Err(ResponderError::NonFiniteScore { .. })
        ));

        let result = predictor.predict("量子力學").await;
        assert!(result.is_error());
        assert_eq!(result.answer, TECHNICAL_PROBLEM_ANSWER);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_add_knowledge_then_predict() {
        let predictor = Predictor::new(config()).unwrap().with_parameters(identity_params());
        let before = predictor.knowledge_len();

        let total = predictor.add_knowledge("量子糾纏|量子力學", "量子力學研究微觀粒子", 1.0);
        assert_eq!(total, before + 1);

        let result = predictor.predict("量子糾纏").await;
        assert!(result.is_match());
        assert_eq!(result.answer, "量子力學研究微觀粒子");
    }

    #[tokio::test]
    async fn test_add_knowledge_replaces_cached_answer() {
        let predictor = Predictor::new(config()).unwrap().with_parameters(identity_params());

        let before = predictor.predict("量子糾纏").await;
        assert!(before.is_default());

        predictor.add_knowledge("量子糾纏", "粒子之間的關聯", 1.0);
        let after = predictor.predict("量子糾纏").await;

        assert!(!after.cached);
        assert!(after.is_match());
        assert_eq!(after.answer, "粒子之間的關聯");
    }

    #[tokio::test]
    async fn test_nan_relevance_entry_leaves_other_answers_alone() {
        let predictor = Predictor::new(config())
            .unwrap()
            .with_parameters(ScoringParameters::new(1.0, 0.5, 0.0));
        let before = predictor.predict("壓力好大").await;

        predictor.add_knowledge("新條目", "x", f64::NAN);
        let after = predictor.predict("壓力好大").await;

        assert!(after.is_match());
        assert_eq!(after.answer, before.answer);
        assert_eq!(after.score, before.score);
    }

    #[tokio::test]
    async fn test_divergent_training_is_rejected() {
        let predictor = Predictor::new(config()).unwrap().with_parameters(identity_params());

        let options = TrainingOptions {
            learning_rate: 1e6,
            log_every: 0,
            ..TrainingOptions::default()
        };
        assert!(matches!(
            predictor.train(&options),
            Err(ResponderError::TrainingDiverged { .. })
        ));

        let nan_lr = TrainingOptions {
            learning_rate: f64::NAN,
            ..TrainingOptions::default()
        };
        assert!(matches!(predictor.train(&nan_lr), Err(ResponderError::InvalidConfig(_))));

        assert_eq!(predictor.parameters(), identity_params());
        assert_eq!(predictor.stats().training_runs, 0);
        let result = predictor.predict("壓力好大").await;
        assert!(result.is_match());
    }

    #[tokio::test]
    async fn test_batch_predict_keeps_order() {
        let predictor = Predictor::new(config()).unwrap();
        let batch = predictor.batch_predict(&["你好", "謝謝"]).await;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.results[0].0, "你好");
        assert_eq!(batch.results[1].1.source, "感謝回應");
    }

    #[tokio::test]
    async fn test_cache_expiry_recomputes() {
        let config = ResponderConfigBuilder::new()
            .enable_search(false)
            .cache_ttl_ms(5)
            .build();
        let predictor = Predictor::new(config).unwrap();

        predictor.predict("你好").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let again = predictor.predict("你好").await;

        assert!(!again.cached);
    }

    #[test]
    fn test_train_clears_cache_and_counts() {
        let predictor = Predictor::new(config()).unwrap();
        let before = predictor.parameters();

        let report = predictor.train(&TrainingOptions::default()).unwrap();

        assert_eq!(report.initial, before);
        assert_ne!(predictor.parameters(), before);
        assert_eq!(predictor.stats().training_runs, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut policy = SimilarityPolicy::default();
        policy.jaccard_weight = 0.9;
        let config = ResponderConfigBuilder::new().similarity(policy).build();

        assert!(matches!(Predictor::new(config), Err(ResponderError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_builder() {
        let config = ResponderConfigBuilder::new()
            .enable_search(false)
            .search_timeout_ms(100)
            .cache_enabled(false)
            .cache_ttl_ms(10)
            .match_threshold(0.5)
            .build();

        assert!(!config.enable_search);
        assert_eq!(config.search_timeout_ms, 100);
        assert!(!config.cache_enabled);
        assert_eq!(config.cache_ttl_ms, 10);
        assert_eq!(config.match_threshold, 0.5);
    }
}
