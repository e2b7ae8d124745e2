//! End-to-end behavior of the predictor pipeline.

use async_trait::async_trait;
use kb_responder::*;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn offline() -> ResponderConfigBuilder {
    ResponderConfigBuilder::new().enable_search(false)
}

struct SlowSearch;

#[async_trait]
impl SearchProvider for SlowSearch {
    async fn search(&self, _query: &str) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok("never returned".to_string())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[tokio::test]
async fn greeting_short_circuits_scoring() {
    // weights that would reject every knowledge-base match
    let predictor = Predictor::new(offline().build())
        .unwrap()
        .with_parameters(ScoringParameters::new(0.0, 0.0, -1.0));

    let result = predictor.predict("Hello there").await;
    assert!(result.is_special_case());
    assert!(result.score >= 0.9);
}

#[tokio::test]
async fn trained_model_matches_exact_trigger() {
    let config = offline()
        .seed(11)
        .training(TrainingOptions {
            epochs: 200,
            learning_rate: 0.05,
            ..TrainingOptions::default()
        })
        .build();
    let predictor = Predictor::new(config).unwrap();
    predictor.train(&predictor.config().training.clone()).unwrap();

    let result = predictor.predict("好孤單").await;
    assert!(result.is_match(), "got {:?}", result);
    assert!(result.score >= 0.3);
    assert!(result.answer.contains("孤單"));
}

#[tokio::test]
async fn seeded_predictors_agree() {
    let a = Predictor::new(offline().seed(3).build()).unwrap();
    let b = Predictor::new(offline().seed(3).build()).unwrap();
    assert_eq!(a.parameters(), b.parameters());

    for input in ["壓力好大", "量子力學是什麼", "謝謝你"] {
        let ra = a.predict(input).await;
        let rb = b.predict(input).await;
        assert_eq!(ra.answer, rb.answer);
        assert_eq!(ra.score, rb.score);
        assert_eq!(ra.path, rb.path);
    }
}

#[tokio::test]
async fn slow_search_is_cut_off() {
    let config = ResponderConfigBuilder::new()
        .enable_search(true)
        .search_timeout_ms(20)
        .build();
    let predictor = Predictor::new(config)
        .unwrap()
        .with_parameters(ScoringParameters::new(1.0, 0.0, 0.0))
        .with_search(Arc::new(SlowSearch));

    let start = Instant::now();
    let result = predictor.predict("量子力學是什麼").await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(result.is_search_fallback());
    assert_eq!(result.score, 0.0);
    assert!(result.answer.contains("量子力學是什麼"));
}

#[tokio::test]
async fn concurrent_predictions_share_one_predictor() {
    let predictor = Arc::new(Predictor::new(offline().build()).unwrap());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let predictor = Arc::clone(&predictor);
            tokio::spawn(async move { predictor.predict("你好").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_special_case());
    }

    let stats = predictor.stats();
    assert_eq!(stats.total_requests, 16);
    assert!(stats.cache_hits <= 15);
}

#[tokio::test]
async fn knowledge_file_drives_matching() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[[entry]]
prompt = "火星天氣|火星溫度"
answer = "火星很冷"
relevance = 1.0
"#
    )
    .unwrap();

    let kb = KnowledgeBase::load(file.path()).unwrap();
    let predictor = Predictor::with_knowledge(offline().build(), kb)
        .unwrap()
        .with_parameters(ScoringParameters::new(1.0, 0.0, 0.0));

    let result = predictor.predict("火星溫度").await;
    assert!(result.is_match());
    assert_eq!(result.answer, "火星很冷");
    assert_eq!(predictor.knowledge_len(), 1);
}

#[test]
fn config_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
enable_search = false
cache_ttl_ms = 1000

[training]
epochs = 7
"#
    )
    .unwrap();

    let config = ResponderConfig::load(file.path()).unwrap();
    assert!(!config.enable_search);
    assert_eq!(config.cache_ttl(), Duration::from_secs(1));
    assert_eq!(config.training.epochs, 7);
    assert_eq!(config.match_threshold, 0.3);
}

#[tokio::test]
async fn without_overrides_greeting_reaches_knowledge_base() {
    let predictor = Predictor::new(offline().build())
        .unwrap()
        .with_special_cases(SpecialCases::empty())
        .with_parameters(ScoringParameters::new(1.0, 0.0, 0.0));

    let result = predictor.predict("你好").await;
    assert!(result.is_match());
    assert_eq!(result.answer, "你好，我是doubao 的兒子");
    assert!(result.source.starts_with("你好"));
}

#[tokio::test]
async fn disabled_cache_recomputes_every_time() {
    let predictor = Predictor::new(offline().cache_enabled(false).build()).unwrap();

    predictor.predict("你好").await;
    let second = predictor.predict("你好").await;

    assert!(!second.cached);
    assert_eq!(predictor.stats().cache_hits, 0);
    assert_eq!(predictor.stats().cache_size, 0);
}
