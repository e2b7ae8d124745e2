//! Scoring Model
//!
//! Three-parameter linear model with a leaky rectifier:
//!
//! ```text
//! z     = similarity * w1 + relevance * w2 + bias
//! score = z          if z > 0
//!         0.01 * z   otherwise
//! ```
//!
//! Training fits the parameters online over samples synthesized from the
//! knowledge base triggers.

use crate::error::{ResponderError, Result};
use crate::knowledge::KnowledgeBase;
use crate::similarity::{cosine_similarity, SimilarityEngine};
use crate::types::{ScoringParameters, TrainingOptions, TrainingReport};
use std::collections::HashMap;

/// Slope of the activation for non-positive inputs
pub const LEAKY_SLOPE: f64 = 0.01;

/// Relevance assumed for targets not found in the knowledge base
pub const FALLBACK_RELEVANCE: f64 = 0.5;

pub fn leaky_relu(z: f64) -> f64 {
    if z > 0.0 {
        z
    } else {
        LEAKY_SLOPE * z
    }
}

pub fn leaky_relu_derivative(z: f64) -> f64 {
    if z > 0.0 {
        1.0
    } else {
        LEAKY_SLOPE
    }
}

/// One synthesized training example
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub input: String,
    pub target: String,
    pub label: f64,
}

/// Linear-plus-activation scorer
#[derive(Debug, Clone)]
pub struct ScoringModel {
    params: ScoringParameters,
}

impl ScoringModel {
    pub fn new(params: ScoringParameters) -> Self {
        Self { params }
    }

    /// Model with parameters drawn from `rng`
    pub fn random(rng: &mut fastrand::Rng) -> Self {
        Self::new(ScoringParameters::random(rng))
    }

    pub fn params(&self) -> ScoringParameters {
        self.params
    }

    pub fn set_params(&mut self, params: ScoringParameters) {
        self.params = params;
    }

    /// Pre-activation value
    pub fn linear(&self, similarity: f64, relevance: f64) -> f64 {
        similarity * self.params.w1 + relevance * self.params.w2 + self.params.bias
    }

    pub fn score(&self, similarity: f64, relevance: f64) -> f64 {
        leaky_relu(self.linear(similarity, relevance))
    }

    /// Fit the parameters to samples derived from `kb`.
    ///
    /// Shuffling draws from `rng`, so runs only repeat with a seeded source.
    /// The live parameters are only replaced when training ends with finite
    /// weights.
    pub fn train(
        &mut self,
        kb: &KnowledgeBase,
        similarity: &SimilarityEngine,
        options: &TrainingOptions,
        rng: &mut fastrand::Rng,
    ) -> Result<TrainingReport> {
        options.validate()?;

        let vocab = kb.vocabulary();
        let mut samples = build_training_set(kb, similarity, options);
        if samples.is_empty() {
            return Err(ResponderError::EmptyTrainingSet);
        }

        log::info!(
            "Training scoring model: {} samples, {} epochs, lr {}",
            samples.len(),
            options.epochs,
            options.learning_rate
        );

        let triggers = kb.distinct_triggers();
        let vectors: HashMap<&str, Vec<f64>> = triggers
            .iter()
            .map(|t| (*t, vocab.vectorize(t)))
            .collect();
        let relevance: HashMap<&str, f64> = triggers
            .iter()
            .map(|t| (*t, kb.relevance_of(t).unwrap_or(FALLBACK_RELEVANCE)))
            .collect();

        let initial = self.params;
        let mut trained = ScoringModel::new(initial);
        let lr = options.learning_rate;
        let mut epoch_losses = Vec::with_capacity(options.epochs);

        for epoch in 0..options.epochs {
            rng.shuffle(&mut samples);
            let mut total_loss = 0.0;

            for sample in &samples {
                let sim = match (vectors.get(sample.input.as_str()), vectors.get(sample.target.as_str())) {
                    (Some(a), Some(b)) => cosine_similarity(a, b),
                    _ => 0.0,
                };
                let rel = relevance
                    .get(sample.target.as_str())
                    .copied()
                    .unwrap_or(FALLBACK_RELEVANCE);

                let z = trained.linear(sim, rel);
                let error = leaky_relu(z) - sample.label;
                let gradient = error * leaky_relu_derivative(z);

                trained.params.w1 -= lr * gradient * sim;
                trained.params.w2 -= lr * gradient * rel;
                trained.params.bias -= lr * gradient;

                total_loss += error * error;
            }

            let mean_loss = total_loss / samples.len() as f64;
            epoch_losses.push(mean_loss);

            if options.log_every > 0 && (epoch + 1) % options.log_every == 0 {
                log::info!("Epoch {} | mean loss: {:.6}", epoch + 1, mean_loss);
            }
        }

        if !trained.params.is_finite() {
            log::warn!("Training diverged, keeping previous weights");
            return Err(ResponderError::TrainingDiverged {
                epochs: options.epochs,
            });
        }
        self.params = trained.params;

        log::info!(
            "Training complete: w1={:.4}, w2={:.4}, b={:.4}",
            self.params.w1,
            self.params.w2,
            self.params.bias
        );

        Ok(TrainingReport {
            epochs: options.epochs,
            samples: samples.len(),
            epoch_losses,
            initial,
            weights: self.params,
        })
    }
}

/// Synthesize the training set: one exact-match positive per trigger, plus
/// similar pairs among the first `pair_limit` triggers.
pub fn build_training_set(
    kb: &KnowledgeBase,
    similarity: &SimilarityEngine,
    options: &TrainingOptions,
) -> Vec<TrainingSample> {
    let vocab = kb.vocabulary();
    let triggers = kb.distinct_triggers();

    let mut samples: Vec<TrainingSample> = triggers
        .iter()
        .map(|t| TrainingSample {
            input: t.to_string(),
            target: t.to_string(),
            label: 1.0,
        })
        .collect();

    let limit = triggers.len().min(options.pair_limit);
    for i in 0..limit {
        for j in (i + 1)..limit {
            let (a, b) = (triggers[i], triggers[j]);
            let sim = similarity.similarity(a, b, &vocab);
            if sim > options.pair_threshold {
                samples.push(TrainingSample {
                    input: a.to_string(),
                    target: b.to_string(),
                    label: sim,
                });
            }
        }
    }

    samples
}
