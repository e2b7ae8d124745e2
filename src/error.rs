//! Error types for the responder pipeline

use std::time::Duration;

pub type Result<T> = std::result::Result<T, ResponderError>;

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("knowledge base has no triggers to train on")]
    EmptyTrainingSet,

    #[error("training diverged: weights became non-finite after {epochs} epochs")]
    TrainingDiverged { epochs: usize },

    #[error("scoring produced a non-finite value for trigger {trigger:?}")]
    NonFiniteScore { trigger: String },

    #[error("search timed out after {0:?}")]
    SearchTimeout(Duration),

    #[error("search failed: {0}")]
    Search(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid knowledge table: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
