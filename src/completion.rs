//! Chat-completion envelope
//!
//! Glue between an OpenAI-style chat transcript and the predictor: folds the
//! transcript into the single input string the predictor consumes, and wraps
//! a [`PredictionResult`] in a `chat.completion` shaped value. Transport,
//! authentication and SSE framing live outside this crate.

use crate::types::PredictionResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MODEL: &str = "doubao-v1";

/// One message of a chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Fold a transcript into predictor input.
///
/// The last user message is the question; every message before the final
/// one is prepended as `role: content` context lines. Returns `None` when
/// there is no user message.
pub fn compose_input(messages: &[ChatMessage]) -> Option<String> {
    let last_user = messages.iter().rev().find(|m| m.role == "user")?;

    let history = messages.split_last().map(|(_, rest)| rest).unwrap_or_default();
    let context: Vec<String> = history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect();

    if context.is_empty() {
        Some(last_user.content.clone())
    } else {
        Some(format!("{}\nuser: {}", context.join("\n"), last_user.content))
    }
}

/// Rough token estimate: one token per four chars, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    pub metadata: ResponderMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Responder-specific fields carried next to the standard envelope
#[derive(Debug, Clone, Serialize)]
pub struct ResponderMetadata {
    pub score: f64,
    pub source: String,
    pub response_time_ms: u64,
    pub cached: bool,
}

impl ChatCompletion {
    /// Wrap a prediction for `input` as a non-streamed completion
    pub fn from_prediction(model: &str, input: &str, result: &PredictionResult) -> Self {
        let prompt_tokens = estimate_tokens(input);
        let completion_tokens = estimate_tokens(&result.answer);

        Self {
            id: completion_id(),
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::new("assistant", result.answer.clone()),
                finish_reason: "stop",
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: estimate_tokens(&format!("{input}{}", result.answer)),
            },
            metadata: ResponderMetadata {
                score: result.score,
                source: result.source.clone(),
                response_time_ms: result.response_time.as_millis() as u64,
                cached: result.cached,
            },
        }
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Split an answer into `chat.completion.chunk` values: a role delta, one
/// content delta per `width` chars, then a stop delta.
pub fn stream_chunks(model: &str, result: &PredictionResult, width: usize) -> Vec<ChatCompletionChunk> {
    let id = completion_id();
    let created = chrono::Utc::now().timestamp();
    let chunk = |delta: Delta, finish_reason: Option<&'static str>| ChatCompletionChunk {
        id: id.clone(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };

    let chars: Vec<char> = result.answer.chars().collect();
    let mut out = vec![chunk(
        Delta {
            role: Some("assistant".to_string()),
            content: None,
        },
        None,
    )];
    for piece in chars.chunks(width.max(1)) {
        out.push(chunk(
            Delta {
                role: None,
                content: Some(piece.iter().collect()),
            },
            None,
        ));
    }
    out.push(chunk(Delta::default(), Some("stop")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchPath;

    #[test]
    fn test_single_user_message() {
        let input = compose_input(&[ChatMessage::user("你好")]).unwrap();
        assert_eq!(input, "你好");
    }

    #[test]
    fn test_history_is_prefixed() {
        let messages = vec![
            ChatMessage::new("system", "be nice"),
            ChatMessage::user("first"),
            ChatMessage::new("assistant", "reply"),
            ChatMessage::user("second"),
        ];

        let input = compose_input(&messages).unwrap();
        assert_eq!(
            input,
            "system: be nice\nuser: first\nassistant: reply\nuser: second"
        );
    }

    #[test]
    fn test_no_user_message() {
        assert!(compose_input(&[ChatMessage::new("system", "x")]).is_none());
        assert!(compose_input(&[]).is_none());
    }

    #[test]
    fn test_envelope_shape() {
        let result = PredictionResult::new("您好！", 0.95, "問候", MatchPath::SpecialCase);
        let completion = ChatCompletion::from_prediction(DEFAULT_MODEL, "你好", &result);

        assert!(completion.id.starts_with("chatcmpl-"));
        assert_eq!(completion.choices[0].message.role, "assistant");
        assert_eq!(completion.choices[0].message.content, "您好！");
        assert_eq!(completion.usage.prompt_tokens, 1);
        assert_eq!(completion.usage.total_tokens, 2);

        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["metadata"]["source"], "問候");
    }

    #[test]
    fn test_stream_chunks_cover_answer() {
        let result = PredictionResult::new("abcdefghij", 0.5, "x", MatchPath::KnowledgeBase);
        let chunks = stream_chunks(DEFAULT_MODEL, &result, 4);

        // role + 3 content + stop
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        let text: String = chunks
            .iter()
            .filter_map(|c| c.choices[0].delta.content.clone())
            .collect();
        assert_eq!(text, "abcdefghij");
        assert_eq!(chunks[4].choices[0].finish_reason, Some("stop"));
        assert!(chunks.iter().all(|c| c.id == chunks[0].id));
    }
}
