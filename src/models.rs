use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const LLM_DISABLED_ANSWER: &str = "(LLM disabled — showing top results)";
pub const LLM_UNAVAILABLE_ANSWER: &str = "(LLM unavailable — showing top results)";
pub const PREVIEW_CHARS: usize = 160;

/// A persisted text node together with its embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_true")]
    pub use_llm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceNode {
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub preview: String,
}

impl SourceNode {
    pub fn from_result(result: &RetrievalResult) -> Self {
        Self {
            score: result.score,
            metadata: result.chunk.metadata.clone(),
            preview: preview(&result.chunk.text, PREVIEW_CHARS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthResponse {
    Ok {
        provider: String,
        llm: String,
        embed: String,
    },
    Error {
        detail: String,
        provider: String,
    },
}

/// First `max_chars` characters of `text` on a single line.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

fn default_k() -> usize {
    3
}

fn default_true() -> bool {
    true
}
