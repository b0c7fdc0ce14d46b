use std::sync::Arc;

use anyhow::Result;

use crate::backend::{BackendSelector, Backends, CompletionBackend};
use crate::index::{IndexAccessor, VectorIndex};
use crate::models::{
    ChatRequest, ChatResponse, RetrievalResult, SourceNode, LLM_DISABLED_ANSWER,
    LLM_UNAVAILABLE_ANSWER,
};
use crate::synth::CompactSynthesizer;

pub const SYSTEM_PREFIX: &str = "You are a helpful cafe menu assistant. \
Always answer in natural sentences, not just numbers. \
List item names with their prices clearly. \
If nothing matches, say it's not available.";

/// Output of the generate-and-cite path.
#[derive(Debug, Clone)]
pub struct Generated {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
}

#[derive(Clone)]
pub struct ChatService {
    selector: Arc<dyn BackendSelector>,
    index: IndexAccessor,
    synthesizer: CompactSynthesizer,
}

impl ChatService {
    pub fn new(selector: Arc<dyn BackendSelector>, index: IndexAccessor) -> Self {
        Self {
            selector,
            index,
            synthesizer: CompactSynthesizer::default(),
        }
    }

    pub fn index(&self) -> &IndexAccessor {
        &self.index
    }

    /// Backends for one request; the completion backend is present iff `use_llm`.
    pub fn configure(&self, use_llm: bool) -> Result<Backends> {
        self.selector.configure(use_llm)
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatResponse> {
        let backends = self.configure(request.use_llm)?;
        let index = self.index.get().await?;

        let Some(llm) = backends.completion.clone() else {
            tracing::debug!(k = request.k, "retrieval-only chat request");
            let results = self
                .retrieve(&index, &backends, &request.question, request.k)
                .await?;
            return Ok(to_response(LLM_DISABLED_ANSWER.to_string(), &results));
        };

        tracing::debug!(
            k = request.k,
            llm = %llm.name(),
            model = %llm.model(),
            "generating chat answer"
        );
        match self
            .generate(&index, &backends, llm.as_ref(), &request.question, request.k)
            .await
        {
            Ok(generated) => Ok(to_response(generated.answer, &generated.sources)),
            Err(err) => {
                tracing::warn!("llm call failed, falling back to retrieval-only: {err:#}");
                let results = self
                    .retrieve(&index, &backends, &request.question, request.k)
                    .await?;
                Ok(to_response(LLM_UNAVAILABLE_ANSWER.to_string(), &results))
            }
        }
    }

    /// Top-`k` chunks for `question`, without touching the language model.
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        backends: &Backends,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let embedding = backends.embedding.embed_query(question).await?;
        index.search(&embedding, k)
    }

    /// Retrieves with the persona-prefixed query and synthesizes an answer from the hits.
    pub async fn generate(
        &self,
        index: &VectorIndex,
        backends: &Backends,
        llm: &dyn CompletionBackend,
        question: &str,
        k: usize,
    ) -> Result<Generated> {
        let query = generation_query(question);
        let sources = self.retrieve(index, backends, &query, k).await?;

        let texts: Vec<&str> = sources.iter().map(|r| r.chunk.text.as_str()).collect();
        let answer = self.synthesizer.synthesize(llm, &query, &texts).await?;

        Ok(Generated {
            answer: answer.trim().to_string(),
            sources,
        })
    }
}

pub fn generation_query(question: &str) -> String {
    format!("{SYSTEM_PREFIX}\n\nUser: {question}")
}

fn to_response(answer: String, results: &[RetrievalResult]) -> ChatResponse {
    ChatResponse {
        answer,
        sources: results.iter().map(SourceNode::from_result).collect(),
    }
}
