use std::io::Write;

use anyhow::{Context, Result};

use crate::chat::{ChatService, Generated};
use crate::index::VectorIndex;
use crate::models::{preview, RetrievalResult};

pub const SOURCE_PREVIEW_CHARS: usize = 120;

const NO_LLM_HINT: &str =
    "(LLM is disabled; run without --no-llm once you have a local Ollama LLM running.)";

/// Answers one question for the `query` binary, writing plain text to `out`.
///
/// Only embedding setup, index loading and retrieval are fatal. Anything that goes
/// wrong on the language-model side, including building its client, is reported
/// inline and followed by the retrieved chunks.
pub async fn run<W: Write>(
    chat: &ChatService,
    question: &str,
    use_llm: bool,
    k: usize,
    out: &mut W,
) -> Result<()> {
    let backends = chat.configure(false)?;
    let index = chat.index().get().await?;

    if !use_llm {
        let results = chat.retrieve(&index, &backends, question, k).await?;
        writeln!(out, "\nTop retrieved chunks:")?;
        write_chunks(out, &results)?;
        writeln!(out, "\n{NO_LLM_HINT}")?;
        return Ok(());
    }

    match try_generate(chat, &index, question, k).await {
        Ok(generated) => write_answer(out, &generated)?,
        Err(err) => {
            tracing::debug!("llm call failed, falling back to retrieval-only: {err:#}");
            writeln!(out, "\nWarning: LLM call failed. Details:\n {err:#}")?;
            writeln!(out, "Falling back to retrieval-only...\n")?;
            let results = chat.retrieve(&index, &backends, question, k).await?;
            write_chunks(out, &results)?;
        }
    }

    Ok(())
}

async fn try_generate(
    chat: &ChatService,
    index: &VectorIndex,
    question: &str,
    k: usize,
) -> Result<Generated> {
    let backends = chat.configure(true)?;
    let llm = backends
        .completion
        .clone()
        .context("no language model configured")?;
    chat.generate(index, &backends, llm.as_ref(), question, k).await
}

fn write_answer<W: Write>(out: &mut W, generated: &Generated) -> Result<()> {
    writeln!(out, "\nAnswer:\n")?;
    writeln!(out, "{}", generated.answer)?;
    if !generated.sources.is_empty() {
        writeln!(out, "\nSources:")?;
        for source in &generated.sources {
            writeln!(
                out,
                "- score={:.3} | {}",
                source.score.unwrap_or_default(),
                preview(&source.chunk.text, SOURCE_PREVIEW_CHARS)
            )?;
        }
    }
    Ok(())
}

fn write_chunks<W: Write>(out: &mut W, results: &[RetrievalResult]) -> Result<()> {
    for (i, result) in results.iter().enumerate() {
        writeln!(out, "\n[{}] -----------------------------", i + 1)?;
        writeln!(out, "{}", result.chunk.text)?;
    }
    Ok(())
}
