use anyhow::Result;

use crate::backend::CompletionBackend;

pub const CONTEXT_WINDOW_TOKENS: usize = 3900;
pub const NUM_OUTPUT_TOKENS: usize = 256;
pub const EMPTY_RESPONSE: &str = "Empty Response";

const CHARS_PER_TOKEN: usize = 4;
const MIN_CONTEXT_CHARS: usize = 256;

const TEXT_QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query_str}\n\
Answer: ";

const REFINE_TEMPLATE: &str = "The original query is as follows: {query_str}\n\
We have provided an existing answer: {existing_answer}\n\
We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
------------\n\
{context_msg}\n\
------------\n\
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.\n\
Refined Answer: ";

/// "Compact" response synthesis: stuff as many retrieved chunks as fit into
/// each prompt, answer from the first pack and refine with the rest.
#[derive(Clone, Debug)]
pub struct CompactSynthesizer {
    max_prompt_chars: usize,
}

impl Default for CompactSynthesizer {
    fn default() -> Self {
        Self::new(CONTEXT_WINDOW_TOKENS, NUM_OUTPUT_TOKENS)
    }
}

impl CompactSynthesizer {
    pub fn new(context_window_tokens: usize, num_output_tokens: usize) -> Self {
        Self {
            max_prompt_chars: context_window_tokens.saturating_sub(num_output_tokens)
                * CHARS_PER_TOKEN,
        }
    }

    pub async fn synthesize(
        &self,
        llm: &dyn CompletionBackend,
        query: &str,
        texts: &[&str],
    ) -> Result<String> {
        let packs = self.pack(query, texts);
        let Some((first, rest)) = packs.split_first() else {
            return Ok(EMPTY_RESPONSE.to_string());
        };

        let mut answer = llm.complete(&text_qa_prompt(first, query)).await?;
        for context in rest {
            tracing::debug!("refining answer with next context pack");
            answer = llm
                .complete(&refine_prompt(query, &answer, context))
                .await?;
        }

        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }
        Ok(answer.to_string())
    }

    /// Groups `texts` into as few context blocks as fit the prompt budget.
    pub fn pack(&self, query: &str, texts: &[&str]) -> Vec<String> {
        let budget = self.context_budget(query);
        let mut packs = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;

        for text in texts {
            for piece in split_chars(text, budget) {
                let piece_chars = piece.chars().count();
                if current_chars > 0 && current_chars + 2 + piece_chars > budget {
                    packs.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                if current_chars > 0 {
                    current.push_str("\n\n");
                    current_chars += 2;
                }
                current.push_str(&piece);
                current_chars += piece_chars;
            }
        }

        if !current.is_empty() {
            packs.push(current);
        }
        packs
    }

    fn context_budget(&self, query: &str) -> usize {
        // Refine prompts carry the most scaffolding; size every pack for them.
        let overhead = REFINE_TEMPLATE.len() + query.chars().count() * 2;
        self.max_prompt_chars
            .saturating_sub(overhead)
            .max(MIN_CONTEXT_CHARS)
    }
}

fn text_qa_prompt(context: &str, query: &str) -> String {
    fill_template(
        TEXT_QA_TEMPLATE,
        &[("context_str", context), ("query_str", query)],
    )
}

fn refine_prompt(query: &str, existing_answer: &str, context: &str) -> String {
    fill_template(
        REFINE_TEMPLATE,
        &[
            ("query_str", query),
            ("existing_answer", existing_answer),
            ("context_msg", context),
        ],
    )
}

/// Substitutes `{name}` placeholders in one left-to-right pass; inserted
/// values are never scanned again.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });

        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect::<String>())
        .filter(|piece| !piece.trim().is_empty())
        .collect()
}
