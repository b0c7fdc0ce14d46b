use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::backend::{CompletionBackend, EmbeddingBackend};
use crate::ollama::normalize_err_body;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the hosted `/embeddings` and `/chat/completions` API.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            anyhow::bail!("openai api key is empty");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build openai http client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbeddingsReq<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingsResp {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }

        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsReq { model, input })
            .send()
            .await
            .context("failed to call openai embeddings endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "openai /embeddings returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<EmbeddingsResp>()
            .await
            .context("failed to decode openai embeddings response")?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("openai /embeddings returned no data"))
    }

    pub async fn chat(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            temperature: f32,
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&ChatReq {
                model,
                messages: vec![Message {
                    role: "user",
                    content: prompt,
                }],
                temperature,
            })
            .send()
            .await
            .context("failed to call openai chat completions endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "openai /chat/completions returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<ChatResp>()
            .await
            .context("failed to decode openai chat completions response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}

pub struct OpenAiEmbedding {
    client: OpenAiClient,
    model: String,
}

impl OpenAiEmbedding {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            anyhow::bail!("openai embedding model name is empty");
        }
        Ok(Self { client, model })
    }

    pub fn timeout(&self) -> Duration {
        self.client.timeout()
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(&self.model, text).await
    }
}

pub struct OpenAiLlm {
    client: OpenAiClient,
    model: String,
    temperature: f32,
}

impl OpenAiLlm {
    pub fn new(client: OpenAiClient, model: impl Into<String>, temperature: f32) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            anyhow::bail!("openai llm model name is empty");
        }
        Ok(Self {
            client,
            model,
            temperature,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.client.timeout()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

#[async_trait]
impl CompletionBackend for OpenAiLlm {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.client.chat(&self.model, prompt, self.temperature).await
    }
}
