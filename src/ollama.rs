use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::backend::{CompletionBackend, EmbeddingBackend};

/// Local model processes can take minutes to load on first use.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
pub const KEEP_ALIVE: &str = "10m";

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ollama http client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        // Newer Ollama releases use /api/embed, while older versions only know /api/embeddings.
        match self.embed_modern(model, input).await? {
            Some(vector) => Ok(vector),
            None => {
                tracing::debug!("ollama /api/embed not available, using /api/embeddings");
                self.embed_legacy(model, input).await.with_context(|| {
                    format!(
                        "ollama /api/embed is missing and /api/embeddings failed; \
                         ensure the embedding model is pulled (e.g. `ollama pull {model}`)"
                    )
                })
            }
        }
    }

    /// `Ok(None)` when the server has no `/api/embed` route.
    async fn embed_modern(&self, model: &str, text: &str) -> Result<Option<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbedReq { model, input: text })
            .send()
            .await
            .context("failed to call ollama embed endpoint")?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let detail = normalize_err_body(&body);
            // A 404 about the model itself comes from a server that does have the route.
            let route_missing =
                matches!(status, StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED)
                    && !detail.contains("model");
            if route_missing {
                return Ok(None);
            }
            anyhow::bail!("ollama /api/embed returned {status}: {detail}");
        }

        let response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode ollama /api/embed response")?;

        response
            .embeddings
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("ollama /api/embed returned empty embeddings array"))
    }

    async fn embed_legacy(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbeddingReq {
                model,
                prompt: text,
            })
            .send()
            .await
            .context("failed to call ollama embeddings endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "ollama /api/embeddings returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<EmbeddingResp>()
            .await
            .context("failed to decode ollama embeddings response")?;

        Ok(response.embedding)
    }

    pub async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        keep_alive: &str,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct GenerateReq<'a> {
            model: &'a str,
            prompt: &'a str,
            stream: bool,
            keep_alive: &'a str,
            options: GenerateOptions,
        }

        #[derive(Serialize)]
        struct GenerateOptions {
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct GenerateResp {
            response: String,
        }

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&GenerateReq {
                model,
                prompt,
                stream: false,
                keep_alive,
                options: GenerateOptions { temperature },
            })
            .send()
            .await
            .context("failed to call ollama generate endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "ollama /api/generate returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<GenerateResp>()
            .await
            .context("failed to decode ollama generate response")?;

        Ok(response.response.trim().to_string())
    }
}

pub struct OllamaEmbedding {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedding {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            anyhow::bail!("ollama embedding model name is empty");
        }
        Ok(Self { client, model })
    }

    pub fn timeout(&self) -> Duration {
        self.client.timeout()
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedding {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(&self.model, text).await
    }
}

pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
    temperature: f32,
    keep_alive: String,
}

impl OllamaLlm {
    pub fn new(
        client: OllamaClient,
        model: impl Into<String>,
        temperature: f32,
        keep_alive: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            anyhow::bail!("ollama llm model name is empty");
        }
        Ok(Self {
            client,
            model,
            temperature,
            keep_alive: keep_alive.into(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.client.timeout()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn keep_alive(&self) -> &str {
        &self.keep_alive
    }
}

#[async_trait]
impl CompletionBackend for OllamaLlm {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.client
            .generate_text(&self.model, prompt, self.temperature, &self.keep_alive)
            .await
    }
}

pub(crate) fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
        if let Some(err) = json.pointer("/error/message").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
