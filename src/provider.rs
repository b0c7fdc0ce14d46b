use std::sync::Arc;

use anyhow::Result;

use crate::backend::{BackendSelector, Backends, CompletionBackend, EmbeddingBackend};
use crate::config::{AppConfig, OllamaConfig, OpenAiConfig};
use crate::ollama::{self, OllamaClient, OllamaEmbedding, OllamaLlm};
use crate::openai::{self, OpenAiClient, OpenAiEmbedding, OpenAiLlm};

const TEMPERATURE: f32 = 0.2;

/// Provider selector as written in `PROVIDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "hosted" => ProviderKind::OpenAi,
            "ollama" | "local" => ProviderKind::Ollama,
            other => {
                tracing::warn!("unknown PROVIDER {:?}, using ollama", other);
                ProviderKind::Ollama
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
        }
    }
}

/// The provider actually used for inference.
///
/// Hosted is only chosen when it is selected *and* an API key is configured;
/// otherwise everything runs against the local model server.
#[derive(Clone, Debug)]
pub enum Provider {
    Local(OllamaConfig),
    Hosted { config: OpenAiConfig, api_key: String },
}

impl Provider {
    pub fn resolve(config: &AppConfig) -> Self {
        match (config.provider, config.openai.api_key.as_ref()) {
            (ProviderKind::OpenAi, Some(key)) => Provider::Hosted {
                config: config.openai.clone(),
                api_key: key.clone(),
            },
            (ProviderKind::OpenAi, None) => {
                tracing::warn!("PROVIDER=openai but OPENAI_API_KEY is not set, using ollama");
                Provider::Local(config.ollama.clone())
            }
            (ProviderKind::Ollama, _) => Provider::Local(config.ollama.clone()),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Local(_) => ProviderKind::Ollama,
            Provider::Hosted { .. } => ProviderKind::OpenAi,
        }
    }

    pub fn llm_model(&self) -> &str {
        match self {
            Provider::Local(config) => &config.llm_model,
            Provider::Hosted { config, .. } => &config.llm_model,
        }
    }

    pub fn embed_model(&self) -> &str {
        match self {
            Provider::Local(config) => &config.embed_model,
            Provider::Hosted { config, .. } => &config.embed_model,
        }
    }

    fn embedding(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        let backend: Arc<dyn EmbeddingBackend> = match self {
            Provider::Local(config) => Arc::new(local_embedding(config)?),
            Provider::Hosted { config, api_key } => Arc::new(hosted_embedding(config, api_key)?),
        };
        Ok(backend)
    }

    fn completion(&self) -> Result<Arc<dyn CompletionBackend>> {
        let backend: Arc<dyn CompletionBackend> = match self {
            Provider::Local(config) => Arc::new(local_llm(config)?),
            Provider::Hosted { config, api_key } => Arc::new(hosted_llm(config, api_key)?),
        };
        Ok(backend)
    }
}

fn local_embedding(config: &OllamaConfig) -> Result<OllamaEmbedding> {
    let client = OllamaClient::new(config.base_url.clone(), ollama::REQUEST_TIMEOUT)?;
    OllamaEmbedding::new(client, config.embed_model.clone())
}

fn local_llm(config: &OllamaConfig) -> Result<OllamaLlm> {
    let client = OllamaClient::new(config.base_url.clone(), ollama::REQUEST_TIMEOUT)?;
    OllamaLlm::new(
        client,
        config.llm_model.clone(),
        TEMPERATURE,
        ollama::KEEP_ALIVE,
    )
}

fn hosted_embedding(config: &OpenAiConfig, api_key: &str) -> Result<OpenAiEmbedding> {
    let client = OpenAiClient::new(config.base_url.clone(), api_key, openai::REQUEST_TIMEOUT)?;
    OpenAiEmbedding::new(client, config.embed_model.clone())
}

fn hosted_llm(config: &OpenAiConfig, api_key: &str) -> Result<OpenAiLlm> {
    let client = OpenAiClient::new(config.base_url.clone(), api_key, openai::REQUEST_TIMEOUT)?;
    OpenAiLlm::new(client, config.llm_model.clone(), TEMPERATURE)
}

impl BackendSelector for Provider {
    fn configure(&self, use_llm: bool) -> Result<Backends> {
        let embedding = self.embedding()?;
        let completion = if use_llm {
            Some(self.completion()?)
        } else {
            None
        };

        Ok(Backends {
            embedding,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::Router;
    use serde_json::json;

    use super::*;
    use crate::backend::testing::{serve, Recorder};

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn selector_parsing_is_case_insensitive() {
        assert_eq!(ProviderKind::parse("OPENAI"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse("hosted"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse(" Ollama "), ProviderKind::Ollama);
        assert_eq!(ProviderKind::parse("something-else"), ProviderKind::Ollama);
    }

    #[test]
    fn retrieval_only_never_has_a_completion_backend() {
        let cases = [
            config_from(&[]),
            config_from(&[("PROVIDER", "openai")]),
            config_from(&[("PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]),
            config_from(&[("OPENAI_API_KEY", "sk-test")]),
        ];

        for config in cases {
            let backends = Provider::resolve(&config).configure(false).unwrap();
            assert!(backends.completion.is_none());
            assert!(backends.retrieval_only());
        }
    }

    #[test]
    fn hosted_requires_selector_and_key() {
        let config = config_from(&[("PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]);
        let backends = Provider::resolve(&config).configure(true).unwrap();
        assert_eq!(backends.embedding.name(), "openai");
        assert_eq!(backends.embedding.model(), "text-embedding-3-small");
        let completion = backends.completion.expect("completion backend");
        assert_eq!(completion.name(), "openai");
        assert_eq!(completion.model(), "gpt-4o-mini");

        let keyless = config_from(&[("PROVIDER", "openai")]);
        let backends = Provider::resolve(&keyless).configure(true).unwrap();
        assert_eq!(backends.embedding.name(), "ollama");
        assert_eq!(backends.completion.unwrap().name(), "ollama");

        let key_only = config_from(&[("OPENAI_API_KEY", "sk-test")]);
        assert_eq!(Provider::resolve(&key_only).kind(), ProviderKind::Ollama);
    }

    #[test]
    fn bare_environment_resolves_to_local_backends() {
        let provider = Provider::resolve(&config_from(&[]));
        assert!(matches!(provider, Provider::Local(_)));

        let backends = provider.configure(true).unwrap();
        assert_eq!(backends.embedding.name(), "ollama");
        assert_eq!(backends.embedding.model(), "nomic-embed-text");
        let completion = backends.completion.unwrap();
        assert_eq!(completion.name(), "ollama");
        assert_eq!(completion.model(), "llama3.2:3b");
    }

    #[test]
    fn malformed_model_name_propagates() {
        let config = config_from(&[("OLLAMA_LLM", "  ")]);
        let provider = Provider::resolve(&config);
        assert!(provider.configure(false).is_ok());
        assert!(provider.configure(true).is_err());
    }

    #[test]
    fn local_backends_wait_ten_minutes_and_keep_models_loaded() {
        let config = config_from(&[]);
        let llm = local_llm(&config.ollama).unwrap();
        assert_eq!(llm.timeout(), Duration::from_secs(600));
        assert_eq!(llm.keep_alive(), "10m");
        assert_eq!(llm.temperature(), 0.2);
        assert_eq!(
            local_embedding(&config.ollama).unwrap().timeout(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn hosted_backends_time_out_after_a_minute() {
        let config = config_from(&[]);
        let llm = hosted_llm(&config.openai, "sk-test").unwrap();
        assert_eq!(llm.timeout(), Duration::from_secs(60));
        assert_eq!(llm.temperature(), 0.2);
        assert_eq!(
            hosted_embedding(&config.openai, "sk-test").unwrap().timeout(),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn hosted_requests_carry_key_and_temperature() {
        let recorder = Recorder::default();
        let router = recorder.route(
            Router::new(),
            "/embeddings",
            StatusCode::OK,
            json!({"data": [{"embedding": [1.0, 0.0]}]}),
        );
        let router = recorder.route(
            router,
            "/chat/completions",
            StatusCode::OK,
            json!({"choices": [{"message": {"content": "ok"}}]}),
        );
        let base = serve(router).await;
        let config = config_from(&[
            ("PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", base.as_str()),
        ]);

        let backends = Provider::resolve(&config).configure(true).unwrap();
        backends.embedding.embed_query("menu").await.unwrap();
        backends.completion.unwrap().complete("prompt").await.unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|call| call.headers["authorization"] == "Bearer sk-test"));
        assert_eq!(calls[0].body["model"], "text-embedding-3-small");
        assert_eq!(calls[1].body["model"], "gpt-4o-mini");
        assert_eq!(calls[1].body["temperature"], 0.2);
    }

    #[tokio::test]
    async fn local_requests_carry_keep_alive_and_temperature() {
        let recorder = Recorder::default();
        let router = recorder.route(
            Router::new(),
            "/api/embed",
            StatusCode::OK,
            json!({"embeddings": [[1.0, 0.0]]}),
        );
        let router = recorder.route(
            router,
            "/api/generate",
            StatusCode::OK,
            json!({"response": "ok"}),
        );
        let base = serve(router).await;
        let config = config_from(&[("OLLAMA_BASE_URL", base.as_str())]);

        let backends = Provider::resolve(&config).configure(true).unwrap();
        backends.embedding.embed_query("menu").await.unwrap();
        backends.completion.unwrap().complete("prompt").await.unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].body["model"], "nomic-embed-text");
        assert!(calls[0].headers.get("authorization").is_none());
        assert_eq!(calls[1].body["model"], "llama3.2:3b");
        assert_eq!(calls[1].body["keep_alive"], "10m");
        assert_eq!(calls[1].body["options"]["temperature"], 0.2);
    }
}
