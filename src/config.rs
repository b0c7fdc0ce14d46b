use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::provider::ProviderKind;

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub llm_model: String,
    pub embed_model: String,
}

#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub base_url: String,
    pub llm_model: String,
    pub embed_model: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub persist_dir: PathBuf,
    /// `PROVIDER` as configured, trimmed and lower-cased; reported by `/health`.
    pub provider_name: String,
    pub provider: ProviderKind,
    pub openai: OpenAiConfig,
    pub ollama: OllamaConfig,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    /// Reads settings from the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port_raw = var("PORT", "8000");
        let port = port_raw
            .trim()
            .parse::<u16>()
            .with_context(|| format!("invalid PORT value: {port_raw:?}"))?;

        let api_key = lookup("OPENAI_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let provider_name = var("PROVIDER", "ollama").trim().to_ascii_lowercase();

        Ok(Self {
            persist_dir: PathBuf::from(var("CHROMA_DB_DIR", "./storage")),
            provider: ProviderKind::parse(&provider_name),
            provider_name,
            openai: OpenAiConfig {
                api_key,
                base_url: var("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                llm_model: var("OPENAI_MODEL", "gpt-4o-mini"),
                embed_model: var("OPENAI_EMBED_MODEL", "text-embedding-3-small"),
            },
            ollama: OllamaConfig {
                base_url: var("OLLAMA_BASE_URL", "http://127.0.0.1:11434"),
                llm_model: var("OLLAMA_LLM", "llama3.2:3b"),
                embed_model: var("OLLAMA_EMBED", "nomic-embed-text"),
            },
            host: var("HOST", "0.0.0.0"),
            port,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// LLM model name for the configured provider, as reported by `/health`.
    pub fn llm_model(&self) -> &str {
        match self.provider {
            ProviderKind::OpenAi => &self.openai.llm_model,
            ProviderKind::Ollama => &self.ollama.llm_model,
        }
    }

    pub fn embed_model(&self) -> &str {
        match self.provider {
            ProviderKind::OpenAi => &self.openai.embed_model,
            ProviderKind::Ollama => &self.ollama.embed_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.persist_dir, PathBuf::from("./storage"));
        assert_eq!(config.provider, ProviderKind::Ollama);
        assert_eq!(config.openai.api_key, None);
        assert_eq!(config.ollama.llm_model, "llama3.2:3b");
        assert_eq!(config.ollama.embed_model, "nomic-embed-text");
        assert_eq!(config.openai.llm_model, "gpt-4o-mini");
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn blank_api_key_counts_as_absent() {
        let config = config_from(&[("OPENAI_API_KEY", "   ")]).unwrap();
        assert_eq!(config.openai.api_key, None);
    }

    #[test]
    fn reported_models_follow_the_configured_provider() {
        let config = config_from(&[("PROVIDER", "OpenAI")]).unwrap();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.llm_model(), "gpt-4o-mini");
        assert_eq!(config.embed_model(), "text-embedding-3-small");
    }

    #[test]
    fn provider_name_keeps_the_configured_spelling() {
        let hosted = config_from(&[("PROVIDER", " Hosted ")]).unwrap();
        assert_eq!(hosted.provider_name, "hosted");
        assert_eq!(hosted.provider, ProviderKind::OpenAi);

        let unknown = config_from(&[("PROVIDER", "azure")]).unwrap();
        assert_eq!(unknown.provider_name, "azure");
        assert_eq!(unknown.provider, ProviderKind::Ollama);

        assert_eq!(config_from(&[]).unwrap().provider_name, "ollama");
    }
}
