use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use cafebot::chat::ChatService;
use cafebot::index::IndexAccessor;
use cafebot::provider::Provider;
use cafebot::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let provider = Provider::resolve(&config);
    tracing::info!(
        configured = %config.provider_name,
        active = provider.kind().as_str(),
        llm = provider.llm_model(),
        embed = provider.embed_model(),
        "provider set"
    );

    let index = IndexAccessor::from_persist_dir(config.persist_dir.clone());
    if let Err(err) = index.get().await {
        tracing::warn!("index not loaded at startup: {}", err);
    }

    let chat = ChatService::new(Arc::new(provider), index);
    run_server(config, chat).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
