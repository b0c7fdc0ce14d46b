use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cafebot::chat::ChatService;
use cafebot::cli;
use cafebot::config::AppConfig;
use cafebot::index::IndexAccessor;
use cafebot::provider::Provider;

#[derive(Parser, Debug)]
#[command(name = "query")]
#[command(about = "Query the cafe RAG index")]
struct Cli {
    /// Your question, e.g. "What are vegan options under $6?"
    question: String,
    /// Disable the LLM and print retrieved context only.
    #[arg(long, default_value_t = false)]
    no_llm: bool,
    /// Number of chunks to retrieve.
    #[arg(long, default_value_t = 3)]
    k: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Cli::parse();

    let config = AppConfig::from_env()?;
    let provider = Provider::resolve(&config);
    let chat = ChatService::new(
        Arc::new(provider),
        IndexAccessor::from_persist_dir(config.persist_dir.clone()),
    );

    cli::run(
        &chat,
        &args.question,
        !args.no_llm,
        args.k,
        &mut std::io::stdout(),
    )
    .await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
