pub mod backend;
pub mod chat;
pub mod cli;
pub mod config;
pub mod index;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod server;
pub mod synth;

pub use config::AppConfig;
pub use server::run_server;
