//! screenassist - screenshot code analysis backend
//!
//! Extracts source code from noisy screen captures with a tiered OCR
//! pipeline, asks a completion backend about it, and logs each interaction
//! for similar-question caching.

mod assist;
mod cleanup;
mod config;
mod error;
mod history;
mod llm;
mod ocr;
mod pipeline;
mod preprocess;
mod server;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = config::AppConfig::from_env();
    log::info!(
        "starting screenassist (model {}, ocr timeout {}s)",
        config.model_id,
        config.ocr_timeout_secs
    );
    if config.anthropic_api_key.is_none() {
        log::warn!("ANTHROPIC_API_KEY is not set; requests will be rejected until it is");
    }

    let chain = ocr::build_chain(&config);
    let pipeline = pipeline::Pipeline::new(chain, &config.cleanup_language, config.debug_ocr_dump);

    let completion = Arc::new(llm::AnthropicClient::new(
        config.anthropic_api_key.clone().unwrap_or_default(),
        config.request_timeout(),
    )?);
    let history = Arc::new(history::JsonlHistoryStore::new(&config.history_path));

    let assist = assist::AssistService::new(pipeline, completion, history, config.clone());
    let state = Arc::new(server::AppState { assist });

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("listening on {}", addr);

    axum::serve(listener, server::router(state))
        .await
        .context("server error")?;
    Ok(())
}
