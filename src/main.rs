mod config;
mod embedding;
mod explain;
mod handlers;
mod indexer;
mod mcp;
mod parser;
mod snapshot;
mod vector_db;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use mcp::server::McpServer;

/// Load .env files from multiple locations with priority order:
/// 1. Current working directory (project-specific config)
/// 2. XDG config directory ~/.config/sas-code-context/.env (global default config)
///
/// Variables already set in the environment win over both.
fn load_env_files() {
    let cwd_env = std::env::current_dir().map(|p| p.join(".env")).ok();
    if let Some(path) = cwd_env {
        if path.exists() && dotenv::from_path(&path).is_ok() {
            tracing::debug!("Loaded .env from: {}", path.display());
            return;
        }
    }

    if let Some(config_dir) = get_xdg_config_dir() {
        let xdg_env = config_dir.join("sas-code-context").join(".env");
        if xdg_env.exists() && dotenv::from_path(&xdg_env).is_ok() {
            tracing::debug!("Loaded .env from: {}", xdg_env.display());
            return;
        }
    }

    tracing::debug!("No .env file found, using environment variables only");
}

/// Get XDG config directory, fallback to ~/.config
fn get_xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_files();

    // Logs go to stderr; stdout carries the MCP protocol.
    // Defaults to "error", override with RUST_LOG (e.g. RUST_LOG=sas_code_context_mcp=debug)
    let env_filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("error"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    tracing::info!("Starting SAS Code Context MCP server...");

    let config = Config::from_env()?;
    tracing::info!(
        "Explanations: {:?}/{}, embeddings: {:?}/{}, Milvus at {}",
        config.explain_provider,
        config.explain_model,
        config.embedding_provider,
        config.embedding_model,
        config.milvus_address
    );

    let server = McpServer::new(&config)?;
    server.start().await?;

    Ok(())
}
