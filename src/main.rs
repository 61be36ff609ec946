//! gmail-batch-mcp-rs: Gmail label batch MCP server
//!
//! This server applies label changes to large sets of Gmail messages via the
//! Model Context Protocol (MCP), over stdio or streamable HTTP. Batches are
//! chunked, paced, verified, and retried per message, and every message gets
//! its own outcome in the result.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and transport selection
//! - [`config`]: Environment-driven configuration for accounts and server settings
//! - [`errors`]: Application error model with MCP error mapping
//! - [`labels`]: Label change flags and conflict-free delta resolution
//! - [`gateway`]: Mail service contract and failure classification
//! - [`gmail`]: Gmail REST v1 implementation of the gateway
//! - [`scheduler`]: Chunk planning and inter-chunk pacing
//! - [`executor`]: Per-chunk pre-validate/apply/verify/retry state machine
//! - [`report`]: Outcome accumulation and the batch report
//! - [`server`]: MCP tool handlers with validation and orchestration
//! - [`models`]: Input/output DTOs and schema-bearing types

mod config;
mod errors;
mod executor;
mod gateway;
mod gmail;
mod labels;
mod models;
mod report;
mod scheduler;
mod server;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use server::GmailBatchServer;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line options; everything else comes from the environment
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Serve streamable HTTP on this address instead of stdio
    #[arg(long)]
    http: Option<SocketAddr>,

    /// Mount path for the HTTP endpoint
    #[arg(long, default_value = "/mcp")]
    http_path: String,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over stdio (the default, for clients that spawn the process) or
/// streamable HTTP when `--http` is given.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// GMAIL_MCP_DEFAULT_ACCESS_TOKEN=ya29.a0Af... \
/// GMAIL_MCP_WRITE_ENABLED=true \
/// cargo run -- --http 127.0.0.1:3333
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;
    info!(
        accounts = config.accounts.len(),
        write_enabled = config.write_enabled,
        "configuration loaded"
    );
    let server = GmailBatchServer::new(config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
            shutdown.cancel();
        }
    });

    match cli.http {
        Some(addr) => serve_http(server, addr, &cli.http_path, shutdown).await,
        None => serve_stdio(server, shutdown).await,
    }
}

async fn serve_stdio(
    server: GmailBatchServer,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = server.serve(stdio()).await?;
    let cancel = service.cancellation_token();
    let mut waiting = Box::pin(service.waiting());

    tokio::select! {
        result = &mut waiting => {
            result?;
        }
        _ = shutdown.cancelled() => {
            cancel.cancel();
            let _ = waiting.await;
        }
    }
    Ok(())
}

async fn serve_http(
    server: GmailBatchServer,
    addr: SocketAddr,
    path: &str,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    };

    let mut http_config = StreamableHttpServerConfig::default();
    http_config.stateful_mode = false;
    let service: StreamableHttpService<GmailBatchServer, LocalSessionManager> =
        StreamableHttpService::new(move || Ok(server.clone()), Arc::default(), http_config);

    let router = axum::Router::new().nest_service(path.as_str(), service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, path = %path, "serving MCP over streamable HTTP");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("MCP server stopped");
    Ok(())
}
