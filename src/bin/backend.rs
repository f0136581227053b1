#![forbid(unsafe_code)]

//! HTTP entry point: loads configuration, picks the retrieval backend and
//! serves the gated API until Ctrl+C.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use whoptube::{
    access::AccessGate,
    api::{AppState, router},
    config::{BackendKind, RuntimeOverrides, resolve_runtime_config},
    retrieval::build_retriever,
};

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Serve the Whop-gated YouTube download API")]
struct BackendArgs {
    /// Address to listen on (overrides WHOPTUBE_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides WHOPTUBE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Retrieval backend: `ytdlp` or `cobalt` (overrides WHOPTUBE_BACKEND).
    #[arg(long, value_parser = parse_backend_arg)]
    backend: Option<BackendKind>,

    /// Directory with the built front-end (overrides WWW_ROOT).
    #[arg(long)]
    www_root: Option<PathBuf>,

    /// Path of the `.env` file to read.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            backend: self.backend,
            www_root: self.www_root,
            env_path: self.env_file,
        }
    }
}

fn parse_backend_arg(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value).map_err(|err| err.to_string())
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/WHOPTUBE_HOST")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = resolve_runtime_config(BackendArgs::parse().into_overrides())?;
    let host = parse_host(&config.host)?;

    let retriever = build_retriever(&config);
    let state = AppState {
        retriever: retriever.clone(),
        gate: Arc::new(AccessGate::for_whop(config.identity.clone())),
        www_root: config.www_root.clone().map(Arc::new),
    };
    let app = router(state);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(
        %addr,
        backend = retriever.name(),
        www_root = ?config.www_root,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
