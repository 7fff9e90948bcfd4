//! Binary entry point: parses CLI flags, builds the typed `Config`, spawns
//! `AegisApp`, wires the HTTP router, and runs the gateway alongside the
//! anchor worker until a shutdown signal arrives.
//!
//! Keeps a thin `main` and a fat `state.rs`, with an `argh` subcommand
//! surface trimmed down to the one flag this system actually needs.

mod admin;
mod anchor;
mod config;
mod errors;
mod gateway;
mod identity;
mod jsonrpc;
mod policy;
mod state;

use std::sync::Arc;

use argh::FromArgs;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tokio::sync::watch;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::jsonrpc::{JsonRpcForwardedResponseEnum, JsonRpcRequestEnum};
use crate::state::AegisApp;

#[derive(FromArgs)]
/// aegis-firewall: an economic firewall proxy for autonomous agent signers
struct Cli {
    /// print the parsed configuration (with secrets redacted) and exit
    #[argh(switch)]
    check_config: bool,
}

async fn rpc_handler(
    Extension(app): Extension<Arc<AegisApp>>,
    headers: HeaderMap,
    Json(payload): Json<JsonRpcRequestEnum>,
) -> Json<JsonRpcForwardedResponseEnum> {
    Json(gateway::proxy_rpc(app, headers, payload).await)
}

fn build_router(app: Arc<AegisApp>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/admin/health", get(admin::health))
        .route("/admin/policy/:user/:agent", get(admin::policy))
        .route("/admin/anchor", post(admin::trigger_anchor))
        .layer(Extension(app))
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveHeadersLayer::new([axum::http::header::AUTHORIZATION]))
}

/// Waits for either ctrl-c or, on unix, a SIGTERM — whichever arrives first.
/// The signal an orchestrator (systemd, k8s) actually sends on a graceful
/// stop, not just the one a developer hits at a terminal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli: Cli = argh::from_env();
    let config = Config::from_env()?;

    if cli.check_config {
        println!("{config:#?}");
        return Ok(());
    }

    let (app, _metrics_recorder) = AegisApp::spawn(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let anchor_handle = tokio::spawn(anchor::run_periodic(app.clone(), shutdown_rx));

    let router = build_router(app.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], app.config.listen_port));
    info!(%addr, "aegis-firewall listening");

    let server = axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        warn!(?err, "http server exited with an error");
    }

    // tell the anchor worker to wind down, then wait for it: mid-batch it
    // finishes the current recordSpend wait, mid-sleep it wakes immediately.
    let _ = shutdown_tx.send(true);
    if let Err(err) = anchor_handle.await {
        warn!(?err, "anchor worker task panicked");
    }

    Ok(())
}
