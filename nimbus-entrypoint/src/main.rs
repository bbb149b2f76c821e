//! Nimbus Entry Point
//!
//! Accepts users, asks every configured cloud site whether it will take them,
//! and redirects each user to the cheapest site that meets the latency SLA.

#![deny(missing_docs)]

mod config;
mod server;
mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nimbus_core::Router;

use crate::config::GatewayConfig;

/// Multi-cloud entry point.
#[derive(Debug, Parser)]
#[command(name = "nimbus-entrypoint", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON).
    #[arg(short, long, env = "NIMBUS_CONFIG", default_value = "nimbus.json")]
    config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

/// The primary entrypoint for the Nimbus entry point.
///
/// Loads the configuration, builds the sites and serves until interrupted.
/// On Unix, `SIGHUP` reloads the routing part of the configuration.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::from_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let table = config
        .routing
        .build_table()
        .context("building the routing table")?;
    let router = Arc::new(Router::with_table(table));

    let tls_acceptor = match &config.tls {
        Some(files) => Some(tls::acceptor(&files.cert, &files.key).context("loading TLS material")?),
        None => None,
    };

    let addr = cli.listen.unwrap_or(config.listen);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tokio::spawn(reload_on_hangup(cli.config.clone(), Arc::clone(&router)));

    tokio::select! {
        served = server::start_server(listener, tls_acceptor, Arc::clone(&router)) => {
            served.context("entry point server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    router.close();
    Ok(())
}

/// Rebuild the routing table from `path` and install it.
///
/// Reading the file and resolving site hosts both block, so the table is
/// built on the blocking pool. A file that fails to load leaves the running
/// configuration in place.
async fn reload(path: PathBuf, router: &Router) {
    let source = path.clone();
    let built = tokio::task::spawn_blocking(move || {
        GatewayConfig::from_path(&source).and_then(|config| config.routing.build_table())
    })
    .await;

    match built {
        Ok(Ok(table)) => router.configure(table),
        Ok(Err(e)) => {
            tracing::error!(path = %path.display(), error = %e, "reload failed, keeping the current configuration")
        }
        Err(e) => tracing::error!(path = %path.display(), error = %e, "reload task did not complete"),
    }
}

#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, router: Arc<Router>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGHUP, reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        tracing::info!(path = %path.display(), "reloading configuration");
        reload(path.clone(), &router).await;
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_path: PathBuf, _router: Arc<Router>) {}
