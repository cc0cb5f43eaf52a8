//! # authrelay
//!
//! Auth event relay binary: loads settings, builds the identity provider
//! client, and serves the SSE relay until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use authrelay_core::logging::{self, LogFormat};
use authrelay_server::{EventRelay, RelayConfig, RelayServer, ServerConfig};
use authrelay_settings::AuthRelaySettings;
use authrelay_upstream::{HttpIdentityProvider, UpstreamConfig};
use clap::Parser;

/// Auth event relay server.
#[derive(Parser, Debug)]
#[command(name = "authrelay", about = "Relay identity provider session events to SSE subscribers")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.authrelay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Identity provider base URL (overrides settings).
    #[arg(long)]
    upstream_url: Option<String>,

    /// Log filter directive (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, settings: &mut AuthRelaySettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = self.upstream_url {
            settings.upstream.base_url = url;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

fn upstream_config(settings: &AuthRelaySettings) -> UpstreamConfig {
    let upstream = &settings.upstream;
    UpstreamConfig {
        base_url: upstream.base_url.clone(),
        timeout: Duration::from_millis(upstream.timeout_ms),
        user_agent: upstream.user_agent.clone(),
        accept_invalid_certs: upstream.accept_invalid_certs,
    }
}

fn load(cli: Cli) -> Result<AuthRelaySettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(authrelay_settings::settings_path);
    let mut settings = authrelay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings
        .validate()
        .with_context(|| format!("Invalid settings (file {})", path.display()))?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load(Cli::parse())?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    logging::init_subscriber(&settings.logging.level, format);

    let provider = HttpIdentityProvider::new(&upstream_config(&settings))
        .context("Failed to build identity provider client")?;
    tracing::info!(base_url = %provider.base_url(), "identity provider configured");

    let relay = EventRelay::new(Arc::new(provider), RelayConfig::from_settings(&settings));
    let mut server = RelayServer::new(ServerConfig::from_settings(&settings), relay);
    match authrelay_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled"),
    }
    let server = Arc::new(server);

    let listener = server.bind().await.context("Failed to bind server")?;
    let addr = listener.local_addr().context("Failed to read bound address")?;
    tracing::info!("authrelay listening on http://{addr}");

    let serving = Arc::clone(&server);
    let serve_handle = tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            tracing::error!(error = %e, "server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.graceful_shutdown(vec![serve_handle]).await {
        tracing::warn!("shutdown finished with work still pending");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
