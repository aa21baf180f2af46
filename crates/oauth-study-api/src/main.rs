//! oauth-study-api entry point

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use oauth_study_api::{AppState, router};
use oauth_study_auth::config::ResourceServerConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Protected resource server for the OAuth study realm
#[derive(Parser, Debug)]
#[command(name = "oauth-study-api", version, about, author)]
struct Cli {
    /// Configuration file (.toml, .yaml or .json); environment variables override it
    #[arg(short, long, env = "API_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (-v, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// `RUST_LOG` wins over the verbosity flags
    fn init_tracing(&self) {
        let default = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false);

        if self.json_logs {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_tracing();

    let mut config =
        ResourceServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    if config.audience().is_none() {
        warn!("AUDIENCE not set; tokens for any audience of this issuer will be accepted");
    }

    let state = AppState::from_config(&config);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        address = %addr,
        issuer = %config.issuer(),
        jwks_uri = %config.jwks_uri(),
        "Protected API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Protected API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["oauth-study-api", "--port", "4100", "-vv"]).unwrap();
        assert_eq!(cli.port, Some(4100));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.json_logs);
    }
}
