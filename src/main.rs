use anyhow::{Context, Result};
use clap::Parser;
use seismic_proxy::services::cache::CacheSweeper;
use seismic_proxy::{cli, config, openapi, routes, state};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind seismic-proxy listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind seismic-proxy listener on {addr}"))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!(
            "{}",
            serde_json::to_string_pretty(&openapi::openapi_json())?
        );
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::ProxyConfig::from_env()?;
    let http = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .build()
        .context("failed to build upstream HTTP client")?;
    let state = state::AppState::new(&config, http);

    let cancel = CancellationToken::new();
    if let Some(interval) = config.cache_sweep_interval {
        CacheSweeper::new(state.cache.clone(), interval).start(cancel.clone());
    }

    let app = routes::router(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    tracing::info!(
        %addr,
        upstream = %config.upstream_url,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "seismic-proxy listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    cancel.cancel();
    Ok(())
}
