use anyhow::Context;
use arkproxy_core::bootstrap_from_env;
use arkproxy_router::proxy_router;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("arkproxy failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let boot = bootstrap_from_env()?;
    let config = boot.config.clone();
    info!(
        host = %config.host,
        port = config.port,
        upstream = %config.upstream_base_url,
        default_model = %config.models.default_model(),
        aliases = config.models.len(),
        upstream_timeout_secs = config.upstream_timeout_secs,
        proxy = config.proxy.is_some(),
        error_policy = config.error_policy.as_str(),
        "config loaded"
    );

    let app = proxy_router(boot.engine);
    let bind = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    info!("shutdown complete");
    Ok(())
}

const DEFAULT_LOG_FILTER: &str =
    "arkproxy=info,arkproxy_core=info,arkproxy_router=info,arkproxy_common=info";

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            warn!(error = %err, "ctrl-c handler unavailable; graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
}
