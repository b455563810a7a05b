use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use polybugger_broker::{Broker, BrokerConfig, RegistryConfig};
use polybugger_config::load_from_env;

mod http;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_from_env().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("polybugger={}", config.log_level).into()),
        )
        .init();

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let broker = Arc::new(
        Broker::new(BrokerConfig {
            data_dir: config.data_dir.clone(),
            registry: RegistryConfig {
                max_sessions: config.max_sessions,
                session_timeout: Duration::from_secs(config.session_timeout_secs),
                sweep_interval: Duration::from_secs(60),
            },
        })
        .context("opening session store")?,
    );

    let recoverable = broker.list_recoverable().unwrap_or_default();
    if !recoverable.is_empty() {
        info!(
            count = recoverable.len(),
            "found recoverable sessions from a previous run"
        );
    }

    let _sweeper = broker.registry().spawn_sweeper();

    let app = http::router(broker.clone());
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("polybugger listening on {bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    Ok(())
}
