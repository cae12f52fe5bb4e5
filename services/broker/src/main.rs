// Broker service main entry point.
use anyhow::{Context, Result};
use broker::{config::BrokerConfig, observability, start};

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability("souk-broker");

    let config = BrokerConfig::from_env_or_yaml().context("load broker config")?;
    let metrics_bind = config.metrics_bind;
    let handle = start(config).await.context("start broker")?;

    tokio::spawn(async move {
        if let Err(err) = observability::serve_metrics(metrics_handle, metrics_bind).await {
            tracing::warn!(error = %err, "metrics endpoint exited");
        }
    });

    // Block until SIGINT, then drain and exit cleanly.
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    handle.shutdown().await
}
