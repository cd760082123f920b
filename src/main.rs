use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use modelcache::middleware::{AccessLog, Cors, Pipeline};
use modelcache::{CacheProxy, Config, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelcache=info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        upstream = %config.server_name,
        timeout_ms = config.timeout.as_millis() as u64,
        storage = %config.storage_dir.display(),
        "starting"
    );

    let proxy = Arc::new(
        CacheProxy::from_config(&config)
            .await
            .context("failed to initialise cache proxy")?,
    );

    let handler = Pipeline::new(move |req| {
        let proxy = Arc::clone(&proxy);
        async move { proxy.handle(req).await }
    })
    .layer(AccessLog)
    .layer(Cors::default())
    .into_handler();

    let server = Server::bind(config.listen_addr()).await?;
    info!("server is running on http://{}", server.local_addr());

    server
        .run_until(handler, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
