//! ReelHub upload server entry point.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use reelhub_upload_server::{HttpRemoteStore, LocalDirRemoteStore, RemoteStore, UploadServer};

use config::{Config, RemoteConfig};

fn build_remote(config: &RemoteConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    Ok(match config {
        RemoteConfig::Local { dir, base_url } => {
            Arc::new(LocalDirRemoteStore::new(dir.clone(), base_url.clone()))
        }
        RemoteConfig::Http {
            endpoint,
            api_key,
            folder,
        } => {
            let client = reqwest::Client::builder().build()?;
            Arc::new(HttpRemoteStore::new(
                client,
                endpoint.clone(),
                api_key.clone(),
                folder.clone(),
            ))
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting ReelHub upload server"
    );

    let (config, path) = Config::load()?;
    tracing::info!(
        path = %path.display(),
        bind = %config.bind,
        staging = %config.staging_dir.display(),
        "configuration loaded"
    );

    let remote = build_remote(&config.remote)?;
    let server = UploadServer::new(config.server_config()?, remote).await?;

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown requested");
        signal_server.shutdown();
    });

    server.run().await?;
    Ok(())
}
