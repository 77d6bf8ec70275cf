//! Server binary: set up logging, load the environment config, serve.

use taskpad::api;
use taskpad::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting taskpad {} (data dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.data_dir.display()
    );

    api::serve(config).await
}
