//! absinthe-watch: subscribes one GraphQL document and logs its results.
//!
//! Reads the socket settings from the environment (see
//! [`SocketConfig::from_env`]), the document from `ABSINTHE_DOCUMENT` and
//! optional JSON variables from `ABSINTHE_VARIABLES`. Runs until the
//! subscription goes quiet for longer than its timeout, or Ctrl-C.

use anyhow::Context as _;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use phoenix_absinthe::{AbsintheClient, SocketConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = SocketConfig::from_env()?;
    let document = std::env::var("ABSINTHE_DOCUMENT").context("ABSINTHE_DOCUMENT is not set")?;
    let variables = match std::env::var("ABSINTHE_VARIABLES") {
        Ok(raw) => serde_json::from_str(&raw).context("ABSINTHE_VARIABLES is not valid JSON")?,
        Err(_) => Value::Null,
    };
    let timeout = config.subscription_timeout;

    let client = AbsintheClient::connect(config).await?;
    tracing::info!("control channel joined");

    let watched = client.open_subscription(
        &document,
        variables,
        |result| {
            tracing::info!(%result, "subscription data");
            true
        },
        timeout,
    );

    tokio::select! {
        outcome = watched => match outcome {
            Ok(id) => tracing::info!(subscription_id = %id, "subscription finished"),
            Err(err) => tracing::warn!(error = %err, code = err.error_code(), "subscription ended"),
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    let report = client.close().await;
    report.into_result()?;
    Ok(())
}
