//! Search core server binary.
//!
//! Loads the experiment configuration, initialises logging, and serves the
//! session and task API.

use pb_config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pb_core::log();
    let path = std::env::var("PRISM_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let settings = Settings::from_path(&path)?;
    pb_server::run(settings).await
}
