//! Relay server
//!
//! Accepts push clients and fans their streams out to pull clients.
//!
//! Usage: `relay [listen_addr]`

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcp_media_streamer::{config::AppConfig, relay::RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load_or_default()?;
    if let Some(listen_addr) = std::env::args().nth(1) {
        config.relay.listen_addr = listen_addr;
    }
    config.validate()?;

    let server = RelayServer::bind(&config.relay).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
