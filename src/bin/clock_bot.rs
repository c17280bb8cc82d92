//! Clock bot: writes the wall-clock time onto the canvas on a timer.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use textwall_client::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(about = "Writes the wall-clock time onto the canvas")]
struct Args {
    /// WebSocket endpoint of the world
    #[arg(long, env = "TEXTWALL_URL")]
    url: String,

    /// Session token, for authenticated worlds
    #[arg(long, env = "TEXTWALL_TOKEN")]
    token: Option<String>,

    /// Character-space column to write at
    #[arg(long, default_value_t = 0)]
    x: i64,

    /// Character-space row to write at
    #[arg(long, default_value_t = 0)]
    y: i64,

    /// Seconds between updates
    #[arg(long, default_value_t = 1)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let client = loop {
        match Client::connect(
            &args.url,
            args.token.as_deref(),
            Duration::from_millis(250),
        )
        .await
        {
            Ok(client) => break client,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "connect failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    };
    client.wait_connected().await?;
    info!("session established");

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval));
    loop {
        ticker.tick().await;
        let now = chrono::Local::now().format("%H:%M:%S").to_string();
        client.write_text(args.x, args.y, &now, 0x000000, None);
    }
}
