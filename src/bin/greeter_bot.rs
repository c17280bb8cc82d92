//! Greeter bot: answers simple commands in page chat.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use textwall_client::{ChatLocation, Client, Event};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Answers !ping and !hello in page chat")]
struct Args {
    /// WebSocket endpoint of the world
    #[arg(long, env = "TEXTWALL_URL")]
    url: String,

    /// Session token, for authenticated worlds
    #[arg(long, env = "TEXTWALL_TOKEN")]
    token: Option<String>,

    /// Nickname to chat under
    #[arg(long, default_value = "greeter")]
    nickname: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let client = Client::connect(&args.url, args.token.as_deref(), Duration::ZERO).await?;
    let mut events = client.events();
    client.wait_connected().await?;
    info!(chat_id = client.chat_id(), "session established");

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!(missed = n, "event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            Event::Chat(msg) if msg.location == ChatLocation::Page => {
                if msg.nickname == args.nickname {
                    continue;
                }
                let reply = match msg.message.trim() {
                    "!ping" => Some("pong".to_string()),
                    "!hello" => Some(format!("Hello, {}!", msg.nickname)),
                    _ => None,
                };
                if let Some(reply) = reply {
                    client
                        .send_chat(&args.nickname, &reply, ChatLocation::Page, "#008000")
                        .await?;
                }
            }
            Event::Announcement { text } => info!(%text, "announcement"),
            Event::Disconnected => break,
            _ => {}
        }
    }
    Ok(())
}
