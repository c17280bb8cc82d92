//! Area tool: one-shot clear or protect of a canvas rectangle.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use textwall_client::{Client, Protection};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Clears or protects a rectangle of the canvas")]
struct Args {
    /// WebSocket endpoint of the world
    #[arg(long, env = "TEXTWALL_URL")]
    url: String,

    /// Session token, for authenticated worlds
    #[arg(long, env = "TEXTWALL_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clear every cell in the rectangle
    Clear {
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
    },
    /// Protect the rectangle at a level (0 public, 1 member, 2 owner)
    Protect {
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        level: u8,
    },
    /// Remove protection from the rectangle
    Unprotect {
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let client = Client::connect(&args.url, args.token.as_deref(), Duration::ZERO).await?;
    client.wait_connected().await?;

    match args.command {
        Command::Clear { x1, y1, x2, y2 } => {
            client.clear_area(x1, y1, x2, y2).await?;
            info!("rectangle cleared");
        }
        Command::Protect {
            x1,
            y1,
            x2,
            y2,
            level,
        } => {
            let Some(level) = Protection::from_level(level) else {
                bail!("protection level must be 0, 1, or 2");
            };
            client.protect_area(x1, y1, x2, y2, level).await?;
            info!("rectangle protected");
        }
        Command::Unprotect { x1, y1, x2, y2 } => {
            client.unprotect_area(x1, y1, x2, y2).await?;
            info!("protection removed");
        }
    }

    client.close().await?;
    Ok(())
}
