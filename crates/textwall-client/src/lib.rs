//! Textwall client - collaborative text-canvas protocol library
//!
//! This crate is a client for a collaborative real-time text-canvas
//! service: a shared infinite grid of editable character cells with chat,
//! links, and per-cell protection. It provides:
//! - Session: persistent WebSocket connection with a typed event surface
//! - Writes: batched character edits with acknowledgment tracking and
//!   retry on rate limiting
//! - Tile: decoded tile cache queryable by character coordinates
//! - Area: paced bulk clear/protect over rectangular regions
//! - Auth: session-token login against the account service
//!
//! ## Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use textwall_client::{Client, Event};
//!
//! let client = Client::connect(
//!     "wss://example.org/ws/world/",
//!     None,
//!     Duration::from_millis(250),
//! )
//! .await?;
//! client.wait_connected().await?;
//!
//! let mut events = client.events();
//! client.write_text(0, 0, "hello\nworld", 0x000000, None);
//! while let Ok(event) = events.recv().await {
//!     if matches!(event, Event::WriteBufferEmpty) {
//!         break;
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod area;
pub mod auth;
pub mod coords;
pub mod error;
pub mod events;
pub mod protocol;
pub mod segment;
pub mod session;
pub mod tile;
pub mod writes;

pub use error::{Error, Result};
pub use events::{ChatLocation, ChatMessage, CommandEvent, Event, WriteResult, WriteStatus};
pub use session::{Client, WorldStats, MAX_FETCH_TILES, REQUEST_TIMEOUT};
pub use tile::{CellLink, CharCell, Protection, Tile};
pub use writes::MAX_BATCH;
