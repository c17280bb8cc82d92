//! Typed events emitted by a [`crate::Client`]
//!
//! Every inbound protocol message either updates client state, produces one
//! of these events, or both. Events are fanned out on a broadcast channel,
//! so consumers run outside the dispatch loop and a failing consumer cannot
//! break dispatch to others.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tile::Tile;

/// Events delivered to subscribers of [`crate::Client::events`]
#[derive(Debug, Clone)]
pub enum Event {
    /// Session established; channel id, chat id and user count are known
    Connected {
        /// This session's channel id
        channel: String,
        /// Chat id for the world, `-1` when the world has no chat
        chat_id: i64,
        /// User count at connection time
        user_count: Option<u32>,
    },

    /// A command broadcast, usually a command-link click
    Command(CommandEvent),

    /// A chat message arrived
    Chat(ChatMessage),

    /// Chat backlog delivered shortly after connecting
    ChatHistory {
        /// Page-scoped backlog
        page: Vec<ChatMessage>,
        /// Global-scoped backlog
        global: Vec<ChatMessage>,
    },

    /// Tiles changed on the server; values are the freshly decoded tiles
    TileUpdate {
        /// Changed tiles keyed by `(tile_x, tile_y)`
        tiles: HashMap<(i64, i64), Tile>,
    },

    /// Live user count changed
    UserCount {
        /// Previous count, if one was known
        old: Option<u32>,
        /// New count
        new: u32,
    },

    /// Server announcement
    Announcement {
        /// Announcement body
        text: String,
    },

    /// A chat message was deleted
    ChatDelete {
        /// Id of the deleted message
        id: u64,
    },

    /// A guest cursor moved or hid
    Cursor {
        /// Channel id of the remote client
        channel: String,
        /// New position in character space, `None` when hidden
        position: Option<(i64, i64)>,
    },

    /// Terminal or transient outcome for one submitted edit
    Write(WriteResult),

    /// Every outstanding write has resolved; buffer and waiting table empty
    WriteBufferEmpty,

    /// The transport closed; no automatic reconnection is attempted
    Disconnected,
}

/// Outcome of one submitted edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Edit id the outcome refers to
    pub edit_id: u64,
    /// Accepted, permanently rejected, or re-queued
    pub status: WriteStatus,
}

/// Acknowledgment status for one edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The server applied the edit
    Accepted,
    /// Permanent rejection (reason codes 1 and 4); the edit is dropped
    Rejected {
        /// Server reason code
        code: i32,
    },
    /// Transient rejection; the edit was re-queued for the next flush
    RateLimited {
        /// Server reason code
        code: i32,
    },
}

/// A command broadcast with sender identity, in character space
#[derive(Debug, Clone)]
pub struct CommandEvent {
    /// Command data string
    pub data: String,
    /// Channel id of the sending client
    pub sender: String,
    /// Sender IP, present only when the session opted in (privileged)
    pub source_ip: Option<String>,
    /// Sender account name, when registered
    pub username: Option<String>,
    /// Whether the sender is a registered user
    pub registered: bool,
    /// Click position converted to character space, for link clicks
    pub coords: Option<(i64, i64)>,
}

/// Scope of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatLocation {
    /// Visible on the current page only
    Page,
    /// Visible world-wide
    Global,
}

/// A chat message with full sender metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender's numeric id
    pub id: u64,
    /// Sender's display nickname
    pub nickname: String,
    /// Sender's account name, when registered
    #[serde(default, rename = "realUsername")]
    pub real_username: Option<String>,
    /// Whether the sender is a registered user
    #[serde(default)]
    pub registered: bool,
    /// Whether the sender is a world operator
    #[serde(default)]
    pub op: bool,
    /// Whether the sender is site staff
    #[serde(default)]
    pub admin: bool,
    /// Message scope
    pub location: ChatLocation,
    /// Message text
    pub message: String,
    /// Display color, `#rrggbb`
    #[serde(default)]
    pub color: String,
    /// Timestamp, milliseconds since the epoch
    #[serde(default)]
    pub date: i64,
    /// Rank name, when the sender holds one
    #[serde(default, rename = "rankName")]
    pub rank_name: Option<String>,
    /// Rank display color
    #[serde(default, rename = "rankColor")]
    pub rank_color: Option<String>,
    /// Custom metadata attached by the server
    #[serde(default, rename = "customMeta")]
    pub custom_meta: Option<HashMap<String, String>>,
}
