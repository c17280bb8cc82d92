//! Wire protocol messages
//!
//! One JSON object per text frame, discriminated by a `kind` tag. Tile keys
//! in payloads are `"tileY,tileX"` strings (row-major, Y first), the reverse
//! of the (x, y) order used by the public coordinate helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::coords;
use crate::events::ChatMessage;

/// Messages received from the server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum ServerMessage {
    /// Command-link click relayed from another client
    #[serde(rename = "cmd")]
    Cmd(CmdPayload),

    /// A chat message
    #[serde(rename = "chat")]
    Chat(ChatMessage),

    /// Acknowledgment for a previously transmitted write batch
    #[serde(rename = "write")]
    Write {
        /// Edit ids the server accepted
        #[serde(default)]
        accepted: Vec<u64>,
        /// Edit ids the server rejected, with a numeric reason code each
        #[serde(default, deserialize_with = "de_u64_key_map")]
        rejected: HashMap<u64, i32>,
    },

    /// Changed tiles pushed by the server
    #[serde(rename = "tileUpdate")]
    TileUpdate {
        /// Changed tiles keyed by `"tileY,tileX"`; `null` means blank
        tiles: HashMap<String, Option<RawTile>>,
        /// Channel that caused the update, when known
        #[serde(default)]
        channel: Option<String>,
    },

    /// Response to a tile fetch request
    #[serde(rename = "fetch")]
    Fetch {
        /// Fetched tiles keyed by `"tileY,tileX"`; `null` means blank
        tiles: HashMap<String, Option<RawTile>>,
        /// Correlation id echoed from the request
        #[serde(default)]
        request: Option<u32>,
    },

    /// Previously-sent chat backlog
    #[serde(rename = "chathistory")]
    ChatHistory {
        /// Page-scoped backlog
        #[serde(default)]
        page_chat_prev: Vec<ChatMessage>,
        /// Global-scoped backlog
        #[serde(default)]
        global_chat_prev: Vec<ChatMessage>,
    },

    /// Response to a ping request
    #[serde(rename = "ping")]
    Ping {
        /// Correlation id echoed from the request
        #[serde(default)]
        id: Option<u32>,
    },

    /// First message of a session; the true "connected" signal
    #[serde(rename = "channel")]
    Channel {
        /// This session's channel id
        sender: String,
        /// Chat id for the world; absent when the world has no chat
        #[serde(default)]
        id: Option<i64>,
        /// User count at connection time
        #[serde(default)]
        initial_user_count: Option<u32>,
    },

    /// Live user count change
    #[serde(rename = "user_count")]
    UserCount {
        /// New user count
        count: u32,
    },

    /// Server announcement text
    #[serde(rename = "announcement")]
    Announcement {
        /// Announcement body
        text: String,
    },

    /// A chat message was deleted
    #[serde(rename = "chatdelete")]
    ChatDelete {
        /// Id of the deleted message
        id: u64,
    },

    /// Guest cursor moved or hid
    #[serde(rename = "cursor")]
    Cursor {
        /// Channel id of the remote client
        channel: String,
        /// New position in tile space; absent when hiding
        #[serde(default)]
        position: Option<TilePosition>,
        /// Whether the cursor was hidden
        #[serde(default)]
        hidden: bool,
    },

    /// Response to a stats request
    #[serde(rename = "stats")]
    Stats {
        /// Correlation id echoed from the request
        #[serde(default)]
        id: Option<u32>,
        /// World creation date, milliseconds since the epoch
        #[serde(rename = "creationDate")]
        creation_date: i64,
        /// Total view count
        views: u64,
    },

    /// Unrecognized kind; ignored with a debug log, never fatal
    #[serde(other)]
    Unknown,
}

/// Deserialize a map whose JSON keys are numeric strings into `u64` keys.
/// Needed because the internally tagged `ServerMessage` buffers content,
/// which prevents serde_json's built-in string-to-integer key conversion.
fn de_u64_key_map<'de, D>(deserializer: D) -> Result<HashMap<u64, i32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = HashMap::<String, i32>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.parse::<u64>()
                .map(|k| (k, v))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

/// Payload of a `cmd` message
#[derive(Debug, Clone, Deserialize)]
pub struct CmdPayload {
    /// Command data string
    pub data: String,
    /// Channel id of the sending client
    pub sender: String,
    /// Sender IP, present only when the session opted in (privileged)
    #[serde(default)]
    pub source: Option<String>,
    /// Sender account name, when registered
    #[serde(default)]
    pub username: Option<String>,
    /// Whether the sender is a registered user
    #[serde(default)]
    pub registered: bool,
    /// Click position in tile space, when the command came from a link
    #[serde(default)]
    pub coords: Option<TilePosition>,
}

/// A position expressed as tile coordinates plus in-tile offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePosition {
    /// Tile column
    #[serde(rename = "tileX")]
    pub tile_x: i64,
    /// Tile row
    #[serde(rename = "tileY")]
    pub tile_y: i64,
    /// Column within the tile (0..16)
    #[serde(rename = "charX")]
    pub char_x: u8,
    /// Row within the tile (0..8)
    #[serde(rename = "charY")]
    pub char_y: u8,
}

impl TilePosition {
    /// Build from character-space coordinates
    #[must_use]
    pub fn from_char(x: i64, y: i64) -> Self {
        let (tile_x, tile_y, char_x, char_y) = coords::char_to_tile(x, y);
        Self {
            tile_x,
            tile_y,
            char_x,
            char_y,
        }
    }

    /// Convert back to character-space coordinates
    #[must_use]
    pub fn to_char(self) -> (i64, i64) {
        coords::tile_to_char(self.tile_x, self.tile_y, self.char_x, self.char_y)
    }
}

/// Raw tile payload as carried by `tileUpdate` and `fetch` messages
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTile {
    /// Cell contents, 128 user-perceived characters row-major
    #[serde(default)]
    pub content: String,
    /// Per-cell 24-bit foreground colors; absent means opaque black
    #[serde(default)]
    pub color: Option<Vec<u32>>,
    /// Per-cell background colors, `-1` meaning none; absent means all none
    #[serde(default, rename = "bgcolor")]
    pub bg_color: Option<Vec<i64>>,
    /// Packed per-cell protection fields (base64 alphabet, 3 fields per char)
    #[serde(default)]
    pub protection: Option<String>,
    /// Tile-level default protection; absent defers to world settings
    #[serde(default)]
    pub writability: Option<u8>,
    /// Sparse per-cell links keyed by row then column
    #[serde(default)]
    pub links: Option<HashMap<String, HashMap<String, RawLink>>>,
}

/// A raw cell link: either a URL or a target tile-coordinate pair
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLink {
    /// Link to a URL
    Url {
        /// Target URL
        url: String,
    },
    /// Link to another position on the canvas
    Coord {
        /// Target tile column
        #[serde(rename = "link_tileX")]
        link_tile_x: i64,
        /// Target tile row
        #[serde(rename = "link_tileY")]
        link_tile_y: i64,
    },
}

/// Messages sent to the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ClientMessage {
    /// Request the chat backlog
    #[serde(rename = "chathistory")]
    ChatHistory,

    /// Declare command-capability options for this session
    #[serde(rename = "cmd_opt")]
    CmdOpt,

    /// A batch of character edits
    #[serde(rename = "write")]
    Write {
        /// Edits in submission order, at most 512 per batch
        edits: Vec<WireEdit>,
    },

    /// Round-trip time probe
    #[serde(rename = "ping")]
    Ping {
        /// Correlation id, unique per session
        id: u32,
    },

    /// World statistics request
    #[serde(rename = "stats")]
    Stats {
        /// Correlation id, unique per session
        id: u32,
    },

    /// Send a chat message
    #[serde(rename = "chat")]
    Chat {
        /// Display nickname
        nickname: String,
        /// Message text
        message: String,
        /// Page- or global-scoped
        location: crate::events::ChatLocation,
        /// Display color, `#rrggbb`
        color: String,
    },

    /// Send a command broadcast
    #[serde(rename = "cmd")]
    Cmd {
        /// Command data string
        data: String,
        /// Whether receivers may see our account name
        include_username: bool,
    },

    /// Move or hide our cursor
    #[serde(rename = "cursor")]
    Cursor {
        /// New position; omitted when hiding
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<TilePosition>,
        /// Hide the cursor
        hidden: bool,
    },

    /// Create a cell link
    #[serde(rename = "link")]
    Link {
        /// Link placement and target
        data: LinkData,
        /// Target discriminator
        #[serde(rename = "type")]
        link_type: LinkType,
    },

    /// Request tile data for rectangles, correlated by `request`
    #[serde(rename = "fetch")]
    Fetch {
        /// Rectangles to fetch, in tile coordinates
        #[serde(rename = "fetchRectangles")]
        fetch_rectangles: Vec<FetchRect>,
        /// Correlation id, unique per session
        request: u32,
    },

    /// Declare the tile-update boundary for this session
    #[serde(rename = "boundary")]
    Boundary {
        /// Minimum tile column
        #[serde(rename = "minX")]
        min_x: i64,
        /// Minimum tile row
        #[serde(rename = "minY")]
        min_y: i64,
        /// Maximum tile column
        #[serde(rename = "maxX")]
        max_x: i64,
        /// Maximum tile row
        #[serde(rename = "maxY")]
        max_y: i64,
    },

    /// Clear one tile, or a sub-rectangle of it
    #[serde(rename = "clear_tile")]
    ClearTile {
        /// Tile column
        #[serde(rename = "tileX")]
        tile_x: i64,
        /// Tile row
        #[serde(rename = "tileY")]
        tile_y: i64,
        /// Sub-rectangle origin column; whole tile when absent
        #[serde(rename = "charX", skip_serializing_if = "Option::is_none")]
        char_x: Option<u8>,
        /// Sub-rectangle origin row
        #[serde(rename = "charY", skip_serializing_if = "Option::is_none")]
        char_y: Option<u8>,
        /// Sub-rectangle width
        #[serde(rename = "charWidth", skip_serializing_if = "Option::is_none")]
        char_width: Option<u8>,
        /// Sub-rectangle height
        #[serde(rename = "charHeight", skip_serializing_if = "Option::is_none")]
        char_height: Option<u8>,
    },

    /// Protect or unprotect one tile, or a sub-rectangle of it
    #[serde(rename = "protect")]
    Protect {
        /// Placement and protection level
        data: ProtectData,
        /// Whether to apply or remove protection
        action: ProtectAction,
    },

    /// Fire-and-forget session configuration toggles
    #[serde(rename = "config")]
    Config {
        /// Receive tile updates at all
        #[serde(skip_serializing_if = "Option::is_none")]
        updates: Option<bool>,
        /// Receive sender IPs in cmd events (privileged)
        #[serde(rename = "cmdSources", skip_serializing_if = "Option::is_none")]
        cmd_sources: Option<bool>,
        /// Receive tile updates outside the declared boundary (privileged)
        #[serde(rename = "globalUpdates", skip_serializing_if = "Option::is_none")]
        global_updates: Option<bool>,
    },
}

/// One edit on the wire:
/// `[tileY, tileX, charY, charX, timestamp, char, id, color, bgColor]`
#[derive(Debug, Clone, Serialize)]
pub struct WireEdit(
    pub i64,
    pub i64,
    pub u8,
    pub u8,
    pub i64,
    pub String,
    pub u64,
    pub u32,
    pub i64,
);

/// Link placement and target fields
#[derive(Debug, Clone, Serialize)]
pub struct LinkData {
    /// Cell the link is placed on
    #[serde(flatten)]
    pub position: TilePosition,
    /// Target URL, for URL links
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Target tile column, for coordinate links
    #[serde(rename = "link_tileX", skip_serializing_if = "Option::is_none")]
    pub link_tile_x: Option<i64>,
    /// Target tile row, for coordinate links
    #[serde(rename = "link_tileY", skip_serializing_if = "Option::is_none")]
    pub link_tile_y: Option<i64>,
}

/// Link target discriminator
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// URL link
    Url,
    /// Canvas coordinate link
    Coord,
}

/// Placement fields of a protect operation
#[derive(Debug, Clone, Serialize)]
pub struct ProtectData {
    /// Tile column
    #[serde(rename = "tileX")]
    pub tile_x: i64,
    /// Tile row
    #[serde(rename = "tileY")]
    pub tile_y: i64,
    /// Sub-rectangle origin column; whole tile when absent
    #[serde(rename = "charX", skip_serializing_if = "Option::is_none")]
    pub char_x: Option<u8>,
    /// Sub-rectangle origin row
    #[serde(rename = "charY", skip_serializing_if = "Option::is_none")]
    pub char_y: Option<u8>,
    /// Sub-rectangle width
    #[serde(rename = "charWidth", skip_serializing_if = "Option::is_none")]
    pub char_width: Option<u8>,
    /// Sub-rectangle height
    #[serde(rename = "charHeight", skip_serializing_if = "Option::is_none")]
    pub char_height: Option<u8>,
    /// Protection level to apply (0 public, 1 member-only, 2 owner-only)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub protection: Option<u8>,
}

/// Protect operation direction
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectAction {
    /// Apply protection
    Protect,
    /// Remove protection
    Unprotect,
}

/// One rectangle of a fetch request, in tile coordinates
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FetchRect {
    /// Minimum tile column
    #[serde(rename = "minX")]
    pub min_x: i64,
    /// Minimum tile row
    #[serde(rename = "minY")]
    pub min_y: i64,
    /// Maximum tile column
    #[serde(rename = "maxX")]
    pub max_x: i64,
    /// Maximum tile row
    #[serde(rename = "maxY")]
    pub max_y: i64,
}

/// Parse a `"tileY,tileX"` wire key into `(tile_x, tile_y)`.
///
/// Returns `None` on malformed keys; callers skip those entries.
#[must_use]
pub fn parse_tile_key(key: &str) -> Option<(i64, i64)> {
    let (y, x) = key.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_kind_tag() {
        let json = serde_json::to_string(&ClientMessage::ChatHistory).unwrap();
        assert_eq!(json, "{\"kind\":\"chathistory\"}");

        let json = serde_json::to_string(&ClientMessage::Ping { id: 3 }).unwrap();
        assert!(json.contains("\"kind\":\"ping\""));
        assert!(json.contains("\"id\":3"));
    }

    #[test]
    fn test_wire_edit_is_an_array() {
        let edit = WireEdit(1, 2, 3, 4, 1700000000000, "a".into(), 7, 0, -1);
        let json = serde_json::to_string(&edit).unwrap();
        assert_eq!(json, "[1,2,3,4,1700000000000,\"a\",7,0,-1]");
    }

    #[test]
    fn test_server_message_channel() {
        let json = r#"{"kind":"channel","sender":"abc123","id":42,"initial_user_count":5}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Channel {
                sender,
                id,
                initial_user_count,
            } => {
                assert_eq!(sender, "abc123");
                assert_eq!(id, Some(42));
                assert_eq!(initial_user_count, Some(5));
            }
            other => unreachable!("expected channel message, got {:?}", other),
        }
    }

    #[test]
    fn test_server_message_write_rejections() {
        let json = r#"{"kind":"write","accepted":[1,2],"rejected":{"7":2,"9":1}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Write { accepted, rejected } => {
                assert_eq!(accepted, vec![1, 2]);
                assert_eq!(rejected.get(&7), Some(&2));
                assert_eq!(rejected.get(&9), Some(&1));
            }
            other => unreachable!("expected write message, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_not_fatal() {
        let json = r#"{"kind":"propagate","weird":true}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }

    #[test]
    fn test_raw_link_variants() {
        let url: RawLink = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert!(matches!(url, RawLink::Url { .. }));

        let coord: RawLink =
            serde_json::from_str(r#"{"link_tileX":4,"link_tileY":-2}"#).unwrap();
        match coord {
            RawLink::Coord {
                link_tile_x,
                link_tile_y,
            } => {
                assert_eq!((link_tile_x, link_tile_y), (4, -2));
            }
            RawLink::Url { .. } => unreachable!("expected coord link"),
        }
    }

    #[test]
    fn test_parse_tile_key() {
        assert_eq!(parse_tile_key("8,-3"), Some((-3, 8)));
        assert_eq!(parse_tile_key("garbage"), None);
    }

    #[test]
    fn test_tile_position_char_conversion() {
        let pos = TilePosition::from_char(-1, 9);
        assert_eq!((pos.tile_x, pos.tile_y), (-1, 1));
        assert_eq!((pos.char_x, pos.char_y), (15, 1));
        assert_eq!(pos.to_char(), (-1, 9));
    }

    #[test]
    fn test_config_skips_unset_toggles() {
        let json = serde_json::to_string(&ClientMessage::Config {
            updates: Some(false),
            cmd_sources: None,
            global_updates: None,
        })
        .unwrap();
        assert!(json.contains("\"updates\":false"));
        assert!(!json.contains("cmdSources"));
    }
}
