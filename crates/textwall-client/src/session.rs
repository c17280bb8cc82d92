//! Connection/session layer
//!
//! Owns the WebSocket transport, demultiplexes inbound `kind`-tagged frames
//! into typed [`Event`]s, tracks session identity and locally-known canvas
//! state, and correlates request-style messages (ping, stats, fetch) with
//! their responses.
//!
//! All mutable state lives in one [`ClientState`] behind a single lock;
//! the reader task funnels every inbound frame through [`dispatch`], and the
//! flush timer serializes against dispatch through the same lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::area::{self, TileSpan};
use crate::error::{Error, Result};
use crate::events::{ChatLocation, CommandEvent, Event};
use crate::protocol::{
    parse_tile_key, ClientMessage, FetchRect, LinkData, LinkType, ProtectAction, ProtectData,
    ServerMessage, TilePosition,
};
use crate::tile::{CharCell, Protection, Tile, TileCache};
use crate::writes::WritePipeline;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How long a correlated request (ping, stats, fetch) waits for its response
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of tiles one fetch rectangle may cover
pub const MAX_FETCH_TILES: u64 = 2500;

/// Event broadcast capacity; slow consumers lag rather than block dispatch
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// World statistics returned by [`Client::stats`]
#[derive(Debug, Clone, Copy)]
pub struct WorldStats {
    /// When the world was created
    pub creation_date: DateTime<Utc>,
    /// Total view count
    pub views: u64,
}

/// All mutable session state, mutated only through [`dispatch`] and the
/// write-pipeline entry points, under one lock.
#[derive(Debug, Default)]
struct ClientState {
    tiles: TileCache,
    writes: WritePipeline,
    cursors: HashMap<String, (i64, i64)>,
    channel: Option<String>,
    chat_id: i64,
    user_count: Option<u32>,
    next_ping_id: u32,
    next_stats_id: u32,
    next_fetch_id: u32,
    pending_pings: HashMap<u32, oneshot::Sender<()>>,
    pending_stats: HashMap<u32, oneshot::Sender<WorldStats>>,
    pending_fetches: HashMap<u32, oneshot::Sender<()>>,
}

impl ClientState {
    fn abandon_pending(&mut self) {
        // Dropping the senders errors every awaiting receiver
        self.pending_pings.clear();
        self.pending_stats.clear();
        self.pending_fetches.clear();
    }
}

/// A connection to one world of the text-canvas service.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct Client {
    state: Arc<Mutex<ClientState>>,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    events: broadcast::Sender<Event>,
    connected_rx: watch::Receiver<bool>,
    flush_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Client {
    /// Connect to a world endpoint.
    ///
    /// `token`, when given, is attached as a session cookie. The connection
    /// is ready for outgoing operations once this returns, but session
    /// identity is only known after the server's `channel` message; await
    /// [`Client::wait_connected`] (or the [`Event::Connected`] event) before
    /// relying on it. A zero `flush_interval` leaves the write-flush timer
    /// disarmed; call [`Client::flush_writes`] manually.
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        flush_interval: Duration,
    ) -> Result<Self> {
        let mut request = url.into_client_request()?;
        if let Some(token) = token {
            let value = format!("token={token}")
                .parse()
                .map_err(|_| Error::auth("token is not a valid header value"))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (stream, _) = connect_async(request).await?;
        info!(url, "connected");
        let (sink, mut reader) = stream.split();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let client = Self {
            state: Arc::new(Mutex::new(ClientState::default())),
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            events: events.clone(),
            connected_rx,
            flush_task: Arc::new(Mutex::new(None)),
        };

        // Request the chat backlog and declare capability options up front
        client.send(&ClientMessage::ChatHistory).await?;
        client.send(&ClientMessage::CmdOpt).await?;

        let state = client.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch(&state, &events, &connected_tx, &text);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            lock(&state).abandon_pending();
            let _ = events.send(Event::Disconnected);
            info!("disconnected");
        });

        client.set_flush_interval(flush_interval);
        Ok(client)
    }

    /// Subscribe to the event stream
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Wait until the server's `channel` message establishes the session.
    ///
    /// Errors with [`Error::ConnectionClosed`] if the transport closes first.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.connected_rx.clone();
        while !*rx.borrow() {
            rx.changed().await.map_err(|_| Error::ConnectionClosed)?;
        }
        Ok(())
    }

    /// This session's channel id, once known
    #[must_use]
    pub fn channel_id(&self) -> Option<String> {
        self.lock().channel.clone()
    }

    /// Chat id for the world, `-1` when the world has no chat
    #[must_use]
    pub fn chat_id(&self) -> i64 {
        self.lock().chat_id
    }

    /// Latest known live user count
    #[must_use]
    pub fn user_count(&self) -> Option<u32> {
        self.lock().user_count
    }

    /// Latest known position of a guest cursor, in character space
    #[must_use]
    pub fn guest_cursor(&self, channel: &str) -> Option<(i64, i64)> {
        self.lock().cursors.get(channel).copied()
    }

    /// Character-space lookup against the tile cache.
    ///
    /// Returns `None` if the covering tile has not been fetched.
    #[must_use]
    pub fn get_char(&self, x: i64, y: i64) -> Option<CharCell> {
        self.lock().tiles.get_char(x, y)
    }

    /// Round-trip time to the server
    pub async fn ping(&self) -> Result<Duration> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut st = self.lock();
            let id = st.next_ping_id;
            st.next_ping_id += 1;
            st.pending_pings.insert(id, tx);
            id
        };
        let started = Instant::now();
        self.send(&ClientMessage::Ping { id }).await?;
        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.lock().pending_pings.remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    /// World statistics (creation date, view count)
    pub async fn stats(&self) -> Result<WorldStats> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut st = self.lock();
            let id = st.next_stats_id;
            st.next_stats_id += 1;
            st.pending_stats.insert(id, tx);
            id
        };
        self.send(&ClientMessage::Stats { id }).await?;
        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.lock().pending_stats.remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    /// Request tile data for a rectangle in tile coordinates, inclusive.
    ///
    /// Resolves once the server's response has been decoded into the cache.
    /// Rejects before any transmission if the rectangle covers more than
    /// [`MAX_FETCH_TILES`] tiles.
    pub async fn fetch_tiles(&self, min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Result<()> {
        let width = max_x.saturating_sub(min_x).saturating_add(1).max(0) as u64;
        let height = max_y.saturating_sub(min_y).saturating_add(1).max(0) as u64;
        let tiles = width.saturating_mul(height);
        if tiles > MAX_FETCH_TILES {
            return Err(Error::FetchAreaTooLarge {
                tiles,
                max: MAX_FETCH_TILES,
            });
        }

        let (tx, rx) = oneshot::channel();
        let request = {
            let mut st = self.lock();
            let id = st.next_fetch_id;
            st.next_fetch_id += 1;
            st.pending_fetches.insert(id, tx);
            id
        };
        self.send(&ClientMessage::Fetch {
            fetch_rectangles: vec![FetchRect {
                min_x,
                min_y,
                max_x,
                max_y,
            }],
            request,
        })
        .await?;
        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.lock().pending_fetches.remove(&request);
                Err(Error::Timeout)
            }
        }
    }

    /// Declare the rectangle (in tile coordinates) outside of which the
    /// server should suppress tile-update notifications for this session
    pub async fn set_boundary(&self, min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Result<()> {
        self.send(&ClientMessage::Boundary {
            min_x,
            min_y,
            max_x,
            max_y,
        })
        .await
    }

    /// Toggle receiving tile updates at all (fire-and-forget)
    pub async fn set_receive_updates(&self, enabled: bool) -> Result<()> {
        self.send(&ClientMessage::Config {
            updates: Some(enabled),
            cmd_sources: None,
            global_updates: None,
        })
        .await
    }

    /// Toggle receiving sender IPs in command events (privileged)
    pub async fn set_receive_cmd_sources(&self, enabled: bool) -> Result<()> {
        self.send(&ClientMessage::Config {
            updates: None,
            cmd_sources: Some(enabled),
            global_updates: None,
        })
        .await
    }

    /// Toggle receiving tile updates outside the declared boundary (privileged)
    pub async fn set_receive_global_updates(&self, enabled: bool) -> Result<()> {
        self.send(&ClientMessage::Config {
            updates: None,
            cmd_sources: None,
            global_updates: Some(enabled),
        })
        .await
    }

    /// Send a chat message
    pub async fn send_chat(
        &self,
        nickname: &str,
        message: &str,
        location: ChatLocation,
        color: &str,
    ) -> Result<()> {
        self.send(&ClientMessage::Chat {
            nickname: nickname.to_string(),
            message: message.to_string(),
            location,
            color: color.to_string(),
        })
        .await
    }

    /// Broadcast a command string to other clients
    pub async fn send_cmd(&self, data: &str, include_username: bool) -> Result<()> {
        self.send(&ClientMessage::Cmd {
            data: data.to_string(),
            include_username,
        })
        .await
    }

    /// Move our cursor to character-space (x, y)
    pub async fn move_cursor(&self, x: i64, y: i64) -> Result<()> {
        self.send(&ClientMessage::Cursor {
            position: Some(TilePosition::from_char(x, y)),
            hidden: false,
        })
        .await
    }

    /// Hide our cursor
    pub async fn hide_cursor(&self) -> Result<()> {
        self.send(&ClientMessage::Cursor {
            position: None,
            hidden: true,
        })
        .await
    }

    /// Place a URL link on the cell at character-space (x, y)
    pub async fn create_url_link(&self, x: i64, y: i64, url: &str) -> Result<()> {
        self.send(&ClientMessage::Link {
            data: LinkData {
                position: TilePosition::from_char(x, y),
                url: Some(url.to_string()),
                link_tile_x: None,
                link_tile_y: None,
            },
            link_type: LinkType::Url,
        })
        .await
    }

    /// Place a coordinate link on the cell at character-space (x, y)
    pub async fn create_coord_link(
        &self,
        x: i64,
        y: i64,
        tile_x: i64,
        tile_y: i64,
    ) -> Result<()> {
        self.send(&ClientMessage::Link {
            data: LinkData {
                position: TilePosition::from_char(x, y),
                url: None,
                link_tile_x: Some(tile_x),
                link_tile_y: Some(tile_y),
            },
            link_type: LinkType::Coord,
        })
        .await
    }

    /// Buffer one character edit at character-space (x, y).
    ///
    /// Returns the assigned edit id; transmission happens on the next flush.
    pub fn write_char(&self, x: i64, y: i64, ch: &str, color: u32, bg_color: Option<u32>) -> u64 {
        self.lock().writes.enqueue_char(x, y, ch, color, bg_color)
    }

    /// Buffer a text block starting at character-space (x, y).
    ///
    /// `"\n"` resets the column to the starting column and advances the row.
    pub fn write_text(
        &self,
        x: i64,
        y: i64,
        text: &str,
        color: u32,
        bg_color: Option<u32>,
    ) -> Vec<u64> {
        self.lock().writes.enqueue_text(x, y, text, color, bg_color)
    }

    /// Transmit up to 512 buffered edits as one batch.
    ///
    /// No-op when the buffer is empty; edits beyond the cap stay queued.
    pub async fn flush_writes(&self) -> Result<()> {
        let batch = self.lock().writes.drain_batch();
        if batch.is_empty() {
            return Ok(());
        }
        debug!(edits = batch.len(), "flushing write batch");
        let edits = batch.iter().map(|e| e.to_wire()).collect();
        self.send(&ClientMessage::Write { edits }).await
    }

    /// Replace the periodic flush timer; zero disarms it
    pub fn set_flush_interval(&self, interval: Duration) {
        let mut slot = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
        if interval.is_zero() {
            return;
        }
        let client = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = client.flush_writes().await {
                    warn!(error = %e, "write flush failed");
                    break;
                }
            }
        }));
    }

    /// Discard all buffered and in-flight edits without transmission.
    ///
    /// Emits [`Event::WriteBufferEmpty`] immediately; late acknowledgments
    /// for the discarded ids are ignored when they arrive.
    pub fn clear_write_buffer(&self) {
        self.lock().writes.clear();
        let _ = self.events.send(Event::WriteBufferEmpty);
    }

    /// Number of edits buffered for the next flush
    #[must_use]
    pub fn buffered_writes(&self) -> usize {
        self.lock().writes.buffered()
    }

    /// Clear a character-space rectangle, one paced per-tile operation at a
    /// time
    pub async fn clear_area(&self, x1: i64, y1: i64, x2: i64, y2: i64) -> Result<()> {
        for span in area::tile_spans(x1, y1, x2, y2) {
            self.send(&clear_message(span)).await?;
            tokio::time::sleep(area::OP_DELAY).await;
        }
        Ok(())
    }

    /// Protect a character-space rectangle at the given level, paced
    pub async fn protect_area(
        &self,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        level: Protection,
    ) -> Result<()> {
        for span in area::tile_spans(x1, y1, x2, y2) {
            self.send(&protect_message(span, Some(level), ProtectAction::Protect))
                .await?;
            tokio::time::sleep(area::OP_DELAY).await;
        }
        Ok(())
    }

    /// Remove protection from a character-space rectangle, paced
    pub async fn unprotect_area(&self, x1: i64, y1: i64, x2: i64, y2: i64) -> Result<()> {
        for span in area::tile_spans(x1, y1, x2, y2) {
            self.send(&protect_message(span, None, ProtectAction::Unprotect))
                .await?;
            tokio::time::sleep(area::OP_DELAY).await;
        }
        Ok(())
    }

    /// Send a close frame and disarm the flush timer
    pub async fn close(&self) -> Result<()> {
        self.set_flush_interval(Duration::ZERO);
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(Error::from)
    }

    async fn send(&self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .map_err(Error::from)
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<ClientState>) -> MutexGuard<'_, ClientState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn clear_message(span: TileSpan) -> ClientMessage {
    match span.rect {
        None => ClientMessage::ClearTile {
            tile_x: span.tile_x,
            tile_y: span.tile_y,
            char_x: None,
            char_y: None,
            char_width: None,
            char_height: None,
        },
        Some(rect) => ClientMessage::ClearTile {
            tile_x: span.tile_x,
            tile_y: span.tile_y,
            char_x: Some(rect.char_x),
            char_y: Some(rect.char_y),
            char_width: Some(rect.width),
            char_height: Some(rect.height),
        },
    }
}

fn protect_message(
    span: TileSpan,
    level: Option<Protection>,
    action: ProtectAction,
) -> ClientMessage {
    let rect = span.rect;
    ClientMessage::Protect {
        data: ProtectData {
            tile_x: span.tile_x,
            tile_y: span.tile_y,
            char_x: rect.map(|r| r.char_x),
            char_y: rect.map(|r| r.char_y),
            char_width: rect.map(|r| r.width),
            char_height: rect.map(|r| r.height),
            protection: level.map(Protection::level),
        },
        action,
    }
}

/// Decode one inbound frame and route it: update state, resolve pending
/// requests, emit events. The single entry point for all inbound mutation.
fn dispatch(
    state: &Mutex<ClientState>,
    events: &broadcast::Sender<Event>,
    connected: &watch::Sender<bool>,
    text: &str,
) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "undecodable frame");
            return;
        }
    };

    let mut st = lock(state);
    match msg {
        ServerMessage::Channel {
            sender,
            id,
            initial_user_count,
        } => {
            st.channel = Some(sender.clone());
            st.chat_id = id.unwrap_or(-1);
            st.user_count = initial_user_count;
            let _ = connected.send(true);
            let _ = events.send(Event::Connected {
                channel: sender,
                chat_id: st.chat_id,
                user_count: initial_user_count,
            });
        }

        ServerMessage::Cmd(payload) => {
            let _ = events.send(Event::Command(CommandEvent {
                data: payload.data,
                sender: payload.sender,
                source_ip: payload.source,
                username: payload.username,
                registered: payload.registered,
                coords: payload.coords.map(TilePosition::to_char),
            }));
        }

        ServerMessage::Chat(msg) => {
            let _ = events.send(Event::Chat(msg));
        }

        ServerMessage::Write { accepted, rejected } => {
            let results = st.writes.apply_response(&accepted, &rejected);
            let idle = st.writes.is_idle();
            for result in results {
                let _ = events.send(Event::Write(result));
            }
            if idle {
                let _ = events.send(Event::WriteBufferEmpty);
            }
        }

        ServerMessage::TileUpdate { tiles, .. } => {
            let mut changed = HashMap::new();
            for (key, raw) in &tiles {
                let Some((tile_x, tile_y)) = parse_tile_key(key) else {
                    debug!(%key, "malformed tile key");
                    continue;
                };
                let tile = raw.as_ref().map_or_else(Tile::blank, Tile::from_raw);
                st.tiles.insert(tile_x, tile_y, tile.clone());
                changed.insert((tile_x, tile_y), tile);
            }
            let _ = events.send(Event::TileUpdate { tiles: changed });
        }

        ServerMessage::Fetch { tiles, request } => {
            for (key, raw) in &tiles {
                let Some((tile_x, tile_y)) = parse_tile_key(key) else {
                    debug!(%key, "malformed tile key");
                    continue;
                };
                let tile = raw.as_ref().map_or_else(Tile::blank, Tile::from_raw);
                st.tiles.insert(tile_x, tile_y, tile);
            }
            if let Some(tx) = request.and_then(|id| st.pending_fetches.remove(&id)) {
                let _ = tx.send(());
            }
        }

        ServerMessage::ChatHistory {
            page_chat_prev,
            global_chat_prev,
        } => {
            let _ = events.send(Event::ChatHistory {
                page: page_chat_prev,
                global: global_chat_prev,
            });
        }

        ServerMessage::UserCount { count } => {
            let old = st.user_count.replace(count);
            let _ = events.send(Event::UserCount { old, new: count });
        }

        ServerMessage::Announcement { text } => {
            let _ = events.send(Event::Announcement { text });
        }

        ServerMessage::ChatDelete { id } => {
            let _ = events.send(Event::ChatDelete { id });
        }

        ServerMessage::Cursor {
            channel,
            position,
            hidden,
        } => {
            if st.channel.as_deref() == Some(channel.as_str()) {
                return;
            }
            let position = if hidden {
                None
            } else {
                position.map(TilePosition::to_char)
            };
            match position {
                Some(pos) => {
                    st.cursors.insert(channel.clone(), pos);
                }
                None => {
                    st.cursors.remove(&channel);
                }
            }
            let _ = events.send(Event::Cursor { channel, position });
        }

        ServerMessage::Ping { id } => {
            if let Some(tx) = id.and_then(|id| st.pending_pings.remove(&id)) {
                let _ = tx.send(());
            }
        }

        ServerMessage::Stats {
            id,
            creation_date,
            views,
        } => {
            if let Some(tx) = id.and_then(|id| st.pending_stats.remove(&id)) {
                let _ = tx.send(WorldStats {
                    creation_date: DateTime::from_timestamp_millis(creation_date)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                    views,
                });
            }
        }

        ServerMessage::Unknown => {
            debug!("unrecognized message kind, ignoring");
        }
    }
}
