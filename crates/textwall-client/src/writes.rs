//! Write pipeline: buffering, batching, and acknowledgment tracking
//!
//! Decouples "intent to edit a character" from transmission. Edits are
//! buffered, flushed in bounded batches, and tracked until the server
//! acknowledges each one by id. Rejections with reason codes 1 and 4 are
//! permanent; every other code is a transient rate limit and the edit is
//! re-queued with its original id.
//!
//! Invariant: the waiting table and the outgoing buffer together account
//! for every edit that has not yet received a terminal acknowledgment.

use std::collections::{HashMap, VecDeque};

use crate::coords;
use crate::events::{WriteResult, WriteStatus};
use crate::protocol::WireEdit;
use crate::segment;

/// Maximum number of edits per transmitted batch
pub const MAX_BATCH: usize = 512;

/// Rejection reason codes the protocol defines as permanent.
///
/// Externally-imposed contract; every other code is a transient rate limit.
pub const PERMANENT_REJECTION_CODES: [i32; 2] = [1, 4];

/// One buffered character edit awaiting transmission or acknowledgment
#[derive(Debug, Clone)]
pub struct PendingEdit {
    /// Tile row
    pub tile_y: i64,
    /// Tile column
    pub tile_x: i64,
    /// Row within the tile
    pub char_y: u8,
    /// Column within the tile
    pub char_x: u8,
    /// Submission timestamp, milliseconds since the epoch
    pub timestamp: i64,
    /// The character, one user-perceived unit
    pub ch: String,
    /// Per-session monotonically increasing correlation id
    pub id: u64,
    /// Foreground color, 24-bit RGB
    pub color: u32,
    /// Background color, `None` for no background
    pub bg_color: Option<u32>,
}

impl PendingEdit {
    /// Wire form: `[tileY, tileX, charY, charX, timestamp, char, id, color, bg]`
    #[must_use]
    pub fn to_wire(&self) -> WireEdit {
        WireEdit(
            self.tile_y,
            self.tile_x,
            self.char_y,
            self.char_x,
            self.timestamp,
            self.ch.clone(),
            self.id,
            self.color,
            self.bg_color.map_or(-1, i64::from),
        )
    }
}

/// Buffer plus waiting table for outgoing edits
#[derive(Debug, Default)]
pub struct WritePipeline {
    next_edit_id: u64,
    queue: VecDeque<PendingEdit>,
    waiting: HashMap<u64, PendingEdit>,
}

impl WritePipeline {
    /// Create an empty pipeline; edit ids start at 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one character edit at character-space (x, y).
    ///
    /// Returns the assigned edit id. No transmission happens here.
    pub fn enqueue_char(
        &mut self,
        x: i64,
        y: i64,
        ch: &str,
        color: u32,
        bg_color: Option<u32>,
    ) -> u64 {
        let (tile_x, tile_y, char_x, char_y) = coords::char_to_tile(x, y);
        let id = self.next_edit_id;
        self.next_edit_id += 1;
        let edit = PendingEdit {
            tile_y,
            tile_x,
            char_y,
            char_x,
            timestamp: chrono::Utc::now().timestamp_millis(),
            ch: ch.to_string(),
            id,
            color,
            bg_color,
        };
        self.waiting.insert(id, edit.clone());
        self.queue.push_back(edit);
        id
    }

    /// Buffer a text block starting at character-space (x, y).
    ///
    /// The text is segmented into user-perceived characters, each placed at
    /// an advancing column. A `"\n"` unit produces no edit; it resets the
    /// column to the starting column and advances the row.
    pub fn enqueue_text(
        &mut self,
        x: i64,
        y: i64,
        text: &str,
        color: u32,
        bg_color: Option<u32>,
    ) -> Vec<u64> {
        let mut ids = Vec::new();
        let mut col = x;
        let mut row = y;
        for unit in segment::split(text) {
            if unit == "\n" {
                col = x;
                row += 1;
                continue;
            }
            ids.push(self.enqueue_char(col, row, &unit, color, bg_color));
            col += 1;
        }
        ids
    }

    /// Remove and return up to [`MAX_BATCH`] edits from the buffer, in
    /// submission order. Edits beyond the cap stay queued for the next
    /// flush; drained edits remain in the waiting table until acknowledged.
    pub fn drain_batch(&mut self) -> Vec<PendingEdit> {
        let n = self.queue.len().min(MAX_BATCH);
        self.queue.drain(..n).collect()
    }

    /// Route a write acknowledgment into per-edit results.
    ///
    /// Accepted ids and permanently rejected ids (codes 1, 4) leave the
    /// waiting table; transiently rejected ids are re-appended to the buffer
    /// tail with their original id. Ids no longer in the waiting table
    /// (discarded by [`Self::clear`]) are ignored.
    pub fn apply_response(
        &mut self,
        accepted: &[u64],
        rejected: &HashMap<u64, i32>,
    ) -> Vec<WriteResult> {
        let mut results = Vec::new();
        for &id in accepted {
            if self.waiting.remove(&id).is_some() {
                results.push(WriteResult {
                    edit_id: id,
                    status: WriteStatus::Accepted,
                });
            }
        }
        for (&id, &code) in rejected {
            if PERMANENT_REJECTION_CODES.contains(&code) {
                if self.waiting.remove(&id).is_some() {
                    results.push(WriteResult {
                        edit_id: id,
                        status: WriteStatus::Rejected { code },
                    });
                }
            } else if let Some(edit) = self.waiting.get(&id) {
                self.queue.push_back(edit.clone());
                results.push(WriteResult {
                    edit_id: id,
                    status: WriteStatus::RateLimited { code },
                });
            }
        }
        results
    }

    /// Whether both the buffer and the waiting table are empty
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.waiting.is_empty()
    }

    /// Number of edits buffered for the next flush
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Number of edits awaiting acknowledgment
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.waiting.len()
    }

    /// Discard all buffered and tracked edits without transmission.
    ///
    /// Late acknowledgments referencing discarded ids are ignored when they
    /// arrive; the id counter keeps advancing.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.waiting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_ids_monotonic() {
        let mut p = WritePipeline::new();
        let a = p.enqueue_char(0, 0, "a", 0, None);
        let b = p.enqueue_char(1, 0, "b", 0, None);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_enqueue_text_newline_resets_column() {
        let mut p = WritePipeline::new();
        let ids = p.enqueue_text(0, 0, "ab\ncd", 0, None);
        assert_eq!(ids.len(), 4);
        let batch = p.drain_batch();
        let positions: Vec<(i64, i64, String)> = batch
            .iter()
            .map(|e| {
                let (x, y) = crate::coords::tile_to_char(e.tile_x, e.tile_y, e.char_x, e.char_y);
                (x, y, e.ch.clone())
            })
            .collect();
        assert_eq!(
            positions,
            vec![
                (0, 0, "a".to_string()),
                (1, 0, "b".to_string()),
                (0, 1, "c".to_string()),
                (1, 1, "d".to_string()),
            ]
        );
    }

    #[test]
    fn test_drain_batch_caps_at_512() {
        let mut p = WritePipeline::new();
        for i in 0..600 {
            p.enqueue_char(i % 16, i / 16, "x", 0, None);
        }
        let batch = p.drain_batch();
        assert_eq!(batch.len(), 512);
        assert_eq!(p.buffered(), 88);
        assert_eq!(p.in_flight(), 600);
        // Drained in submission order
        assert_eq!(batch[0].id, 0);
        assert_eq!(batch[511].id, 511);
    }

    #[test]
    fn test_accepted_removes_from_waiting() {
        let mut p = WritePipeline::new();
        let id = p.enqueue_char(0, 0, "a", 0, None);
        p.drain_batch();
        let results = p.apply_response(&[id], &HashMap::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, WriteStatus::Accepted);
        assert!(p.is_idle());
    }

    #[test]
    fn test_transient_rejection_requeues_same_id() {
        let mut p = WritePipeline::new();
        for i in 0..8 {
            p.enqueue_char(i, 0, "x", 0, None);
        }
        p.drain_batch();
        let rejected = [(7u64, 2i32)].into_iter().collect();
        let results = p.apply_response(&[], &rejected);
        assert_eq!(results[0].status, WriteStatus::RateLimited { code: 2 });
        // Still tracked in both tables until re-flushed
        assert_eq!(p.in_flight(), 8);
        assert_eq!(p.buffered(), 1);
        let batch = p.drain_batch();
        assert_eq!(batch[0].id, 7);
    }

    #[test]
    fn test_permanent_rejection_drops_edit() {
        let mut p = WritePipeline::new();
        for i in 0..8 {
            p.enqueue_char(i, 0, "x", 0, None);
        }
        p.drain_batch();
        let rejected = [(7u64, 1i32)].into_iter().collect();
        let results = p.apply_response(&[], &rejected);
        assert_eq!(results[0].status, WriteStatus::Rejected { code: 1 });
        assert_eq!(p.in_flight(), 7);
        assert_eq!(p.buffered(), 0);
        assert!(p.drain_batch().is_empty());
    }

    #[test]
    fn test_code_4_is_also_permanent() {
        let mut p = WritePipeline::new();
        let id = p.enqueue_char(0, 0, "x", 0, None);
        p.drain_batch();
        let rejected = [(id, 4i32)].into_iter().collect();
        let results = p.apply_response(&[], &rejected);
        assert_eq!(results[0].status, WriteStatus::Rejected { code: 4 });
        assert!(p.is_idle());
    }

    #[test]
    fn test_stale_ack_after_clear_ignored() {
        let mut p = WritePipeline::new();
        let id = p.enqueue_char(0, 0, "x", 0, None);
        p.drain_batch();
        p.clear();
        assert!(p.is_idle());
        let results = p.apply_response(&[id], &HashMap::new());
        assert!(results.is_empty());
        // Id counter keeps advancing after a clear
        assert!(p.enqueue_char(0, 0, "y", 0, None) > id);
    }

    #[test]
    fn test_wire_edit_bg_sentinel() {
        let mut p = WritePipeline::new();
        p.enqueue_char(0, 0, "x", 0xff00ff, None);
        p.enqueue_char(1, 0, "y", 0, Some(0x112233));
        let batch = p.drain_batch();
        assert_eq!(batch[0].to_wire().8, -1);
        assert_eq!(batch[1].to_wire().8, 0x112233);
    }
}
