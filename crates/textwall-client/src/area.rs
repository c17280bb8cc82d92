//! Area operations: rectangle decomposition into per-tile operations
//!
//! The protocol only accepts single-tile operations, optionally scoped to a
//! sub-rectangle of the tile. A character-space rectangle is decomposed into
//! whole-tile operations for interior tiles and sub-rectangle operations for
//! boundary tiles whose edges do not align with tile boundaries. Operations
//! are paced with a fixed delay to respect the server's implicit rate limit.

use std::time::Duration;

use crate::coords::{self, TILE_HEIGHT, TILE_WIDTH};

/// Delay between consecutive per-tile operations (1000/80 ms)
pub const OP_DELAY: Duration = Duration::from_micros(12_500);

/// A sub-rectangle within one tile, in in-tile cell offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    /// Origin column within the tile
    pub char_x: u8,
    /// Origin row within the tile
    pub char_y: u8,
    /// Width in cells
    pub width: u8,
    /// Height in cells
    pub height: u8,
}

/// One tile's share of an area operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpan {
    /// Tile column
    pub tile_x: i64,
    /// Tile row
    pub tile_y: i64,
    /// `None` for a whole-tile operation, `Some` for a boundary tile
    pub rect: Option<CellRect>,
}

/// Decompose an inclusive character-space rectangle into per-tile spans.
///
/// Corners may be given in any order. Interior tiles produce whole-tile
/// spans; boundary tiles are scoped to the precise sub-rectangle inside the
/// requested region.
#[must_use]
pub fn tile_spans(x1: i64, y1: i64, x2: i64, y2: i64) -> Vec<TileSpan> {
    let (min_x, max_x) = (x1.min(x2), x1.max(x2));
    let (min_y, max_y) = (y1.min(y2), y1.max(y2));
    let (first_tx, first_ty, _, _) = coords::char_to_tile(min_x, min_y);
    let (last_tx, last_ty, _, _) = coords::char_to_tile(max_x, max_y);

    let mut spans = Vec::new();
    for tile_y in first_ty..=last_ty {
        for tile_x in first_tx..=last_tx {
            let tile_min_x = tile_x * TILE_WIDTH;
            let tile_min_y = tile_y * TILE_HEIGHT;
            let start_x = min_x.max(tile_min_x);
            let end_x = max_x.min(tile_min_x + TILE_WIDTH - 1);
            let start_y = min_y.max(tile_min_y);
            let end_y = max_y.min(tile_min_y + TILE_HEIGHT - 1);

            let whole = start_x == tile_min_x
                && end_x == tile_min_x + TILE_WIDTH - 1
                && start_y == tile_min_y
                && end_y == tile_min_y + TILE_HEIGHT - 1;

            let rect = if whole {
                None
            } else {
                Some(CellRect {
                    char_x: (start_x - tile_min_x) as u8,
                    char_y: (start_y - tile_min_y) as u8,
                    width: (end_x - start_x + 1) as u8,
                    height: (end_y - start_y + 1) as u8,
                })
            };
            spans.push(TileSpan {
                tile_x,
                tile_y,
                rect,
            });
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_aligned_tile() {
        let spans = tile_spans(0, 0, 15, 7);
        assert_eq!(spans, vec![TileSpan {
            tile_x: 0,
            tile_y: 0,
            rect: None,
        }]);
    }

    #[test]
    fn test_sub_rectangle_within_one_tile() {
        let spans = tile_spans(2, 1, 5, 3);
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].rect,
            Some(CellRect {
                char_x: 2,
                char_y: 1,
                width: 4,
                height: 3,
            })
        );
    }

    #[test]
    fn test_interior_tiles_are_whole() {
        // Three tiles wide, aligned vertically: middle tile is interior
        let spans = tile_spans(8, 0, 39, 7);
        assert_eq!(spans.len(), 3);
        assert!(spans[0].rect.is_some());
        assert_eq!(spans[1].rect, None);
        assert!(spans[2].rect.is_some());
        let left = spans[0].rect.unwrap();
        assert_eq!((left.char_x, left.width), (8, 8));
        let right = spans[2].rect.unwrap();
        assert_eq!((right.char_x, right.width), (0, 8));
    }

    #[test]
    fn test_swapped_corners() {
        assert_eq!(tile_spans(5, 3, 2, 1), tile_spans(2, 1, 5, 3));
    }

    #[test]
    fn test_negative_region() {
        let spans = tile_spans(-16, -8, -1, -1);
        assert_eq!(spans, vec![TileSpan {
            tile_x: -1,
            tile_y: -1,
            rect: None,
        }]);
    }
}
