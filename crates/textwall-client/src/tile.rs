//! Tile model, raw payload decoding, and the tile cache
//!
//! A tile is a 16×8 block of character cells, the unit of fetch/update
//! granularity. The cache is a sparse write-through map: entries are created
//! by `tileUpdate` and `fetch` messages and replaced wholesale per tile
//! (last-write-wins), never partially constructed.

use std::collections::HashMap;

use crate::coords::{self, TILE_HEIGHT, TILE_WIDTH};
use crate::protocol::{RawLink, RawTile};
use crate::segment;

/// Cells per tile
pub const CELLS_PER_TILE: usize = (TILE_WIDTH * TILE_HEIGHT) as usize;

/// Default foreground color: opaque black
pub const DEFAULT_COLOR: u32 = 0x000000;

/// Alphabet used by the packed per-cell protection string
const PACK_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Access-control tier for a cell or a whole tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Anyone may write
    Public,
    /// Members only
    MemberOnly,
    /// Owner only
    OwnerOnly,
}

impl Protection {
    /// Decode a numeric protection level (0, 1, 2)
    #[must_use]
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Public),
            1 => Some(Self::MemberOnly),
            2 => Some(Self::OwnerOnly),
            _ => None,
        }
    }

    /// Numeric protection level (0, 1, 2)
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::MemberOnly => 1,
            Self::OwnerOnly => 2,
        }
    }
}

/// A cell link target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellLink {
    /// Link to a URL
    Url(String),
    /// Link to another position on the canvas, in tile coordinates
    Coord {
        /// Target tile column
        tile_x: i64,
        /// Target tile row
        tile_y: i64,
    },
}

impl From<&RawLink> for CellLink {
    fn from(raw: &RawLink) -> Self {
        match raw {
            RawLink::Url { url } => Self::Url(url.clone()),
            RawLink::Coord {
                link_tile_x,
                link_tile_y,
            } => Self::Coord {
                tile_x: *link_tile_x,
                tile_y: *link_tile_y,
            },
        }
    }
}

/// One decoded character cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharCell {
    /// Cell content, one user-perceived character
    pub ch: String,
    /// Foreground color, 24-bit RGB
    pub color: u32,
    /// Background color, 24-bit RGB, `None` for no background
    pub bg_color: Option<u32>,
    /// Explicit protection; `None` inherits the tile default
    pub protection: Option<Protection>,
    /// Optional link
    pub link: Option<CellLink>,
}

impl Default for CharCell {
    fn default() -> Self {
        Self {
            ch: " ".to_string(),
            color: DEFAULT_COLOR,
            bg_color: None,
            protection: None,
            link: None,
        }
    }
}

/// A fully decoded 16×8 tile
///
/// All 128 cells are populated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    cells: Vec<CharCell>,
    /// Tile-level default protection; `None` defers to world settings
    pub default_protection: Option<Protection>,
}

impl Default for Tile {
    fn default() -> Self {
        Self::blank()
    }
}

impl Tile {
    /// A blank placeholder tile: spaces, default colors, no protection
    #[must_use]
    pub fn blank() -> Self {
        Self {
            cells: vec![CharCell::default(); CELLS_PER_TILE],
            default_protection: None,
        }
    }

    /// Decode a raw protocol payload into a tile
    #[must_use]
    pub fn from_raw(raw: &RawTile) -> Self {
        let mut cells = Vec::with_capacity(CELLS_PER_TILE);
        let mut units = segment::split(&raw.content);
        units.truncate(CELLS_PER_TILE);
        units.resize(CELLS_PER_TILE, " ".to_string());

        let protections = decode_protection(raw.protection.as_deref());

        for (i, ch) in units.into_iter().enumerate() {
            let color = raw
                .color
                .as_ref()
                .and_then(|c| c.get(i).copied())
                .unwrap_or(DEFAULT_COLOR);
            let bg_color = raw
                .bg_color
                .as_ref()
                .and_then(|c| c.get(i).copied())
                .and_then(|v| if v < 0 { None } else { Some(v as u32) });
            cells.push(CharCell {
                ch,
                color,
                bg_color,
                protection: protections.get(i).copied().flatten(),
                link: None,
            });
        }

        let mut tile = Self {
            cells,
            default_protection: raw.writability.and_then(Protection::from_level),
        };

        if let Some(links) = &raw.links {
            for (row_key, cols) in links {
                let Ok(row) = row_key.parse::<usize>() else {
                    continue;
                };
                for (col_key, raw_link) in cols {
                    let Ok(col) = col_key.parse::<usize>() else {
                        continue;
                    };
                    if row < TILE_HEIGHT as usize && col < TILE_WIDTH as usize {
                        tile.cells[row * TILE_WIDTH as usize + col].link =
                            Some(CellLink::from(raw_link));
                    }
                }
            }
        }

        tile
    }

    /// Cell at in-tile offsets; panics are avoided by masking to tile bounds
    #[must_use]
    pub fn cell(&self, char_x: u8, char_y: u8) -> &CharCell {
        let x = (char_x as usize).min(TILE_WIDTH as usize - 1);
        let y = (char_y as usize).min(TILE_HEIGHT as usize - 1);
        &self.cells[y * TILE_WIDTH as usize + x]
    }

    /// Cell with protection resolved: explicit cell value, else tile default
    #[must_use]
    pub fn resolved_cell(&self, char_x: u8, char_y: u8) -> CharCell {
        let mut cell = self.cell(char_x, char_y).clone();
        if cell.protection.is_none() {
            cell.protection = self.default_protection;
        }
        cell
    }
}

/// Decode the packed per-cell protection string.
///
/// Each character of the base64 alphabet contributes 3 two-bit fields,
/// most significant pair first. Field value 0 means "inherit the tile
/// default"; 1, 2, 3 are explicit levels 0, 1, 2. Cells beyond the encoded
/// length inherit.
fn decode_protection(packed: Option<&str>) -> Vec<Option<Protection>> {
    let mut out = vec![None; CELLS_PER_TILE];
    let Some(packed) = packed else {
        return out;
    };
    for (i, byte) in packed.bytes().enumerate() {
        let Some(value) = PACK_ALPHABET.iter().position(|&c| c == byte) else {
            continue;
        };
        for field in 0..3 {
            let cell = i * 3 + field;
            if cell >= CELLS_PER_TILE {
                break;
            }
            let bits = ((value >> ((2 - field) * 2)) & 0b11) as u8;
            if bits != 0 {
                out[cell] = Protection::from_level(bits - 1);
            }
        }
    }
    out
}

/// Sparse write-through cache of decoded tiles keyed by `(tile_x, tile_y)`
#[derive(Debug, Default)]
pub struct TileCache {
    tiles: HashMap<(i64, i64), Tile>,
}

impl TileCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for a tile (last-write-wins)
    pub fn insert(&mut self, tile_x: i64, tile_y: i64, tile: Tile) {
        self.tiles.insert((tile_x, tile_y), tile);
    }

    /// Look up a tile
    #[must_use]
    pub fn get(&self, tile_x: i64, tile_y: i64) -> Option<&Tile> {
        self.tiles.get(&(tile_x, tile_y))
    }

    /// Number of cached tiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Character-space lookup with protection resolved.
    ///
    /// Returns `None` if the covering tile was never fetched.
    #[must_use]
    pub fn get_char(&self, x: i64, y: i64) -> Option<CharCell> {
        let (tile_x, tile_y, char_x, char_y) = coords::char_to_tile(x, y);
        self.get(tile_x, tile_y)
            .map(|t| t.resolved_cell(char_x, char_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_content(content: &str) -> RawTile {
        RawTile {
            content: content.to_string(),
            ..RawTile::default()
        }
    }

    #[test]
    fn test_blank_tile_fully_populated() {
        let tile = Tile::blank();
        for y in 0..8 {
            for x in 0..16 {
                let cell = tile.cell(x, y);
                assert_eq!(cell.ch, " ");
                assert_eq!(cell.color, DEFAULT_COLOR);
                assert_eq!(cell.bg_color, None);
            }
        }
    }

    #[test]
    fn test_decode_content_and_colors() {
        let mut raw = raw_with_content("ab");
        raw.color = Some(vec![0xff0000, 0x00ff00]);
        raw.bg_color = Some(vec![-1, 0x0000ff]);
        let tile = Tile::from_raw(&raw);
        assert_eq!(tile.cell(0, 0).ch, "a");
        assert_eq!(tile.cell(0, 0).color, 0xff0000);
        assert_eq!(tile.cell(0, 0).bg_color, None);
        assert_eq!(tile.cell(1, 0).bg_color, Some(0x0000ff));
        // Cells beyond the content are padded with spaces and defaults
        assert_eq!(tile.cell(2, 0).ch, " ");
        assert_eq!(tile.cell(2, 0).color, DEFAULT_COLOR);
    }

    #[test]
    fn test_decode_content_is_grapheme_based() {
        let raw = raw_with_content("e\u{0301}z");
        let tile = Tile::from_raw(&raw);
        assert_eq!(tile.cell(0, 0).ch, "e\u{0301}");
        assert_eq!(tile.cell(1, 0).ch, "z");
    }

    #[test]
    fn test_decode_protection_fields() {
        // 'b' is alphabet index 27 = 0b011011: fields 01, 10, 11
        let fields = decode_protection(Some("b"));
        assert_eq!(fields[0], Some(Protection::Public));
        assert_eq!(fields[1], Some(Protection::MemberOnly));
        assert_eq!(fields[2], Some(Protection::OwnerOnly));
        // 'A' is index 0 = 0b000000: all three fields inherit
        let fields = decode_protection(Some("A"));
        assert_eq!(fields[0], None);
        assert_eq!(fields[1], None);
        assert_eq!(fields[2], None);
    }

    #[test]
    fn test_protection_inherits_beyond_packed_length() {
        let mut raw = raw_with_content("");
        raw.protection = Some("b".to_string());
        raw.writability = Some(2);
        let tile = Tile::from_raw(&raw);
        // Cell 3 is past the packed string: inherits the tile default
        assert_eq!(tile.cell(3, 0).protection, None);
        assert_eq!(
            tile.resolved_cell(3, 0).protection,
            Some(Protection::OwnerOnly)
        );
        // Cell 0 carries its explicit level
        assert_eq!(
            tile.resolved_cell(0, 0).protection,
            Some(Protection::Public)
        );
    }

    #[test]
    fn test_decode_links() {
        let mut raw = raw_with_content("x");
        raw.links = Some(
            [(
                "1".to_string(),
                [(
                    "2".to_string(),
                    RawLink::Url {
                        url: "https://example.com".to_string(),
                    },
                )]
                .into_iter()
                .collect(),
            )]
            .into_iter()
            .collect(),
        );
        let tile = Tile::from_raw(&raw);
        assert_eq!(
            tile.cell(2, 1).link,
            Some(CellLink::Url("https://example.com".to_string()))
        );
        assert_eq!(tile.cell(0, 0).link, None);
    }

    #[test]
    fn test_cache_get_char_unfetched_is_none() {
        let cache = TileCache::new();
        assert!(cache.get_char(5, 5).is_none());
    }

    #[test]
    fn test_cache_get_char_after_insert() {
        let mut cache = TileCache::new();
        cache.insert(0, 0, Tile::from_raw(&raw_with_content("q")));
        let cell = cache.get_char(0, 0).unwrap();
        assert_eq!(cell.ch, "q");
        // Same tile, different cell
        assert_eq!(cache.get_char(15, 7).unwrap().ch, " ");
        // Neighboring tile still unfetched
        assert!(cache.get_char(16, 0).is_none());
    }

    #[test]
    fn test_cache_last_write_wins() {
        let mut cache = TileCache::new();
        cache.insert(0, 0, Tile::from_raw(&raw_with_content("a")));
        cache.insert(0, 0, Tile::from_raw(&raw_with_content("b")));
        assert_eq!(cache.get_char(0, 0).unwrap().ch, "b");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_content_truncated_at_tile_size() {
        let long: String = "x".repeat(200);
        let tile = Tile::from_raw(&raw_with_content(&long));
        assert_eq!(tile.cell(15, 7).ch, "x");
    }
}
