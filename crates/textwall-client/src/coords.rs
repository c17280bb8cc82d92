//! Coordinate mapping between character space and tile space
//!
//! The canvas is an infinite grid of character cells grouped into tiles of
//! 16 columns by 8 rows. Conversions use floor division so that negative
//! coordinates map correctly.

/// Number of character columns in a tile
pub const TILE_WIDTH: i64 = 16;

/// Number of character rows in a tile
pub const TILE_HEIGHT: i64 = 8;

/// Convert character-space coordinates to (tile_x, tile_y, char_x, char_y)
#[must_use]
pub fn char_to_tile(x: i64, y: i64) -> (i64, i64, u8, u8) {
    let tile_x = x.div_euclid(TILE_WIDTH);
    let tile_y = y.div_euclid(TILE_HEIGHT);
    let char_x = x.rem_euclid(TILE_WIDTH) as u8;
    let char_y = y.rem_euclid(TILE_HEIGHT) as u8;
    (tile_x, tile_y, char_x, char_y)
}

/// Convert (tile_x, tile_y, char_x, char_y) back to character-space coordinates
#[must_use]
pub fn tile_to_char(tile_x: i64, tile_y: i64, char_x: u8, char_y: u8) -> (i64, i64) {
    (
        tile_x * TILE_WIDTH + i64::from(char_x),
        tile_y * TILE_HEIGHT + i64::from(char_y),
    )
}
