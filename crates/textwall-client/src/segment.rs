//! Text segmentation into user-perceived characters
//!
//! The canvas addresses content one character per cell, where a "character"
//! is a user-perceived unit: an astral-plane code point or a base character
//! plus its combining marks occupies a single cell. Segmentation follows
//! extended grapheme cluster boundaries.
//!
//! JSON text decoded from the wire can carry U+FFFD where the original
//! payload held an unpaired surrogate; those units are normalized to `"?"`
//! so a broken escape never occupies a cell as a replacement glyph.

use unicode_segmentation::UnicodeSegmentation;

/// Placeholder for units that carried invalid surrogate data
const PLACEHOLDER: &str = "?";

/// Split a string into user-perceived character units.
#[must_use]
pub fn split(text: &str) -> Vec<String> {
    text.graphemes(true)
        .map(|g| {
            if g.contains('\u{FFFD}') {
                PLACEHOLDER.to_string()
            } else {
                g.to_string()
            }
        })
        .collect()
}
