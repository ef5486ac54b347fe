#![forbid(unsafe_code)]

//! Shared song/artist normalization used by the catalog store and the
//! genre cache key. Folds full-width (zenkaku) alphanumerics and a handful
//! of common full-width punctuation marks down to their half-width (ASCII)
//! equivalents, case-folds, and collapses whitespace runs to single ASCII
//! spaces.
//!
//! No crate in the reference corpus reaches for full Unicode NFKC, so this
//! is a narrow, hand-rolled approximation rather than an adopted ecosystem
//! idiom: it covers the fullwidth block `U+FF01..=U+FF5E` (which includes
//! digits, Latin letters, and ASCII punctuation) plus the ideographic space
//! `U+3000`.

const FULLWIDTH_LOW: u32 = 0xFF01;
const FULLWIDTH_HIGH: u32 = 0xFF5E;
const FULLWIDTH_TO_ASCII_OFFSET: u32 = 0xFEE0;
const IDEOGRAPHIC_SPACE: char = '\u{3000}';

fn fold_char(c: char) -> char {
    if c == IDEOGRAPHIC_SPACE {
        return ' ';
    }
    let code = c as u32;
    if (FULLWIDTH_LOW..=FULLWIDTH_HIGH).contains(&code) {
        if let Some(folded) = char::from_u32(code - FULLWIDTH_TO_ASCII_OFFSET) {
            return folded;
        }
    }
    c
}

/// Folds full-width forms, case-folds, and collapses whitespace to single
/// ASCII spaces, trimming the ends.
pub fn normalize(input: &str) -> String {
    let folded: String = input.chars().map(fold_char).collect();
    let lower = folded.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_space = false;
    for c in lower.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Normalizes a song title for use as the `normalized_song` catalog column
/// and as half of the genre cache key.
pub fn normalize_song(song: &str) -> String {
    normalize(song)
}

/// Normalizes an artist name the same way a song title is normalized.
pub fn normalize_artist(artist: &str) -> String {
    normalize(artist)
}
