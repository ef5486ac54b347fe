#![forbid(unsafe_code)]

//! The "is this a singing stream" score (C4): a clipped sum of independent
//! signals over the video's title/description, its selected setlist, and
//! its raw comment corpus.

use crate::setlist_selector::SelectedSetlist;
use regex::Regex;
use std::sync::LazyLock;

const MAX_RAW: f64 = 17.0;

/// Default singing-bucket confidence threshold. The live value used by
/// `publisher::publish` is operator-configurable via `run.toml`'s
/// `confidence_threshold` (see `config::default_confidence_threshold`,
/// which mirrors this); this constant is the fallback when that key is
/// omitted, and a sane default for tests.
pub const SINGING_THRESHOLD: f64 = 0.7;

static SINGING_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)歌|歌枠|うた|singing|karaoke").expect("static regex"));

static SINGING_DESCRIPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"歌|セトリ|(?i)setlist").expect("static regex"));

static EXCLUDE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ゲーム実況|gameplay|プレイ動画|雑談").expect("static regex")
});

pub struct ConfidenceInputs<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub duration_s: u32,
    pub selected: Option<&'a SelectedSetlist>,
    pub comment_texts: &'a [String],
}

fn artist_ratio(lines: &[crate::timestamp_parser::TimestampLine]) -> f64 {
    if lines.is_empty() {
        return 0.0;
    }
    lines.iter().filter(|l| l.artist.is_some()).count() as f64 / lines.len() as f64
}

/// Computes `clip(raw / max_raw, 0, 1)` per spec.md §4.4.
pub fn score(inputs: &ConfidenceInputs) -> f64 {
    let mut singing = 0.0;

    if SINGING_TITLE.is_match(inputs.title) {
        singing += 3.0;
    }
    if SINGING_DESCRIPTION.is_match(inputs.description) {
        singing += 2.0;
    }

    if let Some(selected) = inputs.selected {
        if selected.lines.len() >= 10 {
            singing += 3.0;
        }
        let ratio = artist_ratio(&selected.lines);
        if ratio >= 0.8 {
            singing += 5.0;
        } else if ratio >= 0.5 {
            singing += 3.0;
        } else if ratio >= 0.2 {
            singing += 1.0;
        }
    }

    if inputs.duration_s >= 1800 {
        singing += 2.0;
    }

    let anchor_lines: usize = inputs
        .comment_texts
        .iter()
        .map(|text| crate::timestamp_parser::count_anchor_lines(text))
        .sum();
    if anchor_lines >= 3 {
        singing += 2.0;
    }

    let mut exclude = 0.0;
    if EXCLUDE_TITLE.is_match(inputs.title) {
        exclude += 5.0;
    }

    let raw = singing - exclude;
    (raw / MAX_RAW).clamp(0.0, 1.0)
}
