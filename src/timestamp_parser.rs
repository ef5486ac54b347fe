#![forbid(unsafe_code)]

//! Extracts `(offset, song, artist)` triples out of free text (a video
//! description or a single comment), producing one `CandidateSetlist`.
//! Implements spec steps A–E: time-anchor detection, payload partition,
//! song/artist split, the monotonicity filter, and the candidate quality
//! score.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Where a candidate setlist came from. A comment candidate also carries
/// the signals the selector (`setlist_selector`) needs to rank it.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Description,
    Comment {
        index: usize,
        like_count: u64,
        published_at: DateTime<Utc>,
    },
}

impl Origin {
    /// Lexicographic origin tag used as the final selector tie-break
    /// (spec.md §4.3 rule 3c): `"comment"` sorts before `"description"`.
    pub fn tag(&self) -> String {
        match self {
            Origin::Description => "description".to_string(),
            Origin::Comment { index, .. } => format!("comment{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampLine {
    pub offset_s: u32,
    pub song: String,
    pub artist: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct CandidateSetlist {
    pub origin: Origin,
    pub lines: Vec<TimestampLine>,
    pub quality: f64,
}

impl CandidateSetlist {
    pub fn artist_ratio(&self) -> f64 {
        if self.lines.is_empty() {
            return 0.0;
        }
        let with_artist = self.lines.iter().filter(|l| l.artist.is_some()).count();
        with_artist as f64 / self.lines.len() as f64
    }
}

static HMS_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(?P<h>[01]?\d|2[0-3]):(?P<m2>[0-5]\d):(?P<s2>[0-5]\d))|(?:(?P<m>\d{1,3}):(?P<s>[0-5]\d))")
        .expect("static anchor regex is valid")
});

const SEPARATORS: &[char] = &[' ', '-', '–', '—', ':', '：', '・', '･', '）', ')'];

struct Anchor {
    start: usize,
    end: usize,
    offset_s: u32,
}

/// Finds the first valid time anchor on a line. Returns `None` if no
/// candidate position yields a valid offset.
fn find_anchor(line: &str) -> Option<Anchor> {
    for m in HMS_ANCHOR.find_iter(line) {
        let caps = HMS_ANCHOR.captures(&line[m.start()..m.end()])?;
        if let (Some(h), Some(m2), Some(s2)) = (caps.name("h"), caps.name("m2"), caps.name("s2")) {
            let hours: u32 = h.as_str().parse().ok()?;
            let minutes: u32 = m2.as_str().parse().ok()?;
            let seconds: u32 = s2.as_str().parse().ok()?;
            if hours <= 23 {
                return Some(Anchor {
                    start: m.start(),
                    end: m.end(),
                    offset_s: hours * 3600 + minutes * 60 + seconds,
                });
            }
            continue;
        }
        if let (Some(mm), Some(ss)) = (caps.name("m"), caps.name("s")) {
            let minutes: u32 = mm.as_str().parse().ok()?;
            let seconds: u32 = ss.as_str().parse().ok()?;
            if minutes <= 599 {
                return Some(Anchor {
                    start: m.start(),
                    end: m.end(),
                    offset_s: minutes * 60 + seconds,
                });
            }
        }
    }
    None
}

/// Step B: strips the anchor and one optional leading separator.
fn extract_payload(line: &str, anchor: &Anchor) -> Option<String> {
    let rest = line[anchor.end..].trim_start();
    let mut chars = rest.chars();
    let payload = match chars.next() {
        Some(c) if SEPARATORS.contains(&c) => chars.as_str().trim_start(),
        _ => rest,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

static BY_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+by\s+").expect("static `by` separator regex is valid")
});

static TRAILING_PAREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\(([^)]+)\)\s*$").expect("static trailing-paren regex is valid")
});

/// Step C: splits a payload into `(song, artist)` following the ordered
/// rule set, first match wins.
fn split_song_artist(payload: &str) -> (String, Option<String>) {
    if payload.matches('/').count() == 1
        && let Some((left, right)) = payload.split_once('/')
    {
        return (left.trim().to_string(), Some(right.trim().to_string()));
    }

    if let Some(idx) = payload.find(" - ") {
        let (left, right) = payload.split_at(idx);
        return (left.trim().to_string(), Some(right[3..].trim().to_string()));
    }

    if let Some(m) = BY_SEPARATOR.find(payload) {
        let (left, right) = (&payload[..m.start()], &payload[m.end()..]);
        return (left.trim().to_string(), Some(right.trim().to_string()));
    }

    if let Some(caps) = TRAILING_PAREN.captures(payload) {
        let right = caps.get(2).unwrap().as_str();
        if find_anchor(right).is_none() {
            let song = caps.get(1).unwrap().as_str().trim().to_string();
            return (song, Some(right.trim().to_string()));
        }
    }

    (payload.to_string(), None)
}

/// Step D: drops entries whose offset regresses by more than 5 seconds;
/// equal offsets collapse to the first occurrence.
fn apply_monotonicity_filter(lines: Vec<TimestampLine>) -> Vec<TimestampLine> {
    let mut retained: Vec<TimestampLine> = Vec::with_capacity(lines.len());
    let mut last_offset: Option<u32> = None;
    for line in lines {
        match last_offset {
            None => {
                last_offset = Some(line.offset_s);
                retained.push(line);
            }
            Some(prev) => {
                if line.offset_s == prev {
                    continue;
                }
                if (line.offset_s as i64) < prev as i64 - 5 {
                    continue;
                }
                last_offset = Some(line.offset_s);
                retained.push(line);
            }
        }
    }
    retained
}

fn density_term(lines: &[TimestampLine]) -> f64 {
    if lines.len() < 2 {
        return 0.0;
    }
    let mut gaps: Vec<u32> = lines
        .windows(2)
        .map(|pair| pair[1].offset_s.saturating_sub(pair[0].offset_s))
        .collect();
    gaps.sort_unstable();
    let median = if gaps.len() % 2 == 1 {
        gaps[gaps.len() / 2] as f64
    } else {
        let mid = gaps.len() / 2;
        (gaps[mid - 1] as f64 + gaps[mid] as f64) / 2.0
    };

    if (120.0..=420.0).contains(&median) {
        1.0
    } else if median < 30.0 || median > 1200.0 {
        0.0
    } else if median < 120.0 {
        (median - 30.0) / (120.0 - 30.0)
    } else {
        (1200.0 - median) / (1200.0 - 420.0)
    }
}

fn quality_score(lines: &[TimestampLine]) -> f64 {
    if lines.is_empty() {
        return 0.0;
    }
    let with_artist = lines.iter().filter(|l| l.artist.is_some()).count();
    let artist_ratio = with_artist as f64 / lines.len() as f64;
    let count_term = (lines.len() as f64 / 15.0).min(1.0);
    0.5 * artist_ratio + 0.3 * count_term + 0.2 * density_term(lines)
}

/// Counts lines in `text` that contain a valid time anchor, independent of
/// payload/monotonicity filtering. Used by the confidence scorer's "comment
/// corpus looks timestamped" signal, which cares about raw anchor density
/// rather than any single comment's parsed candidate.
pub fn count_anchor_lines(text: &str) -> usize {
    text.lines().filter(|line| find_anchor(line).is_some()).count()
}

/// Parses free text into a `CandidateSetlist`. Lines without a time anchor,
/// or whose payload is empty after anchor stripping, are skipped (not an
/// error — spec.md §7 `ParseError` is a per-line drop, not a propagated
/// failure).
pub fn parse_candidate(text: &str, origin: Origin) -> CandidateSetlist {
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        let Some(anchor) = find_anchor(raw_line) else {
            continue;
        };
        let Some(payload) = extract_payload(raw_line, &anchor) else {
            continue;
        };
        let (song, artist) = split_song_artist(&payload);
        lines.push(TimestampLine {
            offset_s: anchor.offset_s,
            song,
            artist,
            raw: raw_line.to_string(),
        });
    }

    let lines = apply_monotonicity_filter(lines);
    let quality = quality_score(&lines);
    CandidateSetlist { origin, lines, quality }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_slash_setlist() {
        let text = "0:00 opening\n1:23 夜に駆ける / YOASOBI\n5:47 千本桜 / 初音ミク\n";
        let candidate = parse_candidate(text, Origin::Description);
        assert_eq!(candidate.lines.len(), 3);
        assert_eq!(candidate.lines[1].song, "夜に駆ける");
        assert_eq!(candidate.lines[1].artist.as_deref(), Some("YOASOBI"));
        assert_eq!(candidate.lines[2].song, "千本桜");
        assert_eq!(candidate.lines[2].artist.as_deref(), Some("初音ミク"));
        assert_eq!(candidate.lines[0].artist, None);
    }

    #[test]
    fn out_of_order_entry_beyond_tolerance_is_dropped() {
        let text = "0:00 a / x\n1:00 b / y\n0:50 c / z\n2:00 d / w\n";
        let candidate = parse_candidate(text, Origin::Description);
        let songs: Vec<&str> = candidate.lines.iter().map(|l| l.song.as_str()).collect();
        assert_eq!(songs, vec!["a", "b", "d"]);
    }

    #[test]
    fn within_tolerance_regression_is_retained() {
        let text = "1:00 a / x\n0:56 b / y\n";
        let candidate = parse_candidate(text, Origin::Description);
        assert_eq!(candidate.lines.len(), 2);
    }

    #[test]
    fn equal_offsets_collapse_to_first() {
        let text = "1:00 a / x\n1:00 b / y\n";
        let candidate = parse_candidate(text, Origin::Description);
        assert_eq!(candidate.lines.len(), 1);
        assert_eq!(candidate.lines[0].song, "a");
    }

    #[test]
    fn splits_on_hyphen_separator() {
        let (song, artist) = split_song_artist("夜に駆ける - YOASOBI");
        assert_eq!(song, "夜に駆ける");
        assert_eq!(artist.as_deref(), Some("YOASOBI"));
    }

    #[test]
    fn splits_on_by_case_insensitive() {
        let (song, artist) = split_song_artist("Lemon by Kenshi Yonezu");
        assert_eq!(song, "Lemon");
        assert_eq!(artist.as_deref(), Some("Kenshi Yonezu"));
    }

    #[test]
    fn splits_on_trailing_parenthetical_artist() {
        let (song, artist) = split_song_artist("マリーゴールド(あいみょん)");
        assert_eq!(song, "マリーゴールド");
        assert_eq!(artist.as_deref(), Some("あいみょん"));
    }

    #[test]
    fn trailing_parenthetical_with_embedded_timestamp_is_not_treated_as_artist() {
        let (song, artist) = split_song_artist("replay (1:23 edit)");
        assert_eq!(song, "replay (1:23 edit)");
        assert_eq!(artist, None);
    }

    #[test]
    fn payload_with_multiple_slashes_falls_through_to_song_only() {
        let (song, artist) = split_song_artist("a / b / c");
        assert_eq!(song, "a / b / c");
        assert_eq!(artist, None);
    }

    #[test]
    fn empty_payload_after_anchor_drops_the_line() {
        let text = "0:00\n1:23 song / artist\n";
        let candidate = parse_candidate(text, Origin::Description);
        assert_eq!(candidate.lines.len(), 1);
    }

    #[test]
    fn hour_anchor_is_parsed() {
        let text = "1:02:03 long song / artist\n";
        let candidate = parse_candidate(text, Origin::Description);
        assert_eq!(candidate.lines[0].offset_s, 3723);
    }

    #[test]
    fn hours_above_23_are_not_an_hms_anchor() {
        // 24:00:00 is not a valid HMS anchor; falls back to treating
        // "24:00" as an M:SS-style anchor (minutes=24, seconds=00) if at
        // all, and ":00" is then stray text consumed as part of payload.
        let anchor = find_anchor("24:00:00 song / artist");
        assert!(anchor.is_some());
        assert_eq!(anchor.unwrap().offset_s, 24 * 60);
    }

    #[test]
    fn quality_rewards_artist_ratio_count_and_density() {
        let mut text = String::new();
        for i in 0..15u32 {
            let offset = i * 240;
            text.push_str(&format!("{}:{:02} song{i} / artist{i}\n", offset / 60, offset % 60));
        }
        let candidate = parse_candidate(&text, Origin::Description);
        assert_eq!(candidate.lines.len(), 15);
        assert!(candidate.quality > 0.9, "quality was {}", candidate.quality);
    }

    #[test]
    fn low_density_and_no_artists_yields_low_quality() {
        let text = "0:00 a\n0:05 b\n";
        let candidate = parse_candidate(text, Origin::Description);
        assert!(candidate.quality < 0.2, "quality was {}", candidate.quality);
    }
}
