#![forbid(unsafe_code)]

//! Chooses the single best `CandidateSetlist` for a video out of the
//! description candidate (if any) and the per-comment candidates. Pure
//! function: no I/O, no shared state.

use crate::timestamp_parser::{CandidateSetlist, Origin, TimestampLine};

const MIN_COMMENT_LINES: usize = 3;
const DESCRIPTION_QUALITY_THRESHOLD: f64 = 0.6;
const DESCRIPTION_MIN_LINES: usize = 5;

#[derive(Debug, Clone)]
pub struct SelectedSetlist {
    pub origin: Origin,
    pub lines: Vec<TimestampLine>,
}

/// Picks one setlist per spec.md §4.3 rules 1–4. Returns `None` when no
/// candidate clears the 3-line bar (the video is still confidence-scored,
/// it just yields no catalog rows).
pub fn select(
    description: Option<&CandidateSetlist>,
    comments: &[CandidateSetlist],
) -> Option<SelectedSetlist> {
    if let Some(desc) = description
        && desc.quality >= DESCRIPTION_QUALITY_THRESHOLD
        && desc.lines.len() >= DESCRIPTION_MIN_LINES
    {
        return Some(SelectedSetlist {
            origin: desc.origin.clone(),
            lines: desc.lines.clone(),
        });
    }

    let eligible: Vec<&CandidateSetlist> = comments
        .iter()
        .filter(|c| c.lines.len() >= MIN_COMMENT_LINES)
        .collect();

    let best = eligible.into_iter().max_by(|a, b| rank_order(a, b))?;

    Some(SelectedSetlist {
        origin: best.origin.clone(),
        lines: best.lines.clone(),
    })
}

fn like_count(candidate: &CandidateSetlist) -> u64 {
    match candidate.origin {
        Origin::Comment { like_count, .. } => like_count,
        Origin::Description => 0,
    }
}

fn published_at(candidate: &CandidateSetlist) -> Option<chrono::DateTime<chrono::Utc>> {
    match candidate.origin {
        Origin::Comment { published_at, .. } => Some(published_at),
        Origin::Description => None,
    }
}

fn rank(candidate: &CandidateSetlist) -> f64 {
    candidate.quality + 0.1 * (1.0 + like_count(candidate) as f64).log10()
}

/// Total order for `max_by`: rank, then (a) more lines, (b) earlier
/// publish time, (c) lexicographically smaller origin tag — each only
/// consulted to break a tie in the previous criterion.
fn rank_order(a: &CandidateSetlist, b: &CandidateSetlist) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match rank(a).partial_cmp(&rank(b)).unwrap_or(Ordering::Equal) {
        Ordering::Equal => {}
        other => return other,
    }

    match a.lines.len().cmp(&b.lines.len()) {
        Ordering::Equal => {}
        other => return other,
    }

    match (published_at(a), published_at(b)) {
        (Some(pa), Some(pb)) => match pb.cmp(&pa) {
            Ordering::Equal => {}
            other => return other,
        },
        _ => {}
    }

    // Lexicographically *smaller* tag wins: reverse the natural ordering
    // so `max_by` (which keeps the greater element) keeps it.
    b.origin.tag().cmp(&a.origin.tag())
}
