#![forbid(unsafe_code)]

//! Genre classification (C5): an ordered, deterministic rule engine with an
//! optional external metadata lookup as a pure tie-breaker, backed by a
//! persistent TTL cache.

use crate::config::GenreConfig;
use crate::error::{AppError, Result};
use crate::fslock;
use crate::normalize::normalize;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_GENRE: &str = "その他";
const DEFAULT_TTL_DAYS: i64 = 30;

/// Collaborator for the optional external metadata lookup (spec.md §4.5
/// rule 4, §9 "external metadata fallback"). Disabled by default via
/// `NullMetadataLookup` so rules 1–3 and the default rule 5 stay fully
/// deterministic and network-free.
pub trait MetadataLookup: Send + Sync {
    fn lookup(&self, artist: &str, song: &str) -> Result<Option<Vec<String>>>;
}

pub struct NullMetadataLookup;

impl MetadataLookup for NullMetadataLookup {
    fn lookup(&self, _artist: &str, _song: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    genre: String,
    fetched_at: DateTime<Utc>,
    ttl_days: i64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > Duration::days(self.ttl_days)
    }
}

/// `genre_cache.json`: `{ "artist_lower|song_lower": { genre, fetched_at,
/// ttl_days } }`. Writes serialize through a process-local mutex plus the
/// cross-process `fslock` advisory lock, then write-temp-then-rename of
/// the whole file — append-safe under concurrent runs per spec.md §4.5.
pub struct GenreCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl GenreCache {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        Ok(GenreCache {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn cache_key(artist: &str, song: &str) -> String {
        format!("{}|{}", normalize(artist), normalize(song))
    }

    fn get_fresh(&self, artist: &str, song: &str, now: DateTime<Utc>) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(&Self::cache_key(artist, song))?;
        if entry.is_expired(now) {
            None
        } else {
            Some(entry.genre.clone())
        }
    }

    fn put(&self, artist: &str, song: &str, genre: &str, now: DateTime<Utc>) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            entries.insert(
                Self::cache_key(artist, song),
                CacheEntry {
                    genre: genre.to_string(),
                    fetched_at: now,
                    ttl_days: DEFAULT_TTL_DAYS,
                },
            );
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        let _guard = fslock::acquire(&self.path)?;
        let entries = self.entries.lock();
        let json = serde_json::to_vec_pretty(&*entries)?;
        fslock::write_atomic(&self.path, &json)
    }
}

/// Classifies `(artist, song)` per spec.md §4.5, rules 1–5 in order.
/// `now` is threaded in (rather than read from the clock) so cache
/// expiry is deterministic in tests.
pub fn classify(
    config: &GenreConfig,
    cache: &GenreCache,
    lookup: &dyn MetadataLookup,
    artist: Option<&str>,
    song: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    if let Some(artist) = artist
        && let Some(genre) = config.artist_to_genre.get(artist)
    {
        return Ok(genre.clone());
    }

    let normalized_artist = artist.map(normalize).unwrap_or_default();
    let normalized_song = normalize(song);

    // `config.categories` is declaration-ordered (see `CategoryEntry` doc
    // comment), so this loop is deterministic run to run — unlike iterating
    // a `HashMap` would be.
    for entry in &config.categories {
        for keywords in entry.buckets.buckets.values() {
            for keyword in keywords {
                let needle = normalize(keyword);
                if needle.is_empty() {
                    continue;
                }
                if normalized_artist.contains(&needle) || normalized_song.contains(&needle) {
                    return Ok(entry.label.clone());
                }
            }
        }
    }

    if let Some(genre) = config.song_to_genre.get(song) {
        return Ok(genre.clone());
    }

    if let Some(artist) = artist {
        if let Some(genre) = cache.get_fresh(artist, song, now) {
            return Ok(genre);
        }
        if let Some(tags) = lookup.lookup(artist, song)?
            && let Some(first) = tags.first()
        {
            cache.put(artist, song, first, now)?;
            return Ok(first.clone());
        }
    }

    Ok(DEFAULT_GENRE.to_string())
}
