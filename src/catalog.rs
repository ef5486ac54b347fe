#![forbid(unsafe_code)]

//! The canonical catalog store (C6): an ordered `CatalogRow` sequence with
//! load/merge/dedupe/sort/save over a UTF-8-BOM, RFC-4180 CSV file. The
//! header is a stability contract (spec.md §6) — never reorder or rename
//! its columns.

use crate::error::{AppError, Result};
use crate::fslock;
use crate::normalize::{normalize_artist, normalize_song};
use crate::timefmt;
use std::collections::HashMap;
use std::path::Path;

pub const HEADER: [&str; 10] = [
    "No", "曲", "歌手-ユニット", "検索用", "ジャンル", "タイムスタンプ", "配信日", "動画ID",
    "確度スコア", "チャンネルID",
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub song: String,
    pub artist: Option<String>,
    pub genre: String,
    pub offset_s: u32,
    /// ISO-8601 date (`YYYY-MM-DD`), already converted to JST (UTC+9).
    pub stream_date: String,
    pub video_id: String,
    pub channel_id: String,
    pub confidence: f64,
}

impl CatalogRow {
    fn key(&self) -> (String, u32) {
        (self.video_id.clone(), self.offset_s)
    }

    fn normalized_song(&self) -> String {
        normalize_song(&self.song)
    }

    fn normalized_artist(&self) -> String {
        normalize_artist(self.artist.as_deref().unwrap_or(""))
    }

    fn dedupe_key(&self) -> (String, String, String) {
        (self.normalized_song(), self.normalized_artist(), self.video_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    DateDesc,
    DateAsc,
    SongAsc,
    ArtistAsc,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rows: Vec<CatalogRow>,
}

impl Catalog {
    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Missing file is an empty catalog, not an error — a first run has
    /// nothing to load yet.
    pub fn load(path: &Path) -> Result<Catalog> {
        if !path.exists() {
            return Ok(Catalog::default());
        }
        let bytes = std::fs::read(path)?;
        let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(content);

        let mut rows = Vec::new();
        let mut seen_keys = std::collections::HashSet::new();
        for record in reader.records() {
            let record = record?;
            let row = row_from_record(&record)?;
            let key = row.key();
            if !seen_keys.insert(key.clone()) {
                return Err(AppError::Integrity(format!(
                    "duplicate primary key (video_id={}, offset_s={}) in {}",
                    key.0,
                    key.1,
                    path.display()
                )));
            }
            rows.push(row);
        }
        Ok(Catalog { rows })
    }

    /// Inserts rows whose `(video_id, offset_s)` is absent; updates rows
    /// sharing a key only when the incoming row strictly improves on it
    /// (higher confidence, or fills a previously-empty artist).
    pub fn merge(&mut self, new_rows: Vec<CatalogRow>) {
        let mut index: HashMap<(String, u32), usize> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.key(), i))
            .collect();

        for new_row in new_rows {
            match index.get(&new_row.key()) {
                Some(&existing_idx) => {
                    let existing = &self.rows[existing_idx];
                    let improves_confidence = new_row.confidence > existing.confidence;
                    let fills_empty_artist = existing.artist.is_none() && new_row.artist.is_some();
                    if improves_confidence || fills_empty_artist {
                        self.rows[existing_idx] = new_row;
                    }
                }
                None => {
                    let key = new_row.key();
                    index.insert(key, self.rows.len());
                    self.rows.push(new_row);
                }
            }
        }
    }

    /// Collapses rows where `(normalized_song, normalized_artist,
    /// video_id)` collide into the highest-confidence survivor, tie-broken
    /// by earliest `offset_s`.
    pub fn dedupe_global(&mut self) {
        let mut best: HashMap<(String, String, String), usize> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            let dedupe_key = row.dedupe_key();
            match best.get(&dedupe_key) {
                None => {
                    best.insert(dedupe_key, i);
                }
                Some(&current_idx) => {
                    let current = &self.rows[current_idx];
                    let replace = row.confidence > current.confidence
                        || (row.confidence == current.confidence && row.offset_s < current.offset_s);
                    if replace {
                        best.insert(dedupe_key, i);
                    }
                }
            }
        }
        let mut kept_indices: Vec<usize> = best.into_values().collect();
        kept_indices.sort_unstable();
        let rows = std::mem::take(&mut self.rows);
        self.rows = kept_indices.into_iter().map(|i| rows[i].clone()).collect();
    }

    /// Locale-aware ordering is approximated with a code-point comparison
    /// over the normalized fields (see DESIGN.md OQ-2: no Japanese
    /// collation crate appears anywhere in the reference corpus).
    pub fn sort(&mut self, order: SortOrder) {
        match order {
            SortOrder::DateDesc => self.rows.sort_by(|a, b| b.stream_date.cmp(&a.stream_date)),
            SortOrder::DateAsc => self.rows.sort_by(|a, b| a.stream_date.cmp(&b.stream_date)),
            SortOrder::SongAsc => self.rows.sort_by(|a, b| a.normalized_song().cmp(&b.normalized_song())),
            SortOrder::ArtistAsc => self.rows.sort_by(|a, b| a.normalized_artist().cmp(&b.normalized_artist())),
        }
    }

    /// Write-temp-then-rename, guarded by the advisory file lock — atomic
    /// against concurrent readers and other writers.
    pub fn save(&self, path: &Path) -> Result<()> {
        let _guard = fslock::acquire(path)?;
        let mut bytes = UTF8_BOM.to_vec();
        let mut writer = csv::WriterBuilder::new().from_writer(&mut bytes);
        writer.write_record(HEADER)?;
        for (i, row) in self.rows.iter().enumerate() {
            writer.write_record([
                (i + 1).to_string(),
                row.song.clone(),
                row.artist.clone().unwrap_or_default(),
                row.normalized_song(),
                row.genre.clone(),
                timefmt::render(row.offset_s),
                row.stream_date.clone(),
                row.video_id.clone(),
                format!("{:.2}", row.confidence),
                row.channel_id.clone(),
            ])?;
        }
        writer.flush().map_err(|err| AppError::Io(err.to_string()))?;
        drop(writer);
        fslock::write_atomic(path, &bytes)
    }
}

fn row_from_record(record: &csv::StringRecord) -> Result<CatalogRow> {
    let field = |idx: usize, name: &str| -> Result<&str> {
        record
            .get(idx)
            .ok_or_else(|| AppError::Integrity(format!("catalog row missing column {name}")))
    };

    let song = field(1, "曲")?.to_string();
    let artist_raw = field(2, "歌手-ユニット")?;
    let artist = if artist_raw.is_empty() { None } else { Some(artist_raw.to_string()) };
    let genre = field(4, "ジャンル")?.to_string();
    let timestamp = field(5, "タイムスタンプ")?;
    let offset_s = timefmt::parse(timestamp)
        .ok_or_else(|| AppError::Integrity(format!("unparseable timestamp {timestamp:?}")))?;
    let stream_date = field(6, "配信日")?.to_string();
    let video_id = field(7, "動画ID")?.to_string();
    let confidence: f64 = field(8, "確度スコア")?
        .parse()
        .map_err(|_| AppError::Integrity("confidence column is not a number".to_string()))?;
    let channel_id = field(9, "チャンネルID")?.to_string();

    Ok(CatalogRow {
        song,
        artist,
        genre,
        offset_s,
        stream_date,
        video_id,
        channel_id,
        confidence,
    })
}
