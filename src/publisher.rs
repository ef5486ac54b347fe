#![forbid(unsafe_code)]

//! Projects the catalog into the front-end-facing JSON documents (C8):
//! the singing-only bucket, the all-mode bucket, and the channel list.
//! Every write is atomic.

use crate::catalog::{Catalog, CatalogRow};
use crate::config::ChannelConfig;
use crate::error::Result;
use crate::fslock;
use crate::timefmt;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PublishedRow {
    #[serde(rename = "曲")]
    song: String,
    #[serde(rename = "歌手-ユニット")]
    artist: String,
    #[serde(rename = "検索用")]
    normalized_song: String,
    #[serde(rename = "ジャンル")]
    genre: String,
    #[serde(rename = "タイムスタンプ")]
    timestamp_hms: String,
    #[serde(rename = "配信日")]
    stream_date: String,
    #[serde(rename = "動画ID")]
    video_id: String,
    #[serde(rename = "確度スコア")]
    confidence: f64,
    #[serde(rename = "チャンネルID")]
    channel_id: String,
}

impl From<&CatalogRow> for PublishedRow {
    fn from(row: &CatalogRow) -> Self {
        PublishedRow {
            song: row.song.clone(),
            artist: row.artist.clone().unwrap_or_default(),
            normalized_song: crate::normalize::normalize_song(&row.song),
            genre: row.genre.clone(),
            timestamp_hms: timefmt::render(row.offset_s),
            stream_date: row.stream_date.clone(),
            video_id: row.video_id.clone(),
            confidence: row.confidence,
            channel_id: row.channel_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TimestampsDocument {
    last_updated: DateTime<Utc>,
    total_count: usize,
    timestamps: Vec<PublishedRow>,
}

#[derive(Debug, Serialize)]
struct PublishedChannel {
    id: String,
    name: String,
    thumbnail_url: Option<String>,
}

/// Writes `timestamps_singing.json`, `timestamps_all.json`, and
/// `channels.json` under `out_dir`. `run_started_at` becomes
/// `last_updated` in both timestamp documents. `singing_threshold` is the
/// operator-configured `RunConfig.confidence_threshold` (run.toml); a row
/// lands in the singing bucket iff its confidence is `>= singing_threshold`.
pub fn publish(
    catalog: &Catalog,
    channels: &[ChannelConfig],
    out_dir: &std::path::Path,
    run_started_at: DateTime<Utc>,
    singing_threshold: f64,
) -> Result<()> {
    let all_rows: Vec<PublishedRow> = catalog.rows().iter().map(PublishedRow::from).collect();
    let singing_rows: Vec<PublishedRow> = catalog
        .rows()
        .iter()
        .filter(|row| row.confidence >= singing_threshold)
        .map(PublishedRow::from)
        .collect();

    let all_doc = TimestampsDocument {
        last_updated: run_started_at,
        total_count: all_rows.len(),
        timestamps: all_rows,
    };
    let singing_doc = TimestampsDocument {
        last_updated: run_started_at,
        total_count: singing_rows.len(),
        timestamps: singing_rows,
    };
    let channels_doc: Vec<PublishedChannel> = channels
        .iter()
        .map(|c| PublishedChannel {
            id: c.channel_id.clone(),
            name: c.name.clone(),
            thumbnail_url: None,
        })
        .collect();

    std::fs::create_dir_all(out_dir)?;
    fslock::write_atomic(&out_dir.join("timestamps_all.json"), &serde_json::to_vec_pretty(&all_doc)?)?;
    fslock::write_atomic(
        &out_dir.join("timestamps_singing.json"),
        &serde_json::to_vec_pretty(&singing_doc)?,
    )?;
    fslock::write_atomic(&out_dir.join("channels.json"), &serde_json::to_vec_pretty(&channels_doc)?)?;
    Ok(())
}
