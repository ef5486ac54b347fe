#![forbid(unsafe_code)]

//! Per-channel watermark store: `{channel_id, last_run_at, last_video_id,
//! last_published_at, status, last_error?}`, persisted as one JSON object
//! keyed by channel id. Grounded on the teacher's `routine_update`
//! progress-tracking file, generalized from a single flat progress counter
//! to a per-channel map and widened from plain-text to JSON.

use crate::error::Result;
use crate::fslock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watermark {
    pub channel_id: String,
    pub last_run_at: DateTime<Utc>,
    pub last_video_id: Option<String>,
    pub last_published_at: DateTime<Utc>,
    pub status: RunStatus,
    pub last_error: Option<String>,
}

impl Watermark {
    fn initial(channel_id: &str, epoch: DateTime<Utc>) -> Watermark {
        Watermark {
            channel_id: channel_id.to_string(),
            last_run_at: epoch,
            last_video_id: None,
            last_published_at: epoch,
            status: RunStatus::Ok,
            last_error: None,
        }
    }
}

pub struct WatermarkStore {
    path: PathBuf,
    watermarks: HashMap<String, Watermark>,
}

impl WatermarkStore {
    pub fn load(path: &Path) -> Result<WatermarkStore> {
        let watermarks = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        Ok(WatermarkStore {
            path: path.to_path_buf(),
            watermarks,
        })
    }

    /// The channel's watermark, or a fresh one anchored at `epoch` (the
    /// first-run sentinel per spec.md §4.7 step 1) if none is on file.
    pub fn get_or_initial(&self, channel_id: &str, epoch: DateTime<Utc>) -> Watermark {
        self.watermarks
            .get(channel_id)
            .cloned()
            .unwrap_or_else(|| Watermark::initial(channel_id, epoch))
    }

    /// Replaces (or inserts) one channel's watermark row. Only the
    /// calling channel's worker ever touches its own row (spec.md §5
    /// shared-resource policy), but the whole file is rewritten atomically
    /// regardless — there is no sub-file granularity on disk.
    pub fn set(&mut self, watermark: Watermark) {
        self.watermarks.insert(watermark.channel_id.clone(), watermark);
    }

    pub fn save(&self) -> Result<()> {
        let _guard = fslock::acquire(&self.path)?;
        let json = serde_json::to_vec_pretty(&self.watermarks)?;
        fslock::write_atomic(&self.path, &json)
    }
}
