#![forbid(unsafe_code)]

//! The video-platform REST client (C1): upload listings, batched video
//! metadata, and top-level comment threads, with retry/backoff/jitter and
//! an advisory quota counter. Blocking by design (`ureq`); the
//! orchestrator bridges it into async via `spawn_blocking`.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::thread::sleep;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_VIDEO_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoRef {
    pub id: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub duration_s: u32,
    pub view_count: u64,
    pub comment_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub video_id: String,
    pub author_hash: Option<String>,
    pub text: String,
    pub like_count: u64,
    pub published_at: DateTime<Utc>,
}

/// The API surface C7 drives. A trait so tests run against a fake
/// implementation with no network dependency.
pub trait PlatformClient: Send + Sync {
    /// Enumerates uploads strictly after `since`, reverse chronological,
    /// stopping at the watermark.
    fn list_uploads(&self, channel_id: &str, since: DateTime<Utc>) -> Result<Vec<VideoRef>>;
    fn get_videos(&self, ids: &[String]) -> Result<Vec<Video>>;
    fn list_comments(&self, video_id: &str, max: u32) -> Result<Vec<Comment>>;
}

/// Advisory per-run quota budget. Tracks estimated unit cost and refuses
/// further calls once the operator-set ceiling is reached, raising
/// `QuotaExceeded` synthetically rather than waiting for the platform to
/// signal it (spec.md §4.1).
pub struct QuotaCounter {
    remaining: Mutex<i64>,
}

impl QuotaCounter {
    pub fn new(daily_quota_units: u64) -> QuotaCounter {
        QuotaCounter {
            remaining: Mutex::new(daily_quota_units as i64),
        }
    }

    pub fn remaining(&self) -> i64 {
        *self.remaining.lock()
    }

    /// Reserves `units`, returning `QuotaExceeded` if the ceiling has
    /// already been reached. Never goes negative-and-silent: the first
    /// call that would overdraw is rejected outright.
    pub fn reserve(&self, units: i64) -> Result<()> {
        let mut remaining = self.remaining.lock();
        if *remaining <= 0 {
            return Err(AppError::QuotaExceeded("daily quota units exhausted".to_string()));
        }
        *remaining -= units;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UploadsPage {
    items: Vec<UploadItem>,
}

#[derive(Debug, Deserialize)]
struct UploadItem {
    id: String,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct VideosPage {
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    channel_id: String,
    title: String,
    description: String,
    published_at: DateTime<Utc>,
    duration_s: u32,
    view_count: u64,
    comment_count: u64,
}

#[derive(Debug, Deserialize)]
struct CommentsPage {
    items: Vec<CommentItem>,
}

#[derive(Debug, Deserialize)]
struct CommentItem {
    author_hash: Option<String>,
    text: String,
    like_count: u64,
    published_at: DateTime<Utc>,
}

/// The production client: a blocking `ureq::Agent` pointed at the
/// platform's REST surface, with the quota counter shared across every
/// channel worker.
pub struct UreqPlatformClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    quota: std::sync::Arc<QuotaCounter>,
}

impl UreqPlatformClient {
    pub fn new(base_url: String, api_key: String, quota: std::sync::Arc<QuotaCounter>) -> Self {
        UreqPlatformClient {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
            base_url,
            api_key,
            quota,
        }
    }

    /// Runs `call` with exponential backoff + jitter on `Transient`
    /// errors, up to `MAX_ATTEMPTS`. `QuotaExceeded` and `NotFound` are
    /// never retried (spec.md §4.1).
    fn with_retry<T>(&self, mut call: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = (BASE_BACKOFF * 2u32.pow(attempt)).min(MAX_BACKOFF);
                    let jitter_ms = fastrand::u64(0..=backoff.as_millis() as u64 / 2);
                    sleep(backoff + Duration::from_millis(jitter_ms));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn classify_response_error(status: u16, body: &str) -> AppError {
        match status {
            403 => AppError::QuotaExceeded(format!("platform returned 403: {body}")),
            404 => AppError::NotFound(format!("platform returned 404: {body}")),
            500..=599 => AppError::Transient(format!("platform returned {status}: {body}")),
            _ => AppError::Transient(format!("unexpected status {status}: {body}")),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, units: i64) -> Result<T> {
        self.quota.reserve(units)?;
        self.with_retry(|| {
            let response = self
                .agent
                .get(&format!("{}{}", self.base_url, path))
                .query("key", &self.api_key)
                .call();
            match response {
                Ok(resp) => resp
                    .into_json::<T>()
                    .map_err(|err| AppError::Parse(format!("malformed JSON response: {err}"))),
                Err(ureq::Error::Status(status, resp)) => {
                    let body = resp.into_string().unwrap_or_default();
                    Err(Self::classify_response_error(status, &body))
                }
                Err(ureq::Error::Transport(transport)) => {
                    Err(AppError::Transient(format!("transport error: {transport}")))
                }
            }
        })
    }
}

impl PlatformClient for UreqPlatformClient {
    fn list_uploads(&self, channel_id: &str, since: DateTime<Utc>) -> Result<Vec<VideoRef>> {
        let path = format!("/channels/{channel_id}/uploads");
        let page: UploadsPage = self.get_json(&path, 1)?;
        Ok(page
            .items
            .into_iter()
            .take_while(|item| item.published_at > since)
            .map(|item| VideoRef {
                id: item.id,
                published_at: item.published_at,
            })
            .collect())
    }

    fn get_videos(&self, ids: &[String]) -> Result<Vec<Video>> {
        let mut videos = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_VIDEO_BATCH) {
            let path = format!("/videos?ids={}", batch.join(","));
            let page: VideosPage = self.get_json(&path, 1)?;
            videos.extend(page.items.into_iter().map(|item| Video {
                id: item.id,
                channel_id: item.channel_id,
                title: item.title,
                description: item.description,
                published_at: item.published_at,
                duration_s: item.duration_s,
                view_count: item.view_count,
                comment_count: item.comment_count,
            }));
        }
        Ok(videos)
    }

    fn list_comments(&self, video_id: &str, max: u32) -> Result<Vec<Comment>> {
        let path = format!("/videos/{video_id}/comments?max={max}");
        let page: CommentsPage = self.get_json(&path, 1)?;
        Ok(page
            .items
            .into_iter()
            .map(|item| Comment {
                video_id: video_id.to_string(),
                author_hash: item.author_hash,
                text: item.text,
                like_count: item.like_count,
                published_at: item.published_at,
            })
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakePlatformClient;
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn quota_counter_rejects_once_exhausted() {
        let quota = QuotaCounter::new(1);
        assert!(quota.reserve(1).is_ok());
        assert!(quota.reserve(1).is_err());
    }

    #[test]
    fn list_uploads_stops_strictly_after_since() {
        let client = FakePlatformClient::new();
        client.uploads.lock().unwrap().insert(
            "UC1".to_string(),
            vec![
                VideoRef { id: "v1".to_string(), published_at: at(100) },
                VideoRef { id: "v2".to_string(), published_at: at(50) },
            ],
        );
        let uploads = client.list_uploads("UC1", at(50)).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].id, "v1");
    }

    #[test]
    fn fake_client_surfaces_quota_exceeded_after_limit() {
        let mut client = FakePlatformClient::new();
        client.quota_exhausted_after = Some(1);
        assert!(client.list_uploads("UC1", at(0)).is_ok());
        let err = client.list_uploads("UC1", at(0)).unwrap_err();
        assert!(err.is_quota_exceeded());
    }
}
