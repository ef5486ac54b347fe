#![forbid(unsafe_code)]

//! The incremental orchestrator (C7): drives C1 → C6 per channel,
//! watermark-gated, bounded to `max_parallel_channels` concurrent channel
//! workers sharing one rate limiter and one quota counter. Grounded on the
//! teacher's `routine_update` per-channel loop, generalized from a single
//! sequential pass into a bounded-concurrency worker pool.

use crate::catalog::{Catalog, CatalogRow};
use crate::confidence::{self, ConfidenceInputs};
use crate::config::{ChannelConfig, GenreConfig, RunConfig};
use crate::error::Result;
use crate::genre::{self, GenreCache, MetadataLookup};
use crate::platform_client::{Comment, PlatformClient, QuotaCounter, Video};
use crate::setlist_selector::{self, SelectedSetlist};
use crate::timestamp_parser::{self, Origin};
use crate::watermark::{RunStatus, Watermark, WatermarkStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Simple token bucket shared by every channel worker, guarded the same
/// way the teacher guards its in-memory counters (`parking_lot::Mutex`).
pub struct RateLimiter {
    tokens: Mutex<f64>,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Mutex<std::time::Instant>,
}

impl RateLimiter {
    pub fn new(units_per_sec: f64) -> Self {
        RateLimiter {
            tokens: Mutex::new(units_per_sec),
            capacity: units_per_sec,
            refill_per_sec: units_per_sec,
            last_refill: Mutex::new(std::time::Instant::now()),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let elapsed = last.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let mut tokens = self.tokens.lock();
            *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
            *last = std::time::Instant::now();
        }
    }

    /// Blocks (via short sleeps) until a token is available. Called from
    /// `spawn_blocking` contexts only — never from the async scheduler
    /// directly, per spec.md §5's list of suspension points.
    pub fn acquire_blocking(&self) {
        loop {
            self.refill();
            let mut tokens = self.tokens.lock();
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return;
            }
            drop(tokens);
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Pending,
    Running,
    Ok,
    Partial,
    Failed,
}

struct ChannelOutcome {
    channel_id: String,
    state: ChannelState,
    rows: Vec<CatalogRow>,
    advanced: Option<(DateTime<Utc>, String)>,
    error: Option<String>,
}

pub struct RunOutcome {
    pub exit_code: i32,
    pub channel_states: Vec<(String, ChannelState)>,
}

pub struct Orchestrator<C: PlatformClient + 'static, L: MetadataLookup + 'static> {
    pub client: Arc<C>,
    pub quota: Arc<QuotaCounter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub run_config: RunConfig,
    pub genre_config: Arc<GenreConfig>,
    pub genre_cache: Arc<GenreCache>,
    pub metadata_lookup: Arc<L>,
    pub cancelled: Arc<AtomicBool>,
}

impl<C: PlatformClient + 'static, L: MetadataLookup + 'static> Orchestrator<C, L> {
    /// Runs spec.md §4.7 steps 1–6 over `channels`, persisting watermarks
    /// and the merged catalog, then invoking the publisher. `ignore_watermark`
    /// implements the `backfill` CLI subcommand (treat every channel as a
    /// first run).
    pub async fn run(
        &self,
        channels: Vec<ChannelConfig>,
        watermark_path: &Path,
        catalog_path: &Path,
        out_dir: &Path,
        run_started_at: DateTime<Utc>,
        ignore_watermark: bool,
    ) -> Result<RunOutcome> {
        let watermark_store = Arc::new(Mutex::new(WatermarkStore::load(watermark_path)?));
        let semaphore = Arc::new(Semaphore::new(self.run_config.max_parallel_channels));
        let quota_exceeded = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();
        for channel in channels.iter().filter(|c| c.enabled).cloned() {
            let semaphore = semaphore.clone();
            let quota_exceeded = quota_exceeded.clone();
            let watermark_store = watermark_store.clone();
            let client = self.client.clone();
            let quota = self.quota.clone();
            let rate_limiter = self.rate_limiter.clone();
            let genre_config = self.genre_config.clone();
            let genre_cache = self.genre_cache.clone();
            let metadata_lookup = self.metadata_lookup.clone();
            let cancelled = self.cancelled.clone();
            let comments_per_video = self.run_config.comments_per_video;

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");

                if quota_exceeded.load(Ordering::SeqCst) || cancelled.load(Ordering::SeqCst) {
                    return ChannelOutcome {
                        channel_id: channel.channel_id.clone(),
                        state: ChannelState::Partial,
                        rows: Vec::new(),
                        advanced: None,
                        error: None,
                    };
                }

                let since = if ignore_watermark {
                    DateTime::<Utc>::from_timestamp(0, 0).unwrap()
                } else {
                    watermark_store.lock().get_or_initial(&channel.channel_id, DateTime::<Utc>::from_timestamp(0, 0).unwrap()).last_published_at
                };

                let outcome = tokio::task::spawn_blocking(move || {
                    process_channel(
                        channel.channel_id.clone(),
                        since,
                        client.as_ref(),
                        &quota,
                        &rate_limiter,
                        &genre_config,
                        genre_cache.as_ref(),
                        metadata_lookup.as_ref(),
                        comments_per_video,
                        &cancelled,
                    )
                })
                .await
                .expect("channel worker panicked");

                if outcome.state == ChannelState::Failed {
                    quota_exceeded.store(true, Ordering::SeqCst);
                }

                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(task.await.expect("channel task panicked"));
        }

        let mut all_rows = Vec::new();
        let mut channel_states = Vec::new();
        {
            let mut store = watermark_store.lock();
            for outcome in &outcomes {
                channel_states.push((outcome.channel_id.clone(), outcome.state));
                let previous = store.get_or_initial(&outcome.channel_id, DateTime::<Utc>::from_timestamp(0, 0).unwrap());
                let status = match outcome.state {
                    ChannelState::Ok => RunStatus::Ok,
                    ChannelState::Partial => RunStatus::Partial,
                    ChannelState::Failed => RunStatus::Failed,
                    ChannelState::Pending | ChannelState::Running => RunStatus::Partial,
                };
                let (last_published_at, last_video_id) = if outcome.state == ChannelState::Ok {
                    all_rows.extend(outcome.rows.clone());
                    match &outcome.advanced {
                        Some((published_at, video_id)) => (*published_at, Some(video_id.clone())),
                        None => (previous.last_published_at, previous.last_video_id.clone()),
                    }
                } else {
                    (previous.last_published_at, previous.last_video_id.clone())
                };
                store.set(Watermark {
                    channel_id: outcome.channel_id.clone(),
                    last_run_at: run_started_at,
                    last_video_id,
                    last_published_at,
                    status,
                    last_error: outcome.error.clone(),
                });
            }
            store.save()?;
        }

        let mut catalog = Catalog::load(catalog_path)?;
        catalog.merge(all_rows);
        catalog.dedupe_global();
        catalog.save(catalog_path)?;

        crate::publisher::publish(
            &catalog,
            &channels,
            out_dir,
            run_started_at,
            self.run_config.confidence_threshold,
        )?;

        let exit_code = if quota_exceeded.load(Ordering::SeqCst) { 2 } else { 0 };
        Ok(RunOutcome { exit_code, channel_states })
    }
}

#[allow(clippy::too_many_arguments)]
fn process_channel(
    channel_id: String,
    since: DateTime<Utc>,
    client: &dyn PlatformClient,
    quota: &QuotaCounter,
    rate_limiter: &RateLimiter,
    genre_config: &GenreConfig,
    genre_cache: &GenreCache,
    metadata_lookup: &dyn MetadataLookup,
    comments_per_video: u32,
    cancelled: &AtomicBool,
) -> ChannelOutcome {
    let _ = quota;
    rate_limiter.acquire_blocking();

    let uploads = match client.list_uploads(&channel_id, since) {
        Ok(uploads) => uploads,
        Err(err) => {
            return ChannelOutcome {
                channel_id,
                state: if err.is_quota_exceeded() { ChannelState::Failed } else { ChannelState::Partial },
                rows: Vec::new(),
                advanced: None,
                error: Some(err.to_string()),
            };
        }
    };

    let mut rows = Vec::new();
    let mut advanced = None;

    for upload in uploads {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        rate_limiter.acquire_blocking();
        let videos = match client.get_videos(std::slice::from_ref(&upload.id)) {
            Ok(videos) => videos,
            Err(err) if err.is_quota_exceeded() => {
                return ChannelOutcome {
                    channel_id,
                    state: ChannelState::Failed,
                    rows: Vec::new(),
                    advanced,
                    error: Some(err.to_string()),
                };
            }
            Err(_) => continue,
        };
        let Some(video) = videos.into_iter().next() else { continue };

        rate_limiter.acquire_blocking();
        let comments = match client.list_comments(&video.id, comments_per_video) {
            Ok(comments) => comments,
            Err(err) if err.is_quota_exceeded() => {
                return ChannelOutcome {
                    channel_id,
                    state: ChannelState::Failed,
                    rows: Vec::new(),
                    advanced,
                    error: Some(err.to_string()),
                };
            }
            Err(_) => Vec::new(),
        };

        let video_rows = process_video(&video, &comments, genre_config, genre_cache, metadata_lookup);
        rows.extend(video_rows);
        // `uploads` is reverse-chronological (newest first; see
        // `platform_client::list_uploads`), so the first video actually
        // processed is the most recent one — only that one should set the
        // watermark. Overwriting on every iteration would regress it to the
        // oldest processed upload.
        if advanced.is_none() {
            advanced = Some((video.published_at, video.id.clone()));
        }
    }

    ChannelOutcome {
        channel_id,
        state: ChannelState::Ok,
        rows,
        advanced,
        error: None,
    }
}

fn process_video(
    video: &Video,
    comments: &[Comment],
    genre_config: &GenreConfig,
    genre_cache: &GenreCache,
    metadata_lookup: &dyn MetadataLookup,
) -> Vec<CatalogRow> {
    let description_candidate = timestamp_parser::parse_candidate(&video.description, Origin::Description);
    let comment_candidates: Vec<_> = comments
        .iter()
        .enumerate()
        .map(|(index, comment)| {
            timestamp_parser::parse_candidate(
                &comment.text,
                Origin::Comment {
                    index,
                    like_count: comment.like_count,
                    published_at: comment.published_at,
                },
            )
        })
        .collect();

    let selected = setlist_selector::select(Some(&description_candidate), &comment_candidates);

    let comment_texts: Vec<String> = comments.iter().map(|c| c.text.clone()).collect();
    let confidence = confidence::score(&ConfidenceInputs {
        title: &video.title,
        description: &video.description,
        duration_s: video.duration_s,
        selected: selected.as_ref(),
        comment_texts: &comment_texts,
    });

    let Some(SelectedSetlist { lines, .. }) = selected else {
        return Vec::new();
    };

    let stream_date = video
        .published_at
        .with_timezone(&chrono::FixedOffset::east_opt(9 * 3600).expect("valid fixed offset"))
        .format("%Y-%m-%d")
        .to_string();

    lines
        .into_iter()
        .map(|line| {
            let genre = genre::classify(
                genre_config,
                genre_cache,
                metadata_lookup,
                line.artist.as_deref(),
                &line.song,
                Utc::now(),
            )
            .unwrap_or_else(|_| genre::DEFAULT_GENRE.to_string());

            CatalogRow {
                song: line.song,
                artist: line.artist,
                genre,
                offset_s: line.offset_s,
                stream_date: stream_date.clone(),
                video_id: video.id.clone(),
                channel_id: video.channel_id.clone(),
                confidence,
            }
        })
        .collect()
}
