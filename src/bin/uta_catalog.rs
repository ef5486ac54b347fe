#![forbid(unsafe_code)]

//! CLI entrypoint. Four subcommands over the same persisted state:
//! `update` (incremental), `backfill` (ignore watermark), `publish`
//! (re-derive the front-end JSONs only), `classify-recheck` (re-run the
//! genre classifier over the existing catalog).

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use uta_catalog::catalog::Catalog;
use uta_catalog::config::{self, RuntimeOverrides};
use uta_catalog::error::{AppError, Result};
use uta_catalog::genre::{GenreCache, NullMetadataLookup};
use uta_catalog::orchestrator::{Orchestrator, RateLimiter};
use uta_catalog::platform_client::{QuotaCounter, UreqPlatformClient};
use uta_catalog::security::ensure_not_root;

#[derive(Parser)]
#[command(name = "uta-catalog", about = "Song setlist extraction and catalog builder")]
struct Cli {
    #[arg(long)]
    config_dir: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Incremental run: each channel resumes from its stored watermark.
    Update,
    /// Ignores watermarks; re-walks every enabled channel from the epoch.
    Backfill {
        /// Restrict the backfill to a single channel id.
        #[arg(long)]
        channel: Option<String>,
    },
    /// Re-derives the published JSONs from the existing catalog only.
    Publish,
    /// Re-runs genre classification over every row in the existing catalog.
    ClassifyRecheck,
}

const CHANNELS_FILE: &str = "channels.toml";
const GENRES_FILE: &str = "genres.toml";
const RUN_FILE: &str = "run.toml";
const WATERMARKS_FILE: &str = "watermarks.json";
const CATALOG_FILE: &str = "catalog.csv";
const GENRE_CACHE_FILE: &str = "genre_cache.json";
const OUT_DIR: &str = "out";
const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> Result<()> {
    ensure_not_root("uta-catalog").map_err(|err| AppError::Config(err.to_string()))?;
    let cli = Cli::parse();

    let runtime_paths = config::resolve_runtime_paths(RuntimeOverrides {
        config_dir: cli.config_dir.clone(),
        data_dir: cli.data_dir.clone(),
        env_path: None,
    })?;

    let channels = config::load_channels(&runtime_paths.config_dir.join(CHANNELS_FILE))?;
    let run_config = config::load_run_config(&runtime_paths.config_dir.join(RUN_FILE))?;
    let watermark_path = runtime_paths.data_dir.join(WATERMARKS_FILE);
    let catalog_path = runtime_paths.data_dir.join(CATALOG_FILE);
    let out_dir = runtime_paths.data_dir.join(OUT_DIR);

    match cli.command {
        Command::Update | Command::Backfill { .. } => {
            let ignore_watermark = matches!(cli.command, Command::Backfill { .. });
            let channels = match &cli.command {
                Command::Backfill { channel: Some(id) } => {
                    channels.into_iter().filter(|c| &c.channel_id == id).collect()
                }
                _ => channels,
            };

            let genre_config = config::load_genre_config(&runtime_paths.config_dir.join(GENRES_FILE))?;
            let genre_cache = GenreCache::load(&runtime_paths.data_dir.join(GENRE_CACHE_FILE))?;
            let api_key = run_config.api_key()?;
            let quota = Arc::new(QuotaCounter::new(run_config.daily_quota_units));
            let client = Arc::new(UreqPlatformClient::new(API_BASE_URL.to_string(), api_key, quota.clone()));
            let rate_limiter = Arc::new(RateLimiter::new(10.0));

            let orchestrator = Orchestrator {
                client,
                quota,
                rate_limiter,
                run_config: run_config.clone(),
                genre_config: Arc::new(genre_config),
                genre_cache: Arc::new(genre_cache),
                metadata_lookup: Arc::new(NullMetadataLookup),
                cancelled: Arc::new(AtomicBool::new(false)),
            };

            let run_started_at = Utc::now();
            let outcome = orchestrator
                .run(channels, &watermark_path, &catalog_path, &out_dir, run_started_at, ignore_watermark)
                .await?;

            eprintln!("run summary:");
            for (channel_id, state) in &outcome.channel_states {
                eprintln!("  {channel_id}: {state:?}");
            }
            if outcome.exit_code != 0 {
                return Err(AppError::QuotaExceeded(
                    "one or more channels hit the daily quota ceiling".to_string(),
                ));
            }
            Ok(())
        }

        Command::Publish => {
            let catalog = Catalog::load(&catalog_path)?;
            uta_catalog::publisher::publish(
                &catalog,
                &channels,
                &out_dir,
                Utc::now(),
                run_config.confidence_threshold,
            )?;
            println!("published {} rows from the existing catalog", catalog.len());
            Ok(())
        }

        Command::ClassifyRecheck => {
            let genre_config = config::load_genre_config(&runtime_paths.config_dir.join(GENRES_FILE))?;
            let genre_cache = GenreCache::load(&runtime_paths.data_dir.join(GENRE_CACHE_FILE))?;
            let mut catalog = Catalog::load(&catalog_path)?;
            let mut changed = 0usize;
            let reclassified: Vec<_> = catalog
                .rows()
                .iter()
                .cloned()
                .map(|mut row| {
                    let genre = uta_catalog::genre::classify(
                        &genre_config,
                        &genre_cache,
                        &NullMetadataLookup,
                        row.artist.as_deref(),
                        &row.song,
                        Utc::now(),
                    )
                    .unwrap_or(row.genre.clone());
                    if genre != row.genre {
                        changed += 1;
                        row.genre = genre;
                    }
                    row
                })
                .collect();
            catalog = Catalog::default();
            catalog.merge(reclassified);
            catalog.save(&catalog_path)?;
            println!("reclassified {changed} row(s)");
            Ok(())
        }
    }
}
