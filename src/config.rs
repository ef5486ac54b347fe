#![forbid(unsafe_code)]

//! Runtime path resolution and the three human-edited config files:
//! channel list, genre keywords, and run config.
//!
//! Path resolution follows the same layering the teacher used for its
//! `media_root`/`www_root` pair (`.env` file, then process environment,
//! then an explicit override, in that precedence order), just generalized
//! from two scalars to the `{config_dir, data_dir}` pair this crate needs.

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub config_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_paths() -> Result<RuntimePaths> {
    resolve_runtime_paths(RuntimeOverrides::default())
}

pub fn resolve_runtime_paths(overrides: RuntimeOverrides) -> Result<RuntimePaths> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_paths_with_overrides(&file_vars, env_var_string, overrides))
}

#[cfg(test)]
fn build_runtime_paths(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimePaths {
    build_runtime_paths_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_paths_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimePaths {
    let config_dir = overrides
        .config_dir
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("UTA_CONFIG_DIR", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());
    let data_dir = overrides
        .data_dir
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("UTA_DATA_DIR", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    RuntimePaths {
        config_dir: PathBuf::from(config_dir),
        data_dir: PathBuf::from(data_dir),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content = fs::read_to_string(path)?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|value| value.strip_suffix('\'')))
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// One entry of `channels.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    pub name: String,
    pub channel_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelFile {
    #[serde(default, rename = "channel")]
    channels: Vec<ChannelConfig>,
}

const CHANNEL_ID_PATTERN_PREFIX: &str = "UC";
const CHANNEL_ID_LEN: usize = 24;

/// Validates `^UC[A-Za-z0-9_-]{22}$` without pulling in the `regex` crate
/// for a single fixed-shape check.
pub fn is_valid_channel_id(id: &str) -> bool {
    if id.len() != CHANNEL_ID_LEN || !id.starts_with(CHANNEL_ID_PATTERN_PREFIX) {
        return false;
    }
    id[2..]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn load_channels(path: &Path) -> Result<Vec<ChannelConfig>> {
    let content = fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("reading {}: {err}", path.display())))?;
    let file: ChannelFile = toml::from_str(&content)
        .map_err(|err| AppError::Config(format!("parsing {}: {err}", path.display())))?;
    for channel in &file.channels {
        if !is_valid_channel_id(&channel.channel_id) {
            return Err(AppError::Config(format!(
                "channel {:?} has an invalid channel_id {:?}",
                channel.name, channel.channel_id
            )));
        }
    }
    Ok(file.channels)
}

/// `genres.toml`: keyword categories, plus direct artist/song overrides.
///
/// `categories` is an array of tables (`[[category]]`), not a map: spec.md
/// §4.5 rule 2 is "first match wins" across categories in a fixed priority
/// order, and a `HashMap` would make that order randomized per process. The
/// declared order in the config file is the priority order.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GenreConfig {
    #[serde(default, rename = "category")]
    pub categories: Vec<CategoryEntry>,
    #[serde(default)]
    pub artist_to_genre: HashMap<String, String>,
    #[serde(default)]
    pub song_to_genre: HashMap<String, String>,
}

/// One `[[category]]` entry: the genre `label` this category maps to, plus
/// named keyword buckets (conventionally `artist`/`song`) checked against
/// the song's artist and title.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CategoryEntry {
    pub label: String,
    #[serde(flatten)]
    pub buckets: CategoryBuckets,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CategoryBuckets {
    #[serde(flatten)]
    pub buckets: HashMap<String, Vec<String>>,
}

pub fn load_genre_config(path: &Path) -> Result<GenreConfig> {
    let content = fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("reading {}: {err}", path.display())))?;
    let config: GenreConfig = toml::from_str(&content)
        .map_err(|err| AppError::Config(format!("parsing {}: {err}", path.display())))?;
    Ok(config)
}

/// `run.toml`: operator-tunable run parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub api_key_env: String,
    #[serde(default = "default_daily_quota")]
    pub daily_quota_units: u64,
    #[serde(default = "default_max_parallel_channels")]
    pub max_parallel_channels: usize,
    #[serde(default = "default_comments_per_video")]
    pub comments_per_video: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_daily_quota() -> u64 {
    10_000
}

fn default_max_parallel_channels() -> usize {
    3
}

fn default_comments_per_video() -> u32 {
    100
}

fn default_confidence_threshold() -> f64 {
    0.7
}

impl RunConfig {
    pub fn api_key(&self) -> Result<String> {
        env::var(&self.api_key_env).map_err(|_| {
            AppError::Config(format!(
                "environment variable {} (named by api_key_env) is not set",
                self.api_key_env
            ))
        })
    }
}

pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let content = fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("reading {}: {err}", path.display())))?;
    let config: RunConfig = toml::from_str(&content)
        .map_err(|err| AppError::Config(format!("parsing {}: {err}", path.display())))?;
    if config.max_parallel_channels == 0 {
        return Err(AppError::Config(
            "max_parallel_channels must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.confidence_threshold) {
        return Err(AppError::Config(
            "confidence_threshold must be within [0.0, 1.0]".to_string(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn load_runtime_paths_defaults_when_unset() {
        let runtime = build_runtime_paths(&HashMap::new(), |_| None);
        assert_eq!(runtime.config_dir, PathBuf::from(DEFAULT_CONFIG_DIR));
        assert_eq!(runtime.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn build_runtime_paths_prefers_env_over_file() {
        let mut file_vars = HashMap::new();
        file_vars.insert("UTA_CONFIG_DIR".to_string(), "/file-config".to_string());
        let runtime = build_runtime_paths(&file_vars, |key| {
            if key == "UTA_CONFIG_DIR" {
                Some("/env-config".to_string())
            } else {
                None
            }
        });
        assert_eq!(runtime.config_dir, PathBuf::from("/env-config"));
    }

    #[test]
    fn build_runtime_paths_override_wins_over_everything() {
        let mut file_vars = HashMap::new();
        file_vars.insert("UTA_DATA_DIR".to_string(), "/file-data".to_string());
        let runtime = build_runtime_paths_with_overrides(
            &file_vars,
            |_| Some("/env-data".to_string()),
            RuntimeOverrides {
                data_dir: Some(PathBuf::from("/override-data")),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(runtime.data_dir, PathBuf::from("/override-data"));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            "export UTA_CONFIG_DIR=\"/cfg\"\nUTA_DATA_DIR='/data'\n# comment\nINVALID\n",
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("UTA_CONFIG_DIR").unwrap(), "/cfg");
        assert_eq!(vars.get("UTA_DATA_DIR").unwrap(), "/data");
        assert!(!vars.contains_key("INVALID"));
    }

    #[test]
    fn valid_channel_ids() {
        assert!(is_valid_channel_id("UC1234567890123456789012"));
        assert!(!is_valid_channel_id("UC12"));
        assert!(!is_valid_channel_id("XX1234567890123456789012"));
        assert!(!is_valid_channel_id("UC1234567890123456789012!"));
    }

    #[test]
    fn load_channels_parses_and_validates() {
        let cfg = make_config(
            r#"
            [[channel]]
            name = "Example"
            channel_id = "UC1234567890123456789012"
            enabled = true
            "#,
        );
        let channels = load_channels(cfg.path()).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "Example");
    }

    #[test]
    fn load_channels_rejects_bad_id() {
        let cfg = make_config(
            r#"
            [[channel]]
            name = "Bad"
            channel_id = "not-a-channel-id"
            "#,
        );
        let err = load_channels(cfg.path()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn load_genre_config_parses_categories_and_maps() {
        let cfg = make_config(
            r#"
            [artist_to_genre]
            "Ado" = "J-POP"

            [[category]]
            label = "Vocaloid"
            artist = ["初音ミク", "鏡音リン"]

            [[category]]
            label = "J-POP"
            song = ["香水"]
            "#,
        );
        let genres = load_genre_config(cfg.path()).unwrap();
        assert_eq!(genres.artist_to_genre.get("Ado").unwrap(), "J-POP");
        assert_eq!(genres.categories[0].label, "Vocaloid");
        assert_eq!(genres.categories[0].buckets.buckets.get("artist").unwrap().len(), 2);
        assert_eq!(genres.categories[1].label, "J-POP");
    }

    #[test]
    fn load_genre_config_preserves_category_declaration_order() {
        let cfg = make_config(
            r#"
            [[category]]
            label = "Zeta"
            artist = ["zzz"]

            [[category]]
            label = "Alpha"
            artist = ["aaa"]
            "#,
        );
        let genres = load_genre_config(cfg.path()).unwrap();
        let labels: Vec<&str> = genres.categories.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn load_run_config_applies_defaults() {
        let cfg = make_config("api_key_env = \"PLATFORM_API_KEY\"\n");
        let run = load_run_config(cfg.path()).unwrap();
        assert_eq!(run.daily_quota_units, 10_000);
        assert_eq!(run.max_parallel_channels, 3);
        assert_eq!(run.comments_per_video, 100);
        assert_eq!(run.confidence_threshold, 0.7);
    }

    #[test]
    fn load_run_config_rejects_bad_parallelism() {
        let cfg = make_config(
            "api_key_env = \"PLATFORM_API_KEY\"\nmax_parallel_channels = 0\n",
        );
        assert!(load_run_config(cfg.path()).is_err());
    }

    #[test]
    fn api_key_errors_when_env_var_missing() {
        let run = RunConfig {
            api_key_env: "UTA_CATALOG_TEST_KEY_DOES_NOT_EXIST".to_string(),
            daily_quota_units: 1,
            max_parallel_channels: 1,
            comments_per_video: 1,
            confidence_threshold: 0.5,
        };
        assert!(run.api_key().is_err());
    }
}
