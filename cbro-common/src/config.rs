//! Configuration loading and resolution
//!
//! Two layers:
//! 1. **TOML bootstrap** ([`TomlConfig`]): every field optional, every section
//!    defaulted, so a missing or partial file never stops startup.
//! 2. **Resolved engine configuration** ([`EngineConfig`]): TOML values with
//!    environment overrides applied, paths resolved and invariants validated.
//!    Validation failures are fatal and abort the run before any reference
//!    is processed.
//!
//! Config file priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CBRO_CONFIG` environment variable
//! 3. `~/.config/cbro/config.toml` (platform config dir)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CBRO_CONFIG";
/// Environment variable carrying the ComicVine API key
pub const API_KEY_ENV: &str = "COMICVINE_API";
/// Environment variable overriding the data root folder
pub const ROOT_FOLDER_ENV: &str = "CBRO_ROOT_FOLDER";
/// Environment variable overriding the cache database path
pub const CACHE_PATH_ENV: &str = "CBRO_CACHE_PATH";

const CACHE_DB_FILE_NAME: &str = "comicvine_cache.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Data root folder (cache database lives here unless `cache_path` is set)
    pub root_folder: Option<PathBuf>,

    /// Explicit cache database path
    pub cache_path: Option<PathBuf>,

    /// ComicVine API key (the `COMICVINE_API` environment variable wins)
    pub comicvine_api_key: Option<String>,

    pub logging: LoggingConfig,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub catalog: CatalogSettings,
    pub matcher: MatcherSettings,
    pub normalizer: NormalizerSettings,
    pub workers: WorkerSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Cache store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry time-to-live in days
    pub ttl_days: u32,
    /// Remove expired entries when the engine starts
    pub sweep_on_startup: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            sweep_on_startup: true,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        crate::time::days_to_duration(self.ttl_days)
    }
}

/// Outbound request throttle settings
///
/// ComicVine allows 200 requests per resource per 15 minutes; one request per
/// second keeps a long batch safely under that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Maximum admitted requests within any trailing window
    pub max_requests: u32,
    /// Sliding window length in seconds
    pub window_seconds: u64,
    /// Minimum gap between consecutive admitted requests
    pub min_interval_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 200,
            window_seconds: 900,
            min_interval_ms: 1000,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Catalog client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub base_url: String,
    pub user_agent: String,
    /// Results per page (ComicVine caps this at 100)
    pub page_size: u32,
    /// Hard cap on pages fetched by one paginated walk
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    /// Total attempts per request, including the first
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_factor: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: "https://comicvine.gamespot.com/api".to_string(),
            user_agent: format!("CBROResolve/{}", env!("CARGO_PKG_VERSION")),
            page_size: 100,
            max_pages: 50,
            request_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_factor: 2,
        }
    }
}

impl CatalogSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Upper bound on results a single paginated walk can return
    pub fn max_results(&self) -> usize {
        self.page_size as usize * self.max_pages as usize
    }
}

/// Matcher scoring weights, bands and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherSettings {
    /// Candidates kept (by name similarity) before full scoring
    pub candidate_cap: usize,
    /// Ranked candidates reported alongside a decision
    pub runner_up_limit: usize,

    /// Points for a perfect name similarity (dominant component)
    pub name_weight: f64,
    /// Multiplier applied to alias similarity
    pub alias_discount: f64,

    pub year_exact_bonus: f64,
    pub year_near_bonus: f64,
    /// Bonus for 2..year_cutoff years apart
    pub year_far_bonus: f64,
    /// Differences at or beyond this earn no year bonus
    pub year_cutoff: u32,
    /// Differences beyond this are a contradiction and are penalized
    pub year_penalty_cutoff: u32,
    pub year_penalty: f64,

    /// Candidate counts below `issue_number * ratio` are implausibly small
    pub issue_count_too_small_ratio: f64,
    /// Counts at or above this are a plausible main series
    pub issue_count_plausible_min: u32,
    pub issue_count_penalty: f64,
    pub issue_count_bonus: f64,

    pub acceptance_threshold: f64,
    pub exact_threshold: f64,
    /// Top two within this many points are ambiguous
    pub ambiguity_delta: f64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            candidate_cap: 10,
            runner_up_limit: 5,
            name_weight: 100.0,
            alias_discount: 0.9,
            year_exact_bonus: 30.0,
            year_near_bonus: 20.0,
            year_far_bonus: 10.0,
            year_cutoff: 3,
            year_penalty_cutoff: 10,
            year_penalty: 20.0,
            issue_count_too_small_ratio: 1.0,
            issue_count_plausible_min: 10,
            issue_count_penalty: 30.0,
            issue_count_bonus: 5.0,
            acceptance_threshold: 60.0,
            exact_threshold: 120.0,
            ambiguity_delta: 5.0,
        }
    }
}

/// Normalizer settings (year plausibility range)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    pub min_year: i32,
    /// Years past the current year still accepted (solicitations run ahead)
    pub max_years_ahead: i32,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            min_year: 1900,
            max_years_ahead: 1,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Concurrent reference resolutions (I/O bound, all share one throttle)
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Fully resolved and validated configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: String,
    pub root_folder: PathBuf,
    pub cache_path: PathBuf,
    pub logging: LoggingConfig,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub catalog: CatalogSettings,
    pub matcher: MatcherSettings,
    pub normalizer: NormalizerSettings,
    pub workers: WorkerSettings,
}

impl EngineConfig {
    /// Resolve a TOML bootstrap into an engine configuration
    ///
    /// Environment variables override TOML values. Returns
    /// [`Error::Config`] for missing required values or inconsistent
    /// settings.
    pub fn from_toml(toml_config: TomlConfig) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| is_valid_key(key))
            .or_else(|| toml_config.comicvine_api_key.filter(|key| is_valid_key(key)))
            .ok_or_else(|| {
                Error::Config(format!(
                    "ComicVine API key not configured. Set {} or add \
                     comicvine_api_key to the config file",
                    API_KEY_ENV
                ))
            })?;

        let root_folder = std::env::var(ROOT_FOLDER_ENV)
            .ok()
            .map(PathBuf::from)
            .or(toml_config.root_folder)
            .unwrap_or_else(default_root_folder);

        let cache_path = std::env::var(CACHE_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or(toml_config.cache_path)
            .unwrap_or_else(|| root_folder.join(CACHE_DB_FILE_NAME));

        let config = Self {
            api_key: api_key.trim().to_string(),
            root_folder,
            cache_path,
            logging: toml_config.logging,
            cache: toml_config.cache,
            rate_limit: toml_config.rate_limit,
            catalog: toml_config.catalog,
            matcher: toml_config.matcher,
            normalizer: toml_config.normalizer,
            workers: toml_config.workers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !is_valid_key(&self.api_key) {
            problems.push("API key is empty".to_string());
        }
        if self.rate_limit.max_requests == 0 {
            problems.push("rate_limit.max_requests must be > 0".to_string());
        }
        if self.rate_limit.window_seconds == 0 {
            problems.push("rate_limit.window_seconds must be > 0".to_string());
        }
        if self.catalog.page_size == 0 || self.catalog.page_size > 100 {
            problems.push("catalog.page_size must be within 1..=100".to_string());
        }
        if self.catalog.max_pages == 0 {
            problems.push("catalog.max_pages must be > 0".to_string());
        }
        if self.catalog.retry_max_attempts == 0 {
            problems.push("catalog.retry_max_attempts must be > 0".to_string());
        }
        if self.workers.concurrency == 0 {
            problems.push("workers.concurrency must be > 0".to_string());
        }
        if self.matcher.candidate_cap == 0 {
            problems.push("matcher.candidate_cap must be > 0".to_string());
        }
        if self.matcher.exact_threshold < self.matcher.acceptance_threshold {
            problems.push(
                "matcher.exact_threshold must not be below matcher.acceptance_threshold"
                    .to_string(),
            );
        }
        if self.matcher.year_cutoff == 0 {
            problems.push("matcher.year_cutoff must be > 0".to_string());
        }
        if self.matcher.year_penalty_cutoff < self.matcher.year_cutoff {
            problems.push(
                "matcher.year_penalty_cutoff must not be below matcher.year_cutoff".to_string(),
            );
        }
        if self.normalizer.min_year <= 0 {
            problems.push("normalizer.min_year must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Locate the config file to read, if any
///
/// Explicit paths (CLI argument, `CBRO_CONFIG`) are returned even when they do
/// not exist so the caller can report them; the platform default is only
/// returned when present.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|dir| dir.join("cbro").join("config.toml"))
        .filter(|path| path.exists())
}

/// Load the TOML bootstrap file
///
/// A missing file logs a warning and yields defaults. A present but
/// unparseable file is a configuration error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using built-in defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Resolve, load and validate in one step
pub fn load_engine_config(cli_config_path: Option<&Path>) -> Result<EngineConfig> {
    let path = resolve_config_path(cli_config_path);
    let toml_config = load_toml_config(path.as_deref())?;
    EngineConfig::from_toml(toml_config)
}

/// OS-dependent default data folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cbro"))
        .unwrap_or_else(|| PathBuf::from("./cbro_data"))
}
