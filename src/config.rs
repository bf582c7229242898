use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, Result};

/// Hours of commerce activity counted before the during-window opens.
pub const DEFAULT_PRE_WINDOW_HOURS: f64 = 2.0;

/// Half-width of the during-window; applied on both sides of the event timestamp.
pub const DEFAULT_DURING_WINDOW_HOURS: f64 = 1.0;

/// Hours of commerce activity counted after the during-window closes.
pub const DEFAULT_POST_WINDOW_HOURS: f64 = 2.0;

/// Upper bound on any window width: one hundred years.
pub const MAX_WINDOW_HOURS: f64 = 24.0 * 365.0 * 100.0;

pub const DEFAULT_SIGNIFICANCE_ALPHA: f64 = 0.05;

/// Standard deviations a window count must deviate from its group mean to be flagged.
pub const DEFAULT_ANOMALY_K: f64 = 2.0;

/// Groups smaller than this have no usable baseline and are skipped.
pub const DEFAULT_ANOMALY_MIN_GROUP_SIZE: usize = 3;

pub const DEFAULT_TOP_N_INSIGHTS: usize = 5;

/// Combined score at or above which an outcome event counts as high-scoring.
pub const DEFAULT_HIGH_SCORING_THRESHOLD: u32 = 3;

/// Minimum number of (outcome, volume) pairs before a coefficient is computed.
pub const MIN_CORRELATION_PAIRS: usize = 3;

/// Absolute-coefficient boundaries between effect-size classes.
pub mod thresholds {
    /// |r| below this is weak.
    pub const WEAK_MAX: f64 = 0.1;
    /// |r| below this (and at or above WEAK_MAX) is moderate; anything above is strong.
    pub const MODERATE_MAX: f64 = 0.3;
}

/// Knobs for one engine run. Built once and passed by reference to every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub pre_window_hours: f64,
    pub during_window_hours: f64,
    pub post_window_hours: f64,
    pub significance_alpha: f64,
    pub anomaly_k: f64,
    pub anomaly_min_group_size: usize,
    pub top_n_insights: usize,
    /// `(weak_max, moderate_max)` boundaries on |r|.
    pub effect_size_thresholds: (f64, f64),
    pub high_scoring_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pre_window_hours: DEFAULT_PRE_WINDOW_HOURS,
            during_window_hours: DEFAULT_DURING_WINDOW_HOURS,
            post_window_hours: DEFAULT_POST_WINDOW_HOURS,
            significance_alpha: DEFAULT_SIGNIFICANCE_ALPHA,
            anomaly_k: DEFAULT_ANOMALY_K,
            anomaly_min_group_size: DEFAULT_ANOMALY_MIN_GROUP_SIZE,
            top_n_insights: DEFAULT_TOP_N_INSIGHTS,
            effect_size_thresholds: (thresholds::WEAK_MAX, thresholds::MODERATE_MAX),
            high_scoring_threshold: DEFAULT_HIGH_SCORING_THRESHOLD,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            pre_window_hours: env_parse("PRE_WINDOW_HOURS", DEFAULT_PRE_WINDOW_HOURS)?,
            during_window_hours: env_parse("DURING_WINDOW_HOURS", DEFAULT_DURING_WINDOW_HOURS)?,
            post_window_hours: env_parse("POST_WINDOW_HOURS", DEFAULT_POST_WINDOW_HOURS)?,
            significance_alpha: env_parse("SIGNIFICANCE_ALPHA", DEFAULT_SIGNIFICANCE_ALPHA)?,
            anomaly_k: env_parse("ANOMALY_K", DEFAULT_ANOMALY_K)?,
            anomaly_min_group_size: env_parse(
                "ANOMALY_MIN_GROUP_SIZE",
                DEFAULT_ANOMALY_MIN_GROUP_SIZE,
            )?,
            top_n_insights: env_parse("TOP_N_INSIGHTS", DEFAULT_TOP_N_INSIGHTS)?,
            effect_size_thresholds: (
                env_parse("EFFECT_SIZE_WEAK_MAX", thresholds::WEAK_MAX)?,
                env_parse("EFFECT_SIZE_MODERATE_MAX", thresholds::MODERATE_MAX)?,
            ),
            high_scoring_threshold: env_parse(
                "HIGH_SCORING_THRESHOLD",
                DEFAULT_HIGH_SCORING_THRESHOLD,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("PRE_WINDOW_HOURS", self.pre_window_hours),
            ("DURING_WINDOW_HOURS", self.during_window_hours),
            ("POST_WINDOW_HOURS", self.post_window_hours),
        ];
        for (name, hours) in windows {
            if !hours.is_finite() || hours <= 0.0 {
                return Err(AppError::Config(format!("{name} must be a positive number of hours")));
            }
            if hours > MAX_WINDOW_HOURS {
                return Err(AppError::Config(format!(
                    "{name} must not exceed {MAX_WINDOW_HOURS} hours"
                )));
            }
        }
        if !(self.significance_alpha > 0.0 && self.significance_alpha < 1.0) {
            return Err(AppError::Config("SIGNIFICANCE_ALPHA must be in (0, 1)".to_string()));
        }
        if !self.anomaly_k.is_finite() || self.anomaly_k <= 0.0 {
            return Err(AppError::Config("ANOMALY_K must be positive".to_string()));
        }
        if self.anomaly_min_group_size < 2 {
            return Err(AppError::Config(
                "ANOMALY_MIN_GROUP_SIZE must be at least 2".to_string(),
            ));
        }
        let (weak_max, moderate_max) = self.effect_size_thresholds;
        if !(0.0 < weak_max && weak_max < moderate_max && moderate_max <= 1.0) {
            return Err(AppError::Config(
                "effect size thresholds must satisfy 0 < weak < moderate <= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pre_window(&self) -> Duration {
        hours_to_duration(self.pre_window_hours)
    }

    pub fn during_window(&self) -> Duration {
        hours_to_duration(self.during_window_hours)
    }

    pub fn post_window(&self) -> Duration {
        hours_to_duration(self.post_window_hours)
    }
}

fn hours_to_duration(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

/// Runtime settings for the `correlator` binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON array of raw commerce records (COMMERCE_PATH)
    pub commerce_path: String,
    /// JSON array of raw outcome records (OUTCOMES_PATH)
    pub outcomes_path: String,
    /// Directory receiving the serialized output collections (OUTPUT_DIR)
    pub output_dir: String,
    pub db_path: String,
    pub log_level: String,
    /// When set, the results API is served after the run completes (API_PORT)
    pub api_port: Option<u16>,
    /// Reference instant for the "not in the future" check (RUN_AS_OF, RFC 3339)
    pub as_of: Option<DateTime<Utc>>,
    pub max_records: Option<usize>,
    pub run_timeout_secs: Option<u64>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let as_of = match std::env::var("RUN_AS_OF") {
            Ok(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|_| AppError::Config("RUN_AS_OF must be an RFC 3339 timestamp".to_string()))?
                    .with_timezone(&Utc),
            ),
            Err(_) => None,
        };

        Ok(Self {
            commerce_path: std::env::var("COMMERCE_PATH")
                .unwrap_or_else(|_| "data/commerce.json".to_string()),
            outcomes_path: std::env::var("OUTCOMES_PATH")
                .unwrap_or_else(|_| "data/outcomes.json".to_string()),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "correlator.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: env_parse_opt("API_PORT")?,
            as_of,
            max_records: env_parse_opt("MAX_RECORDS")?,
            run_timeout_secs: env_parse_opt("RUN_TIMEOUT_SECS")?,
            engine: EngineConfig::from_env()?,
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_parse_opt<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        _ => Ok(None),
    }
}
