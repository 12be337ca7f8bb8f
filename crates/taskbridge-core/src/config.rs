//! Runtime configuration.
//!
//! Built from `TASKBRIDGE_*` environment variables (call [`load_dotenv`]
//! first). Every value has a default; a present but unparsable value is an
//! error rather than a silent fallback.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

const PREFIX: &str = "TASKBRIDGE_";

/// Reads prefixed keys from an arbitrary lookup (the process env in production).
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn opt(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{key}")).filter(|s| !s.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.opt(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: format!("{PREFIX}{key}"),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default_ms).map(Duration::from_millis)
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.opt(key)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ── Polling ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    pub batch_size: usize,
    /// Cursor of a stream that has never been polled.
    pub initial_cursor: NaiveDateTime,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        let initial_cursor = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            batch_size: 100,
            initial_cursor,
            interval: Duration::from_secs(60),
        }
    }
}

// ── Schedules & quota ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Used for auto-fetched weekday rows that carry no hours.
    pub default_start: NaiveTime,
    pub default_end: NaiveTime,
    /// Used for auto-fetched weekday rows that carry no quota.
    pub default_quota: u32,
    pub refresh_lock_ttl: Duration,
    pub circuit_open_window: Duration,
    pub refresh_wait_timeout: Duration,
    pub refresh_wait_poll: Duration,
    pub fallback_window_days: i64,
    pub non_insured_quota_ratio: f64,
    pub minutes_per_queue_slot: u32,
    /// Clinics covered by the periodic refresh sweep.
    pub refresh_clinics: Vec<String>,
    pub refresh_interval: Duration,
    pub refresh_call_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            default_end: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
            default_quota: 20,
            refresh_lock_ttl: Duration::from_secs(5 * 60),
            circuit_open_window: Duration::from_secs(10 * 60),
            refresh_wait_timeout: Duration::from_secs(3),
            refresh_wait_poll: Duration::from_millis(100),
            fallback_window_days: 7,
            non_insured_quota_ratio: 0.3,
            minutes_per_queue_slot: 6,
            refresh_clinics: Vec::new(),
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            refresh_call_delay: Duration::from_millis(500),
        }
    }
}

// ── Queue & dispatch ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub build_interval: Duration,
    pub build_limit: usize,
    pub dispatch_interval: Duration,
    pub max_retries: u32,
    pub revalidation_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            build_interval: Duration::from_secs(60),
            build_limit: 100,
            dispatch_interval: Duration::from_secs(5),
            max_retries: 5,
            revalidation_interval: Duration::from_secs(30 * 60),
        }
    }
}

// ── Authority ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    pub base_url: String,
    pub cons_id: String,
    pub user_key: String,
    pub timeout: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apijkn.bpjs-kesehatan.go.id/antreanrs".into(),
            cons_id: String::new(),
            user_key: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

// ── Top-level config ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub poll: PollConfig,
    pub schedule: ScheduleConfig,
    pub queue: QueueConfig,
    pub authority: AuthorityConfig,
    /// Offset of the hospital's wall clock (WIB = +420).
    pub utc_offset_minutes: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            schedule: ScheduleConfig::default(),
            queue: QueueConfig::default(),
            authority: AuthorityConfig::default(),
            utc_offset_minutes: 7 * 60,
        }
    }
}

impl SyncConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let d = SyncConfig::default();

        let poll = PollConfig {
            batch_size: env.parse("BATCH_SIZE", d.poll.batch_size)?,
            initial_cursor: env.parse("INITIAL_CURSOR", d.poll.initial_cursor)?,
            interval: env.secs("POLL_INTERVAL_SECS", d.poll.interval)?,
        };

        let schedule = ScheduleConfig {
            default_start: env.parse("DEFAULT_START", d.schedule.default_start)?,
            default_end: env.parse("DEFAULT_END", d.schedule.default_end)?,
            default_quota: env.parse("DEFAULT_QUOTA", d.schedule.default_quota)?,
            refresh_lock_ttl: env.secs("REFRESH_LOCK_TTL_SECS", d.schedule.refresh_lock_ttl)?,
            circuit_open_window: env.secs("CIRCUIT_OPEN_SECS", d.schedule.circuit_open_window)?,
            refresh_wait_timeout: env
                .millis("REFRESH_WAIT_MS", d.schedule.refresh_wait_timeout)?,
            refresh_wait_poll: env.millis("REFRESH_POLL_MS", d.schedule.refresh_wait_poll)?,
            fallback_window_days: env
                .parse("FALLBACK_WINDOW_DAYS", d.schedule.fallback_window_days)?,
            non_insured_quota_ratio: env
                .parse("NON_INSURED_QUOTA_RATIO", d.schedule.non_insured_quota_ratio)?,
            minutes_per_queue_slot: env
                .parse("MINUTES_PER_QUEUE_SLOT", d.schedule.minutes_per_queue_slot)?,
            refresh_clinics: env.list("REFRESH_CLINICS"),
            refresh_interval: env.secs("REFRESH_INTERVAL_SECS", d.schedule.refresh_interval)?,
            refresh_call_delay: env.millis("REFRESH_CALL_DELAY_MS", d.schedule.refresh_call_delay)?,
        };

        let queue = QueueConfig {
            build_interval: env.secs("QUEUE_BUILD_INTERVAL_SECS", d.queue.build_interval)?,
            build_limit: env.parse("QUEUE_BUILD_LIMIT", d.queue.build_limit)?,
            dispatch_interval: env.secs("DISPATCH_INTERVAL_SECS", d.queue.dispatch_interval)?,
            max_retries: env.parse("MAX_RETRIES", d.queue.max_retries)?,
            revalidation_interval: env
                .secs("REVALIDATION_INTERVAL_SECS", d.queue.revalidation_interval)?,
        };

        let authority = AuthorityConfig {
            base_url: env.string("AUTHORITY_URL", &d.authority.base_url),
            cons_id: env.string("AUTHORITY_CONS_ID", ""),
            user_key: env.string("AUTHORITY_USER_KEY", ""),
            timeout: env.secs("AUTHORITY_TIMEOUT_SECS", d.authority.timeout)?,
        };

        Ok(Self {
            poll,
            schedule,
            queue,
            authority,
            utc_offset_minutes: env.parse("UTC_OFFSET_MINUTES", d.utc_offset_minutes)?,
        })
    }

    /// The hospital's wall-clock offset; out-of-range values fall back to UTC.
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }
}
