//! Configuration management for the sync daemon.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Knobs shared by the push synchronizer, the scheduler and the realtime
/// reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Periodic sync interval
    pub interval: Duration,
    /// Queue entries pushed per cycle
    pub batch_size: usize,
    /// Failed pushes after which a queue entry is pruned
    pub max_retries: u32,
    /// Attempts of one scheduled job before it is marked failed
    pub max_job_attempts: u32,
    /// First retry delay of a failed job; doubled per attempt
    pub backoff_base: Duration,
    /// Upper bound of the job retry delay
    pub max_backoff: Duration,
    /// How often a pending job re-checks connectivity
    pub connectivity_poll: Duration,
    /// Pull every table after (re)subscribing to the change feed
    pub catch_up_on_connect: bool,
    /// First delay before resubscribing after the feed drops
    pub reconnect_delay: Duration,
    /// Upper bound of the resubscribe delay
    pub max_reconnect_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            batch_size: 50,
            max_retries: tabsync_engine::DEFAULT_MAX_RETRIES,
            max_job_attempts: 3,
            backoff_base: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30 * 60),
            connectivity_poll: Duration::from_secs(10),
            catch_up_on_connect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the tabsync server
    pub remote_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// SQLite connection URL of the local store
    pub database_url: String,
    /// Tenant to open a session for at startup
    pub tenant_id: Option<String>,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote_url = lookup("TABSYNC_REMOTE_URL").ok_or(ConfigError::MissingRemoteUrl)?;
        let database_url = lookup("TABSYNC_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://tabsync.db?mode=rwc".to_string());

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            interval: Duration::from_secs(parse(
                &lookup,
                "TABSYNC_SYNC_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            batch_size: parse(&lookup, "TABSYNC_BATCH_SIZE", defaults.batch_size)?,
            max_retries: parse(&lookup, "TABSYNC_MAX_RETRIES", defaults.max_retries)?,
            max_job_attempts: parse(&lookup, "TABSYNC_MAX_JOB_ATTEMPTS", defaults.max_job_attempts)?,
            backoff_base: Duration::from_millis(parse(
                &lookup,
                "TABSYNC_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            ..defaults
        };

        let zeroed = [
            ("TABSYNC_SYNC_INTERVAL_SECS", sync.interval.is_zero()),
            ("TABSYNC_BATCH_SIZE", sync.batch_size == 0),
            ("TABSYNC_MAX_RETRIES", sync.max_retries == 0),
        ];
        if let Some((name, _)) = zeroed.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Invalid {
                name,
                value: "0".into(),
            });
        }

        Ok(Self {
            remote_url: remote_url.trim_end_matches('/').to_string(),
            api_token: lookup("TABSYNC_API_TOKEN").filter(|t| !t.is_empty()),
            database_url,
            tenant_id: lookup("TABSYNC_TENANT_ID").filter(|t| !t.is_empty()),
            request_timeout: Duration::from_secs(parse(&lookup, "TABSYNC_REQUEST_TIMEOUT_SECS", 30)?),
            sync,
        })
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TABSYNC_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("Invalid {name} value: {value:?}")]
    Invalid { name: &'static str, value: String },
}
