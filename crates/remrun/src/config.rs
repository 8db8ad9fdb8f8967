//! Runtime configuration.
//!
//! Defaults can be overridden field by field with the `with_*` builders, or in
//! bulk from the environment with `Config::from_env`.

use std::str::FromStr;
use std::time::Duration;

/// Interval between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Shortest ping interval a session runs with.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);
/// Consecutive intervals without a pong before the link is declared failed.
pub const DEFAULT_MAX_MISSED_PONGS: u32 = 2;
/// Largest frame a stream transport accepts.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub ping_interval: Duration,
    pub max_missed_pongs: u32,
    /// Maximum wait for a reply. `None` waits until the reply or session failure.
    pub call_timeout: Option<Duration>,
    pub max_frame_len: usize,
    /// Whether sessions run the ping/pong watchdog.
    pub keepalive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            max_missed_pongs: DEFAULT_MAX_MISSED_PONGS,
            call_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            keepalive: true,
        }
    }
}

impl Config {
    /// Defaults, overridden by any of:
    ///
    /// - `REMRUN_PING_INTERVAL_MS`
    /// - `REMRUN_MAX_MISSED_PONGS`
    /// - `REMRUN_CALL_TIMEOUT_MS`
    /// - `REMRUN_MAX_FRAME_LEN`
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("REMRUN_PING_INTERVAL_MS").filter(|&ms| ms > 0) {
            config.ping_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("REMRUN_MAX_MISSED_PONGS").filter(|&n| n > 0) {
            config.max_missed_pongs = n;
        }
        if let Some(ms) = env_parse::<u64>("REMRUN_CALL_TIMEOUT_MS") {
            config.call_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(len) = env_parse::<usize>("REMRUN_MAX_FRAME_LEN").filter(|&len| len > 0) {
            config.max_frame_len = len;
        }
        config
    }

    /// Intervals below `MIN_PING_INTERVAL` are raised to it.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval.max(MIN_PING_INTERVAL);
        self
    }

    pub fn with_max_missed_pongs(mut self, n: u32) -> Self {
        self.max_missed_pongs = n.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn without_keepalive(mut self) -> Self {
        self.keepalive = false;
        self
    }

    /// How long a session may go without a pong before it is failed.
    pub fn pong_deadline(&self) -> Duration {
        self.ping_interval.max(MIN_PING_INTERVAL) * self.max_missed_pongs.max(1)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed environment override");
            None
        }
    }
}
