use std::env;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::idle::{BlockingIdle, IdleStrategy, SpinIdle, YieldIdle};

/// Environment variable overriding [`DispatcherConfig::capacity`].
pub const ENV_RING_CAPACITY: &str = "ZLOG_RING_CAPACITY";

/// Environment variable overriding [`DispatcherConfig::workers`].
pub const ENV_WORKERS: &str = "ZLOG_WORKERS";

pub const DEFAULT_CAPACITY: usize = 8192;

/// Callback invoked with every failed sink write.
pub type SinkErrorHook = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// Settings for an [`AsyncDispatcher`](crate::AsyncDispatcher).
///
/// # Examples
///
/// ```
/// # use zlog::DispatcherConfig;
/// # use zlog::idle::BackoffIdle;
/// let config = DispatcherConfig::default()
///     .with_capacity(1024)
///     .with_workers(2)
///     .with_idle(BackoffIdle::default())
///     .on_sink_error(|err| eprintln!("log sink failed: {err}"));
/// assert_eq!(config.capacity, 1024);
/// ```
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Requested ring size; rounded up to a power of two.
    pub capacity: usize,
    /// Worker threads. Zero is allowed: producers then do all the sink
    /// writes themselves when the ring fills, and on `flush`/`close`.
    pub workers: usize,
    pub idle: Arc<dyn IdleStrategy>,
    pub on_sink_error: Option<SinkErrorHook>,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl DispatcherConfig {
    /// Spinning workers: lowest hand-off latency, burns a core per worker.
    pub fn low_latency() -> Self {
        Self::default().with_idle(SpinIdle)
    }

    /// Parked workers: near-zero CPU when idle, slower to pick up a burst.
    pub fn low_cpu() -> Self {
        Self::default().with_idle(BlockingIdle::new(Duration::from_millis(10)))
    }

    /// Defaults, overridden by `ZLOG_RING_CAPACITY` and `ZLOG_WORKERS` when
    /// they are set to valid numbers.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), but reads settings through `lookup`
    /// instead of the process environment.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the raw value of a setting, or `None` if unset
    ///
    /// # Examples
    ///
    /// ```
    /// # use zlog::DispatcherConfig;
    /// let config = DispatcherConfig::from_lookup(|name| match name {
    ///     "ZLOG_RING_CAPACITY" => Some("512".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.capacity, 512);
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(capacity) = parse_usize(ENV_RING_CAPACITY, lookup(ENV_RING_CAPACITY)) {
            config.capacity = capacity;
        }
        if let Some(workers) = parse_usize(ENV_WORKERS, lookup(ENV_WORKERS)) {
            config.workers = workers;
        }
        config
    }

    /// Sets the ring size.
    ///
    /// The value is rounded up to the next power of two when the dispatcher
    /// is built, and one slot always stays empty, so a capacity of 8 holds
    /// 7 queued records.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Requested number of ring slots
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of worker threads draining the ring.
    ///
    /// # Arguments
    ///
    /// * `workers` - Thread count; zero leaves all sink writes to producers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets how workers wait when the ring is empty.
    pub fn with_idle(mut self, idle: impl IdleStrategy + 'static) -> Self {
        self.idle = Arc::new(idle);
        self
    }

    /// Installs a callback run on every failed sink write, after the failure
    /// has been counted. It runs on whichever thread performed the write.
    pub fn on_sink_error(mut self, hook: impl Fn(&io::Error) + Send + Sync + 'static) -> Self {
        self.on_sink_error = Some(Arc::new(hook));
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            workers: default_workers(),
            idle: Arc::new(YieldIdle),
            on_sink_error: None,
            thread_name: "zlog-worker".to_string(),
        }
    }
}

impl fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("capacity", &self.capacity)
            .field("workers", &self.workers)
            .field("on_sink_error", &self.on_sink_error.is_some())
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}

/// Half the available cores, at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

fn parse_usize(name: &str, raw: Option<String>) -> Option<usize> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(variable = name, value = %raw, error = %err, "ignoring invalid setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert!(config.workers >= 1);
        assert!(config.on_sink_error.is_none());
    }

    #[test]
    fn test_from_lookup() {
        let config = DispatcherConfig::from_lookup(|name| match name {
            ENV_RING_CAPACITY => Some(" 256 ".to_string()),
            ENV_WORKERS => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.capacity, 256);
        assert_eq!(config.workers, default_workers());

        let config = DispatcherConfig::from_lookup(|name| {
            (name == ENV_WORKERS).then(|| "0".to_string())
        });
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.workers, 0);
    }
}
