//! Per-instance configuration of the lock primitives

use crate::core::trace::{BacktraceProvider, TraceProvider};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the default timeout in milliseconds
pub const TIMEOUT_ENV_VAR: &str = "DELOCK_TIMEOUT";

/// Timeout used when the environment does not provide a usable one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Settings a lock primitive is created with
///
/// The environment is consulted once, when the config is built, and never
/// from the lock hot path.
#[derive(Clone)]
pub struct LockConfig {
    pub(crate) timeout: Duration,
    pub(crate) provider: Arc<dyn TraceProvider>,
}

impl LockConfig {
    /// Resolve the timeout from `DELOCK_TIMEOUT` and use the backtrace provider
    pub fn from_env() -> Self {
        let raw = std::env::var(TIMEOUT_ENV_VAR).ok();
        LockConfig {
            timeout: parse_timeout(raw.as_deref()),
            provider: Arc::new(BacktraceProvider),
        }
    }

    /// Replace the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the stack trace provider
    pub fn with_provider(mut self, provider: Arc<dyn TraceProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for LockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockConfig")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Interpret a millisecond value; missing, unparsable and zero values fall
/// back to [`DEFAULT_TIMEOUT`].
///
/// A parsed zero falls back as well rather than meaning an immediate
/// timeout; use [`LockConfig::with_timeout`] with `Duration::ZERO` for
/// try-once behavior.
pub fn parse_timeout(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT)
}
