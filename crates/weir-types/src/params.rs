//! Cache tuning parameters and their string form.
//!
//! Parameters travel as a compact `"lo/hi/keepalive"` string (`lo` and `hi`
//! in KiB, `keepalive` in seconds) through config strings, process
//! properties, and the `x-cache-config` header. A negative token selects
//! the built-in default for that field.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::limits::{DEFAULT_HI_WATER, DEFAULT_KEEPALIVE, DEFAULT_LO_WATER};

/// Watermark and keep-alive tuning for the read-ahead window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheParams {
    /// Prefetch restarts when fewer than this many bytes remain cached
    /// ahead of the reader.
    pub lo_water_bytes: usize,
    /// Prefetch pauses once this many bytes are cached.
    pub hi_water_bytes: usize,
    /// Idle keep-alive period; `Duration::ZERO` disables keep-alive.
    pub keepalive: Duration,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            lo_water_bytes: DEFAULT_LO_WATER,
            hi_water_bytes: DEFAULT_HI_WATER,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Error returned when a cache params string is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCacheParams {
    /// The string that failed to parse.
    pub input: String,
}

impl fmt::Display for InvalidCacheParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cache params string: '{}'", self.input)
    }
}

impl std::error::Error for InvalidCacheParams {}

impl FromStr for CacheParams {
    type Err = InvalidCacheParams;

    /// Parse a `"lo/hi/keepalive"` triple.
    ///
    /// All three tokens must be integers. A negative value selects the
    /// default for that field. If `lo >= hi` after resolution, both
    /// watermarks revert to their defaults (logged).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidCacheParams {
            input: s.to_string(),
        };

        let mut tokens = s.trim().splitn(3, '/');
        let lo_kib: i64 = tokens.next().ok_or_else(err)?.trim().parse().map_err(|_| err())?;
        let hi_kib: i64 = tokens.next().ok_or_else(err)?.trim().parse().map_err(|_| err())?;
        let keepalive_secs: i64 =
            tokens.next().ok_or_else(err)?.trim().parse().map_err(|_| err())?;

        let defaults = Self::default();

        let mut lo_water_bytes = if lo_kib >= 0 {
            usize::try_from(lo_kib).map_err(|_| err())?.saturating_mul(1024)
        } else {
            defaults.lo_water_bytes
        };
        let mut hi_water_bytes = if hi_kib >= 0 {
            usize::try_from(hi_kib).map_err(|_| err())?.saturating_mul(1024)
        } else {
            defaults.hi_water_bytes
        };

        if lo_water_bytes >= hi_water_bytes {
            warn!(
                lo_water_bytes,
                hi_water_bytes, "illegal low/high watermarks, reverting to defaults"
            );
            lo_water_bytes = defaults.lo_water_bytes;
            hi_water_bytes = defaults.hi_water_bytes;
        }

        let keepalive = if keepalive_secs >= 0 {
            Duration::from_secs(u64::try_from(keepalive_secs).map_err(|_| err())?)
        } else {
            defaults.keepalive
        };

        Ok(Self {
            lo_water_bytes,
            hi_water_bytes,
            keepalive,
        })
    }
}
