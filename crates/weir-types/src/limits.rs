//! Fixed limits and timing constants of the paged read-ahead window.

use std::time::Duration;

/// Size of one cache page. Every upstream fetch fills at most one page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Reconnect attempts before a transient failure is latched as terminal.
pub const MAX_RETRIES: u32 = 10;

/// Hysteresis band behind the reader that is never evicted.
///
/// Eviction only happens once the reader is at least this far past the
/// window start, preventing evict/refetch thrash on small position jitter.
pub const GRAY_AREA: usize = 1024 * 1024;

/// Back-padding subtracted from an out-of-window seek target.
///
/// With multiple demuxed streams, one stream's seek is usually followed by
/// a nearby request from another slightly behind it; starting the new
/// window early satisfies that request without a second seek.
pub const SEEK_BACK_PADDING: u64 = 256 * 1024;

/// Default restart threshold: prefetch resumes when fewer than this many
/// bytes remain cached ahead of the reader.
pub const DEFAULT_LO_WATER: usize = 2 * 1024 * 1024;

/// Default cutoff: prefetch pauses once this many bytes are cached.
pub const DEFAULT_HI_WATER: usize = 20 * 1024 * 1024;

/// Default idle keep-alive period (one page is fetched per period to hold
/// the upstream connection open). Zero disables keep-alive.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Cooldown between reconnect attempts after a failed fetch.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Poll period of the prefetch loop while idle (keeps keep-alive checks and
/// eviction-driven restarts responsive).
pub const IDLE_POLL: Duration = Duration::from_millis(100);

/// Delay before a deferred read request is retried against the cache.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(50);
