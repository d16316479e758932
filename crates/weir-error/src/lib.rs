//! Error types for the Weir streaming cache.
//!
//! One enum covers both sides of the cache boundary: errors a byte source
//! reports upward and errors the cache surfaces to its consumer. The
//! engine does not propagate fetch errors up the call stack — it latches
//! them in its state and decides per-read whether the consumer sees them —
//! so the variants here classify *recoverability*, not call sites.

use thiserror::Error;

/// Primary error type for Weir operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WeirError {
    /// The source has no more data at or past the requested offset.
    #[error("end of stream")]
    EndOfStream,

    /// Transient condition; the operation should be retried shortly.
    ///
    /// Used both for upstream hiccups the prefetcher will retry and for
    /// reads that cannot be satisfied until the window catches up.
    #[error("resource temporarily unavailable, try again")]
    Again,

    /// The source cannot resume at an arbitrary offset (no range support).
    /// Retrying will not help.
    #[error("source does not support resuming at an offset")]
    Unsupported,

    /// The connection is gone for good (peer closed the pipe).
    #[error("broken pipe")]
    BrokenPipe,

    /// A transport-level failure that is worth retrying.
    #[error("transport error: {detail}")]
    Transport {
        /// Human-readable description of the failure.
        detail: String,
    },
}

impl WeirError {
    /// Build a [`WeirError::Transport`] from anything displayable.
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    /// Whether retrying is pointless: the server will keep refusing range
    /// requests, or the pipe is permanently closed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unsupported | Self::BrokenPipe)
    }
}

/// Result alias used throughout the workspace.
pub type Result<T, E = WeirError> = std::result::Result<T, E>;
