//! The [`DataSource`] trait: a random-access reader over a byte stream.

use std::time::Duration;

use weir_error::{Result, WeirError};
use weir_types::SourceFlags;

/// Opaque handle to a decrypt session negotiated by the source.
///
/// The cache never interprets this; it only shuttles it between the
/// source and the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrmSession(u64);

impl DrmSession {
    /// Wrap a raw session identifier.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw session identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// DRM metadata reported by a source that has negotiated protection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrmInfo {
    /// The active decrypt session, if one has been established.
    pub session: Option<DrmSession>,
    /// Protection scheme identifier (e.g. a UUID or scheme name).
    pub scheme: Option<String>,
}

/// A random-access byte source.
///
/// All methods take `&self`: implementations synchronize internally. This
/// matters because a caching consumer calls [`read_at`](Self::read_at) and
/// [`reconnect_at_offset`](Self::reconnect_at_offset) from a background
/// thread — both may block indefinitely — while another thread may call
/// [`disconnect`](Self::disconnect) to abort them.
///
/// Methods gated on capabilities the source lacks default to
/// [`WeirError::Unsupported`] or `None`.
pub trait DataSource: Send + Sync {
    /// Whether the source opened successfully and is ready to serve reads.
    fn init_check(&self) -> Result<()> {
        Ok(())
    }

    /// Read up to `buf.len()` bytes starting at absolute `offset`.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream.
    /// May block waiting for the transport.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total stream length, if the source knows it.
    fn size(&self) -> Option<u64>;

    /// Capability flags for this source.
    fn flags(&self) -> SourceFlags {
        SourceFlags::empty()
    }

    /// Drop the current connection and reopen the stream at `offset`.
    ///
    /// `query_and_set_proxy` is an in/out flag: on entry it requests proxy
    /// renegotiation; on exit it reports whether a proxy ended up
    /// configured for the new connection.
    fn reconnect_at_offset(&self, offset: u64, query_and_set_proxy: &mut bool) -> Result<()> {
        let _ = (offset, query_and_set_proxy);
        Err(WeirError::Unsupported)
    }

    /// Abort any in-flight read and drop the connection.
    ///
    /// Must be safe to call from any thread, at any time, repeatedly.
    fn disconnect(&self) {}

    /// The URI this source reads from, if it has one.
    fn uri(&self) -> Option<String> {
        None
    }

    /// The MIME type of the stream, if known.
    fn mime_type(&self) -> Option<String> {
        None
    }

    /// Estimated sustained transport bandwidth in kbit/s.
    fn estimated_bandwidth_kbps(&self) -> Result<u32> {
        Err(WeirError::Unsupported)
    }

    /// Set how often the transport refreshes its bandwidth estimate.
    fn set_bandwidth_stat_freq(&self, freq: Duration) -> Result<()> {
        let _ = freq;
        Err(WeirError::Unsupported)
    }

    /// Initialize DRM for the given MIME type, returning the session.
    fn drm_init(&self, mime: &str) -> Option<DrmSession> {
        let _ = mime;
        None
    }

    /// DRM metadata for the stream, if protection is active.
    fn drm_info(&self) -> Option<DrmInfo> {
        None
    }
}
