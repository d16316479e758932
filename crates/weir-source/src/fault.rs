//! Deterministic fault injection for [`DataSource`] implementations.
//!
//! [`FaultSource`] wraps any source and applies a scripted sequence of
//! outcomes to `read_at`/`reconnect_at_offset`, plus call counters for
//! asserting the cache's retry and disconnect behaviour. Same script →
//! same failure sequence, so retry paths are reproducible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use weir_error::{Result, WeirError};
use weir_types::SourceFlags;

use crate::traits::{DataSource, DrmInfo, DrmSession};

/// One scripted outcome for the next `read_at` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFault {
    /// Fail the read with this error.
    Error(WeirError),
    /// Serve the read, but return at most this many bytes.
    Short(usize),
    /// Report end of stream regardless of the underlying data.
    Eos,
}

#[derive(Debug, Default)]
struct FaultState {
    /// One-shot outcomes consumed front-to-back by `read_at`.
    read_script: VecDeque<ReadFault>,
    /// When set, every read fails with this error (after the script drains).
    fail_reads: Option<WeirError>,
    /// One-shot failures consumed front-to-back by `reconnect_at_offset`.
    reconnect_script: VecDeque<WeirError>,
    /// Value written into the `query_and_set_proxy` out-flag on reconnect.
    proxy_on_reconnect: Option<bool>,
    /// Fixed bandwidth estimate to report, if any.
    bandwidth_kbps: Option<u32>,
}

/// A [`DataSource`] wrapper that injects scripted faults.
#[derive(Debug)]
pub struct FaultSource<S> {
    inner: S,
    state: Mutex<FaultState>,
    http_like: bool,
    read_calls: AtomicU64,
    reconnect_calls: AtomicU64,
    disconnect_calls: AtomicU64,
}

impl<S: DataSource> FaultSource<S> {
    /// Wrap `inner` with an empty fault script.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState::default()),
            http_like: false,
            read_calls: AtomicU64::new(0),
            reconnect_calls: AtomicU64::new(0),
            disconnect_calls: AtomicU64::new(0),
        }
    }

    /// Make the wrapper present as an HTTP source: adds
    /// [`SourceFlags::IS_HTTP`] and accepts `reconnect_at_offset` (subject
    /// to the reconnect script).
    #[must_use]
    pub fn http_like(mut self) -> Self {
        self.http_like = true;
        self
    }

    /// Queue a one-shot outcome for an upcoming read.
    pub fn push_read_fault(&self, fault: ReadFault) {
        self.state.lock().read_script.push_back(fault);
    }

    /// Fail every read (after the one-shot script drains) with `err`.
    pub fn fail_reads_forever(&self, err: WeirError) {
        self.state.lock().fail_reads = Some(err);
    }

    /// Clear the read script and any forever-failure.
    pub fn heal_reads(&self) {
        let mut state = self.state.lock();
        state.read_script.clear();
        state.fail_reads = None;
    }

    /// Queue a one-shot failure for an upcoming reconnect.
    pub fn push_reconnect_fault(&self, err: WeirError) {
        self.state.lock().reconnect_script.push_back(err);
    }

    /// Control what reconnect writes into its `query_and_set_proxy`
    /// out-flag (simulating the transport's proxy negotiation result).
    pub fn set_proxy_on_reconnect(&self, configured: bool) {
        self.state.lock().proxy_on_reconnect = Some(configured);
    }

    /// Report a fixed bandwidth estimate from `estimated_bandwidth_kbps`.
    pub fn set_bandwidth_kbps(&self, kbps: u32) {
        self.state.lock().bandwidth_kbps = Some(kbps);
    }

    /// Number of `read_at` calls observed.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    /// Number of `reconnect_at_offset` calls observed.
    pub fn reconnect_calls(&self) -> u64 {
        self.reconnect_calls.load(Ordering::Relaxed)
    }

    /// Number of `disconnect` calls observed.
    pub fn disconnect_calls(&self) -> u64 {
        self.disconnect_calls.load(Ordering::Relaxed)
    }
}

impl<S: DataSource> DataSource for FaultSource<S> {
    fn init_check(&self) -> Result<()> {
        self.inner.init_check()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);

        let fault = {
            let mut state = self.state.lock();
            match state.read_script.pop_front() {
                Some(fault) => Some(fault),
                None => state.fail_reads.clone().map(ReadFault::Error),
            }
        };

        match fault {
            Some(ReadFault::Error(err)) => {
                debug!(offset, %err, "injecting read fault");
                Err(err)
            }
            Some(ReadFault::Eos) => Ok(0),
            Some(ReadFault::Short(n)) => {
                let n = n.min(buf.len());
                self.inner.read_at(offset, &mut buf[..n])
            }
            None => self.inner.read_at(offset, buf),
        }
    }

    fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn flags(&self) -> SourceFlags {
        let mut flags = self.inner.flags();
        if self.http_like {
            flags |= SourceFlags::IS_HTTP;
        }
        flags
    }

    fn reconnect_at_offset(&self, offset: u64, query_and_set_proxy: &mut bool) -> Result<()> {
        self.reconnect_calls.fetch_add(1, Ordering::Relaxed);

        let (fault, proxy) = {
            let mut state = self.state.lock();
            (state.reconnect_script.pop_front(), state.proxy_on_reconnect)
        };
        if let Some(configured) = proxy {
            *query_and_set_proxy = configured;
        }
        if let Some(err) = fault {
            debug!(offset, %err, "injecting reconnect fault");
            return Err(err);
        }
        if self.http_like {
            Ok(())
        } else {
            self.inner.reconnect_at_offset(offset, query_and_set_proxy)
        }
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.disconnect();
    }

    fn uri(&self) -> Option<String> {
        self.inner.uri()
    }

    fn mime_type(&self) -> Option<String> {
        self.inner.mime_type()
    }

    fn estimated_bandwidth_kbps(&self) -> Result<u32> {
        if let Some(kbps) = self.state.lock().bandwidth_kbps {
            return Ok(kbps);
        }
        self.inner.estimated_bandwidth_kbps()
    }

    fn set_bandwidth_stat_freq(&self, freq: Duration) -> Result<()> {
        if self.http_like {
            return Ok(());
        }
        self.inner.set_bandwidth_stat_freq(freq)
    }

    fn drm_init(&self, mime: &str) -> Option<DrmSession> {
        self.inner.drm_init(mime)
    }

    fn drm_info(&self) -> Option<DrmInfo> {
        self.inner.drm_info()
    }
}
