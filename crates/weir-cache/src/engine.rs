//! The read-ahead engine.
//!
//! [`CachedSource`] wraps a slow [`DataSource`] and exposes the same
//! random-access contract, backed by a paged sliding window that a single
//! background thread keeps filled to the high watermark. Consumer reads
//! that hit the window are served directly under the engine lock; misses
//! are handed to the background thread, which seeks, refills, and retries
//! the read until it can be satisfied or the stream is known to be done.
//!
//! Two threads cooperate on the shared state:
//!
//! - the caller thread: `read_at`, `disconnect`, size/config getters. It
//!   only mutates state on the fast-path cache hit and on disconnect.
//! - the pump thread (one per engine): all upstream I/O, all page
//!   mutations, all state-machine transitions.
//!
//! The engine lock is deliberately dropped around every upstream
//! `read_at`/`reconnect_at_offset` call: those may block indefinitely and
//! may re-enter the source's own passthroughs, and holding the lock across
//! them would stall fast-path reads unboundedly. The in-flight fetch page
//! is owned exclusively between acquire and append, so no data race
//! results from the gap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use weir_error::{Result, WeirError};
use weir_source::{DataSource, DrmInfo, DrmSession};
use weir_types::limits::{
    GRAY_AREA, IDLE_POLL, MAX_RETRIES, PAGE_SIZE, READ_RETRY_DELAY, RETRY_DELAY, SEEK_BACK_PADDING,
};
use weir_types::SourceFlags;

use crate::config;
use crate::page::PageCache;
use crate::sched::{Handle, Mailbox, Message, Scheduler};

/// Reply published by the pump thread for a waiting slow-path read.
type ReadReply = Result<Vec<u8>>;

/// Mutable engine state. Every field is protected by the engine lock.
struct State {
    /// The paged window of fetched bytes.
    cache: PageCache,
    /// Absolute upstream offset of the first cached byte.
    cache_offset: u64,
    /// One past the last byte the consumer has observed.
    last_access_pos: u64,
    /// Latched outcome of the most recent upstream fetch; `None` is healthy.
    final_status: Option<WeirError>,
    /// Reconnect attempts left before `final_status` becomes terminal.
    retries_left: u32,
    /// The prefetcher is actively growing the window.
    fetching: bool,
    /// Teardown requested; every waiter must fail fast.
    disconnecting: bool,
    /// Suspend requested; the pump drops the connection and stops
    /// rescheduling itself until resume.
    suspended: bool,
    /// When the last fetch completed, for keep-alive scheduling.
    last_fetch_time: Option<Instant>,
    /// Prefetch restart threshold (bytes ahead of the reader).
    lo_water: usize,
    /// Prefetch cutoff (total cached bytes).
    hi_water: usize,
    /// Idle keep-alive period; zero disables.
    keepalive: Duration,
    /// Tear down the upstream connection when the window is full.
    disconnect_at_hi: bool,
    /// A proxy is currently configured for the upstream connection.
    proxy_configured: bool,
    /// Request proxy renegotiation on the next reconnect.
    query_and_set_proxy: bool,
    /// One-shot mailbox for the slow-path read reply.
    async_result: Option<ReadReply>,
}

impl State {
    /// Evict behind the reader and resume fetching, if warranted.
    ///
    /// `force` restarts fetching even when plenty is still cached ahead
    /// (used when a read pokes an idle engine); `ignore_low` restarts
    /// without the low-water trigger (explicit resume). Outside of `force`,
    /// a 1 MiB band behind the reader is kept to absorb position jitter.
    fn restart_prefetch_if_needed(&mut self, ignore_low: bool, force: bool) {
        if self.fetching || (self.final_status.is_some() && self.retries_left == 0) {
            return;
        }

        let window_end = self.cache_offset + self.cache.total_size() as u64;
        if !ignore_low
            && !force
            && window_end.saturating_sub(self.last_access_pos) >= self.lo_water as u64
        {
            return;
        }

        let mut max_evict = self.last_access_pos.saturating_sub(self.cache_offset);
        if !force {
            if max_evict < GRAY_AREA as u64 {
                return;
            }
            max_evict -= GRAY_AREA as u64;
        }

        let budget = usize::try_from(max_evict).unwrap_or(usize::MAX);
        let released = self.cache.release_from_start(budget);
        self.cache_offset += released as u64;

        info!(
            total = self.cache.total_size(),
            cache_offset = self.cache_offset,
            "restarting prefetcher"
        );
        self.fetching = true;
    }

    /// Move the window to `offset`.
    ///
    /// A no-op when `offset` already falls within the window, including
    /// exactly at its end (the prefetcher is about to extend it there).
    /// Otherwise the cache is drained, the retry budget restored, and
    /// fetching resumed at the new position.
    fn seek(&mut self, offset: u64) {
        self.last_access_pos = offset;

        let window_end = self.cache_offset + self.cache.total_size() as u64;
        if offset >= self.cache_offset && offset <= window_end {
            return;
        }

        info!(offset, "new cache range");
        self.cache_offset = offset;

        let total = self.cache.total_size();
        let released = self.cache.release_from_start(total);
        assert_eq!(released, total, "full drain must release every byte");

        self.retries_left = MAX_RETRIES;
        self.fetching = true;
    }

    fn window_end(&self) -> u64 {
        self.cache_offset + self.cache.total_size() as u64
    }
}

/// Shared engine core: the source, the scheduler handle, and the state.
struct EngineInner {
    source: Arc<dyn DataSource>,
    /// Whether the upstream is HTTP-based, sampled once at construction.
    is_http: bool,
    sched: Handle,
    /// Outer mutex guaranteeing a single outstanding consumer read.
    /// Always acquired before the state lock.
    serializer: Mutex<()>,
    state: Mutex<State>,
    /// Wakes a slow-path reader when a reply is published or teardown hits.
    cond: Condvar,
}

impl EngineInner {
    fn on_message(&self, msg: Message) {
        match msg {
            Message::Fetch => self.on_fetch(),
            Message::Read { offset, len } => self.on_read(offset, len),
        }
    }

    /// One activation of the prefetch loop.
    fn on_fetch(&self) {
        let now = Instant::now();
        let (do_fetch, keepalive_due) = {
            let mut state = self.state.lock();

            if state.final_status.is_some() && state.retries_left == 0 {
                debug!("terminal status latched, prefetching done for now");
                state.fetching = false;
            }

            // a proxy restart may be behind the failure: renegotiate the
            // proxy on the next reconnect
            if state.final_status.is_some() && state.retries_left > 0 && state.proxy_configured {
                state.query_and_set_proxy = true;
            }

            let keepalive_due = !state.fetching
                && state.final_status.is_none()
                && state.keepalive > Duration::ZERO
                && state
                    .last_fetch_time
                    .is_some_and(|last| now >= last + state.keepalive);

            (state.fetching, keepalive_due)
        };

        if do_fetch || keepalive_due {
            if keepalive_due {
                info!("keep-alive fetch");
            }

            self.fetch_internal();

            let hit_hi_water = {
                let mut state = self.state.lock();
                state.last_fetch_time = Some(Instant::now());

                let mut hit = false;
                if state.fetching && state.cache.total_size() >= state.hi_water {
                    info!(total = state.cache.total_size(), "cache full, pausing prefetch");
                    state.fetching = false;
                    hit = state.disconnect_at_hi && self.is_http && !state.proxy_configured;
                }
                hit
            };

            if hit_hi_water {
                debug!("disconnecting at high watermark");
                self.source.disconnect();
                // the next cache miss reconnects at the window end
                self.state.lock().final_status = Some(WeirError::Again);
            }
        } else {
            self.state.lock().restart_prefetch_if_needed(false, false);
        }

        let (suspended, delay) = {
            let state = self.state.lock();
            let delay = if state.fetching {
                if state.final_status.is_some() && state.retries_left > 0 {
                    RETRY_DELAY
                } else {
                    Duration::ZERO
                }
            } else {
                IDLE_POLL
            };
            (state.suspended, delay)
        };

        if suspended {
            debug!("disconnecting for suspend");
            self.source.disconnect();
            self.state.lock().final_status = Some(WeirError::Again);
            // no reschedule: resume posts the next fetch
            return;
        }

        self.sched.post_delayed(Message::Fetch, delay);
    }

    /// One fetch step: reconnect if the last attempt failed, then read one
    /// page at the window end.
    fn fetch_internal(&self) {
        let (reconnect, suspended, fetch_offset, mut proxy_flag) = {
            let mut state = self.state.lock();
            debug_assert!(
                state.final_status.is_none() || state.retries_left > 0,
                "fetch scheduled after terminal status"
            );

            let mut reconnect = false;
            if state.final_status.is_some() {
                state.retries_left -= 1;
                reconnect = true;
            }

            (
                reconnect,
                state.suspended,
                state.window_end(),
                state.query_and_set_proxy,
            )
        };

        if reconnect && !suspended {
            let result = self.source.reconnect_at_offset(fetch_offset, &mut proxy_flag);

            let mut state = self.state.lock();
            // proxy reconfiguration failed on reconnect: fall back to the
            // noproxy behaviour (no keep-alives) for the rest of the session
            if state.proxy_configured && !proxy_flag && state.disconnect_at_hi {
                state.keepalive = Duration::ZERO;
            }
            state.proxy_configured = proxy_flag;
            state.query_and_set_proxy = proxy_flag;

            if state.disconnecting {
                state.retries_left = 0;
                state.final_status = Some(WeirError::EndOfStream);
                return;
            }
            match result {
                Err(err) if err.is_permanent() => {
                    // the server will keep refusing range requests
                    warn!(%err, "reconnect failed permanently, giving up");
                    state.retries_left = 0;
                    return;
                }
                Err(err) => {
                    info!(%err, retries_left = state.retries_left, "reconnect attempt failed");
                    return;
                }
                Ok(()) => {}
            }
        }

        let mut page = self.state.lock().cache.acquire_page();

        // the page is exclusively ours until appended or released, so the
        // lock stays dropped across the (possibly long) upstream read
        let result = self.source.read_at(fetch_offset, page.buf_mut());

        let mut state = self.state.lock();
        let disconnecting = state.disconnecting;
        match result {
            Ok(0) => {
                info!("caching reached end of stream");
                state.retries_left = 0;
                state.final_status = Some(WeirError::EndOfStream);
                state.cache.release_page(page);
            }
            _ if disconnecting => {
                info!("fetch completed during teardown");
                state.retries_left = 0;
                state.final_status = Some(WeirError::EndOfStream);
                state.cache.release_page(page);
            }
            Ok(n) => {
                if state.final_status.is_some() {
                    info!("retrying a previously failed fetch succeeded");
                }
                state.retries_left = MAX_RETRIES;
                state.final_status = None;

                page.set_fill(n);
                state.cache.append_page(page);
            }
            Err(err) => {
                if err.is_permanent() {
                    state.retries_left = 0;
                }
                error!(%err, retries_left = state.retries_left, "fetch failed");
                state.final_status = Some(err);
                state.cache.release_page(page);
            }
        }
    }

    /// Service a deferred consumer read on the pump thread.
    fn on_read(&self, offset: u64, len: usize) {
        let result = self.read_internal(offset, len);

        if matches!(result, Err(WeirError::Again)) {
            let (disconnecting, suspended) = {
                let state = self.state.lock();
                (state.disconnecting, state.suspended)
            };
            if !disconnecting && !suspended {
                // keep the consumer waiting; the window will catch up
                self.sched
                    .post_delayed(Message::Read { offset, len }, READ_RETRY_DELAY);
                return;
            }
        }

        let mut state = self.state.lock();
        if state.disconnecting {
            // do not publish: the waiter is already failing with EOS
            self.cond.notify_all();
            return;
        }

        assert!(
            state.async_result.is_none(),
            "read reply mailbox must be empty"
        );
        state.async_result = Some(result);
        self.cond.notify_all();
    }

    /// Resolve a read against the current window, seeking it if needed.
    ///
    /// Returns the copied bytes (possibly short of `len` once the stream
    /// has terminally failed), or [`WeirError::Again`] when the window has
    /// not caught up yet.
    fn read_internal(&self, offset: u64, len: usize) -> ReadReply {
        let mut state = self.state.lock();

        if !state.fetching {
            // an idle engine poked by a read: restart at the new position
            state.last_access_pos = offset;
            state.restart_prefetch_if_needed(false, true);
        }

        if offset < state.cache_offset || offset >= state.window_end() {
            // a neighbouring demuxed stream will likely ask for bytes just
            // before this one; start the new window a little early
            let seek_offset = offset.saturating_sub(SEEK_BACK_PADDING);
            state.seek(seek_offset);
        }

        let delta =
            usize::try_from(offset - state.cache_offset).expect("offset near window after seek");
        let total = state.cache.total_size();

        if state.final_status.is_some() && state.retries_left == 0 {
            if delta >= total {
                return Err(state.final_status.clone().expect("status checked above"));
            }
            let avail = (total - delta).min(len);
            let mut out = vec![0; avail];
            state.cache.copy(delta, &mut out);
            return Ok(out);
        }

        if offset + len as u64 <= state.window_end() {
            let mut out = vec![0; len];
            state.cache.copy(delta, &mut out);
            return Ok(out);
        }

        debug!(offset, len, "deferring read until the window catches up");
        Err(WeirError::Again)
    }
}

/// A caching, prefetching wrapper around a [`DataSource`].
///
/// Construction spawns the prefetch thread and immediately starts filling
/// the window from offset 0. Dropping the engine stops that thread (no
/// callback runs afterwards) before releasing the cached pages.
pub struct CachedSource {
    inner: Arc<EngineInner>,
    #[allow(dead_code)] // held for its Drop: stops and joins the pump thread
    scheduler: Scheduler,
}

impl CachedSource {
    /// Wrap `source` with default cache parameters.
    #[must_use]
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self::with_config(source, None, false, false)
    }

    /// Wrap `source` with explicit configuration.
    ///
    /// `cache_config` is a `"lo/hi/keepalive"` string overriding the
    /// process properties (see [`config::resolve_params`]).
    /// `disconnect_at_hi` tears the connection down whenever the window is
    /// full; combined with no configured proxy it also disables keep-alive
    /// (disconnecting and keeping alive make no sense together).
    #[must_use]
    pub fn with_config(
        source: Arc<dyn DataSource>,
        cache_config: Option<&str>,
        disconnect_at_hi: bool,
        is_proxy_configured: bool,
    ) -> Self {
        let params = config::resolve_params(cache_config);
        let mut keepalive = params.keepalive;
        if disconnect_at_hi && !is_proxy_configured {
            keepalive = Duration::ZERO;
        }

        let is_http = source.flags().contains(SourceFlags::IS_HTTP);

        let mailbox = Mailbox::new();
        let sched = Handle::new(Arc::clone(&mailbox));
        let inner = Arc::new(EngineInner {
            source,
            is_http,
            sched,
            serializer: Mutex::new(()),
            cond: Condvar::new(),
            state: Mutex::new(State {
                cache: PageCache::new(PAGE_SIZE),
                cache_offset: 0,
                last_access_pos: 0,
                final_status: None,
                retries_left: MAX_RETRIES,
                fetching: true,
                disconnecting: false,
                suspended: false,
                last_fetch_time: None,
                lo_water: params.lo_water_bytes,
                hi_water: params.hi_water_bytes,
                keepalive,
                disconnect_at_hi,
                proxy_configured: is_proxy_configured,
                query_and_set_proxy: false,
                async_result: None,
            }),
        });

        let worker = Arc::clone(&inner);
        let scheduler = Scheduler::spawn("weir-prefetch", mailbox, move |msg| {
            worker.on_message(msg);
        });
        inner.sched.post(Message::Fetch);

        Self { inner, scheduler }
    }

    /// Absolute offset one past the last byte ever cached.
    #[must_use]
    pub fn cached_size(&self) -> u64 {
        let state = self.inner.state.lock();
        state.window_end()
    }

    /// Bytes cached ahead of the reader, plus the engine status.
    ///
    /// While reconnect attempts remain, a transient failure is masked as
    /// healthy — consumers should not react to errors the prefetcher is
    /// still going to absorb.
    #[must_use]
    pub fn approx_data_remaining(&self) -> (u64, Option<WeirError>) {
        let state = self.inner.state.lock();

        let mut status = state.final_status.clone();
        if status.is_some() && state.retries_left > 0 {
            status = None;
        }

        let remaining = state.window_end().saturating_sub(state.last_access_pos);
        (remaining, status)
    }

    /// Tear the engine down: every waiting and future read fails with
    /// end-of-stream, and the upstream connection is dropped. Idempotent.
    pub fn disconnect(&self) {
        debug!("disconnecting");
        {
            let mut state = self.inner.state.lock();
            // a fetch returning after this is latched as end of stream
            state.disconnecting = true;
            self.inner.cond.notify_all();
        }
        // outside the lock: lets any in-flight upstream read abort promptly
        self.inner.source.disconnect();
    }

    /// Park the engine for a pause: the pump drops the upstream connection
    /// on its next activation and stops rescheduling until [`resume`].
    ///
    /// [`resume`]: Self::resume
    pub fn suspend(&self) {
        let mut state = self.inner.state.lock();
        state.final_status = Some(WeirError::Again);
        state.suspended = true;
    }

    /// Undo [`suspend`](Self::suspend): restart the prefetch loop.
    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            state.suspended = false;
        }
        self.inner.sched.post(Message::Fetch);
    }

    /// Restart prefetching regardless of the low-water trigger (used after
    /// the consumer has drained buffered data it had given up on).
    pub fn resume_fetching_if_necessary(&self) {
        let mut state = self.inner.state.lock();
        state.restart_prefetch_if_needed(true, false);
    }
}

impl DataSource for CachedSource {
    fn init_check(&self) -> Result<()> {
        self.inner.source.init_check()
    }

    /// Blocking random-access read.
    ///
    /// Serialized: at most one consumer read is outstanding at a time.
    /// Requests wholly inside the window return synchronously; everything
    /// else waits for the prefetch thread, which may involve a seek. At
    /// most `hi_water` bytes may be requested at once.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let _serialized = self.inner.serializer.lock();

        trace!(offset, len = buf.len(), "read_at");

        let mut state = self.inner.state.lock();
        assert!(
            buf.len() <= state.hi_water,
            "read larger than the high watermark"
        );
        if state.disconnecting {
            return Err(WeirError::EndOfStream);
        }

        // fast path: the request is wholly cached
        if offset >= state.cache_offset && offset + buf.len() as u64 <= state.window_end() {
            let delta = usize::try_from(offset - state.cache_offset).expect("within window");
            state.cache.copy(delta, buf);
            state.last_access_pos = offset + buf.len() as u64;
            return Ok(buf.len());
        }

        assert!(
            state.async_result.is_none(),
            "read reply mailbox must be empty before posting"
        );
        self.inner.sched.post(Message::Read {
            offset,
            len: buf.len(),
        });

        while state.async_result.is_none() && !state.disconnecting {
            self.inner.cond.wait(&mut state);
        }

        if state.disconnecting {
            state.async_result = None;
            return Err(WeirError::EndOfStream);
        }

        let reply = state.async_result.take().expect("wait loop saw a reply");
        match reply {
            Ok(bytes) => {
                let n = bytes.len();
                buf[..n].copy_from_slice(&bytes);
                if n > 0 {
                    state.last_access_pos = offset + n as u64;
                }
                Ok(n)
            }
            Err(err) => Err(err),
        }
    }

    fn size(&self) -> Option<u64> {
        self.inner.source.size()
    }

    /// Upstream flags minus the concerns this layer absorbs, plus
    /// [`SourceFlags::IS_CACHING`].
    fn flags(&self) -> SourceFlags {
        let upstream = self.inner.source.flags();
        (upstream - (SourceFlags::WANTS_PREFETCHING | SourceFlags::IS_HTTP))
            | SourceFlags::IS_CACHING
    }

    fn disconnect(&self) {
        CachedSource::disconnect(self);
    }

    fn uri(&self) -> Option<String> {
        self.inner.source.uri()
    }

    fn mime_type(&self) -> Option<String> {
        self.inner.source.mime_type()
    }

    fn estimated_bandwidth_kbps(&self) -> Result<u32> {
        if self.is_http() {
            return self.inner.source.estimated_bandwidth_kbps();
        }
        Err(WeirError::Unsupported)
    }

    fn set_bandwidth_stat_freq(&self, freq: Duration) -> Result<()> {
        if self.is_http() {
            return self.inner.source.set_bandwidth_stat_freq(freq);
        }
        Err(WeirError::Unsupported)
    }

    fn drm_init(&self, mime: &str) -> Option<DrmSession> {
        self.inner.source.drm_init(mime)
    }

    fn drm_info(&self) -> Option<DrmInfo> {
        self.inner.source.drm_info()
    }
}

impl CachedSource {
    fn is_http(&self) -> bool {
        self.inner.is_http
    }
}
