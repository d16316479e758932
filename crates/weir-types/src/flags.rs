//! Capability flags reported by a byte source.

bitflags::bitflags! {
    /// Capabilities and characteristics of a [`DataSource`]-style byte
    /// source, reported by its `flags()` method.
    ///
    /// A caching layer rewrites these on the way through: it strips
    /// `WANTS_PREFETCHING` and `IS_HTTP` (the cache absorbs both concerns)
    /// and adds `IS_CACHING` so downstream components can tell they are
    /// reading through a cache.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SourceFlags: u32 {
        /// The source is slow enough that a consumer should prefetch.
        const WANTS_PREFETCHING = 1;
        /// The source streams from localhost (proxy, loopback server).
        const STREAMED_FROM_LOCAL_HOST = 2;
        /// The source is itself a caching layer.
        const IS_CACHING = 4;
        /// The source is HTTP-based and supports reconnect-at-offset,
        /// bandwidth estimation, and explicit disconnects.
        const IS_HTTP = 8;
    }
}
