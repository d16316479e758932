//! Streaming read-ahead cache.
//!
//! [`CachedSource`] sits in front of a slow, range-capable byte source and
//! exposes the same random-access contract to a media pipeline. A paged
//! sliding window of recently fetched bytes decouples the consumer's small
//! latency-sensitive reads from the upstream's bulky, latency-prone
//! fetches; a single background thread keeps the window filled to a high
//! watermark and evicts behind the reader as it advances.
//!
//! ```no_run
//! use std::sync::Arc;
//! use weir_cache::CachedSource;
//! use weir_source::{DataSource, MemorySource};
//!
//! let upstream = Arc::new(MemorySource::patterned(1 << 20));
//! let cached = CachedSource::with_config(upstream, Some("512/4096/0"), false, false);
//!
//! let mut buf = [0u8; 4096];
//! let n = cached.read_at(0, &mut buf).unwrap();
//! assert_eq!(n, 4096);
//! ```

pub mod config;
pub mod engine;
pub mod page;
mod sched;

pub use config::{resolve_params, scrub_cache_headers};
pub use engine::CachedSource;
pub use page::{Page, PageCache};
