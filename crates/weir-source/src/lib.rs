//! Upstream byte-source contract for the Weir streaming cache.
//!
//! A [`DataSource`] is a random-access reader over a possibly remote byte
//! stream. The cache engine is its only demanding consumer: it calls
//! [`DataSource::read_at`] from a background thread with no engine lock
//! held, expects the call to block as long as it likes, and expects
//! [`DataSource::disconnect`] (from any thread) to abort an in-flight read
//! promptly.

pub mod fault;
pub mod memory;
pub mod traits;

pub use fault::{FaultSource, ReadFault};
pub use memory::MemorySource;
pub use traits::{DataSource, DrmInfo, DrmSession};
