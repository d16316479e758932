//! Shared plain types for the Weir streaming cache.
//!
//! This crate holds everything both sides of the cache boundary need to
//! agree on without pulling in the engine itself: source capability flags,
//! cache tuning parameters, and the fixed limits of the paged window.

pub mod flags;
pub mod limits;
pub mod params;

pub use flags::SourceFlags;
pub use params::CacheParams;
