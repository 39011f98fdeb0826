//! Incremental review sync for hotels tracked on an OTA.
//!
//! Tracked hotels are split into never-crawled and already-crawled sets. The
//! first are scraped in full, the second only for their most recent page of
//! reviews, which is then cut down to what is newer than the stored
//! high-water mark before everything is appended to the review table.

pub mod checker;
pub mod config;
pub mod crawler;
pub mod storage;
pub mod testing;
