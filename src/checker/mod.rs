//! Decisions against what the review store already holds: which hotels are
//! new, and which freshly scraped reviews are newer than the stored ones.

pub mod classifier;
pub mod delta;

pub use classifier::{classify, Classification};
pub use delta::{filter_new, high_water_marks, HighWaterMarks};
