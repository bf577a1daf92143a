//! Credit thresholds per operation class
//!
//! Feed fetches are cheap and only need a small cushion; generation
//! submissions spend real credits and fail over much earlier. Both numbers
//! are configuration, never computed from the snapshot.

use serde::Deserialize;

/// Default minimum credits before a feed fetch fails over.
pub const FEED_THRESHOLD: i64 = 10;

/// Default minimum credits before a generation submission fails over.
pub const GENERATION_THRESHOLD: i64 = 44;

/// Which guard an operation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Feed,
    Generation,
}

/// Configured thresholds for both operation classes. Deserializes from the
/// `[failover]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Thresholds {
    #[serde(rename = "feed_threshold", default = "default_feed")]
    pub feed: i64,
    #[serde(rename = "generation_threshold", default = "default_generation")]
    pub generation: i64,
}

fn default_feed() -> i64 {
    FEED_THRESHOLD
}

fn default_generation() -> i64 {
    GENERATION_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            feed: FEED_THRESHOLD,
            generation: GENERATION_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn for_class(&self, class: OperationClass) -> i64 {
        match class {
            OperationClass::Feed => self.feed,
            OperationClass::Generation => self.generation,
        }
    }
}
