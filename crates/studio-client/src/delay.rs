//! Randomized pauses between chained studio calls

use std::time::Duration;

use rand::RngExt;

/// A pause of a whole number of seconds.
///
/// With both bounds the length is drawn uniformly from `[min, max]`; with one
/// bound it is exactly `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: Option<u64>,
}

impl DelayRange {
    pub const fn fixed(secs: u64) -> Self {
        Self {
            min_secs: secs,
            max_secs: None,
        }
    }

    pub const fn between(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs: Some(max_secs),
        }
    }

    /// Draw one pause length.
    pub fn pick(&self) -> Duration {
        let secs = match self.max_secs {
            Some(max) if max > self.min_secs => rand::rng().random_range(self.min_secs..=max),
            _ => self.min_secs,
        };
        Duration::from_secs(secs)
    }

    /// Sleep for one drawn pause.
    pub async fn sleep(&self) {
        let pause = self.pick();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    /// Sleep for one drawn pause, but never past `cap`.
    pub async fn sleep_at_most(&self, cap: Duration) {
        let pause = self.pick().min(cap);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}
