//! Production implementation of JoinVizContext using Tokio.

use crate::JoinVizContext;
use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Production context backed by the system clock and OS entropy.
///
/// Used when the frame driver paces itself in real time.
pub struct WallClockContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl WallClockContext {
    /// Creates a new WallClockContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for WallClockContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JoinVizContext for WallClockContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn derive_rng(&self, _seed_extension: u64) -> ChaCha8Rng {
        // Production stores are not meant to be replayed
        ChaCha8Rng::from_entropy()
    }

    fn seed(&self) -> u64 {
        0
    }
}
