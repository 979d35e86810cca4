//! Core environment context trait for the join simulation.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the step state machine
/// can run against a wall clock or inside a deterministic harness.
///
/// # Implementations
///
/// - **Production**: `WallClockContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// For replayable runs, all methods that would normally introduce
/// non-determinism (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait JoinVizContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// The scan throttle and the settle delay are measured against this.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends the frame driver for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Derives a fresh random source for one store construction.
    ///
    /// The implementation combines the global seed with `seed_extension`
    /// so each rebuild gets an independent but reproducible stream.
    ///
    /// # Arguments
    /// * `seed_extension` - A value to combine with the global seed
    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
