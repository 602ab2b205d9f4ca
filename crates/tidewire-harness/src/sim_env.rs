//! Simulated environment: manual clock and seeded RNG.

use std::{
    future::Future,
    ops::{Add, Sub},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tidewire_core::Environment;

/// Point on the simulated timeline, measured from simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Simulation start.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Time elapsed since simulation start.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

#[derive(Debug)]
struct SimState {
    now: Mutex<Duration>,
    rng: Mutex<ChaCha8Rng>,
}

/// Deterministic [`Environment`].
///
/// Clones share the same clock and RNG, so every component of one simulation
/// observes one timeline. Time only moves through [`advance`](Self::advance),
/// [`advance_to`](Self::advance_to) or `sleep`.
#[derive(Debug, Clone)]
pub struct SimEnv {
    inner: Arc<SimState>,
}

impl SimEnv {
    /// Create an environment whose RNG is seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(SimState {
                now: Mutex::new(Duration::ZERO),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        *self.inner.now.lock() += duration;
    }

    /// Move the clock to `instant`. No-op if `instant` is in the past.
    pub fn advance_to(&self, instant: SimInstant) {
        let mut now = self.inner.now.lock();
        if instant.0 > *now {
            *now = instant.0;
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(*self.inner.now.lock())
    }

    /// Advances the clock immediately, then yields once.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        let env = self.clone();
        async move {
            env.advance(duration);
            tokio::task::yield_now().await;
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.inner.rng.lock().fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);

        assert_eq!(a.random_u64(), b.random_u64());
        assert_ne!(a.random_u64(), SimEnv::with_seed(8).random_u64());
    }

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::with_seed(1);
        let clone = env.clone();

        clone.advance(Duration::from_millis(250));
        assert_eq!(env.now().since_start(), Duration::from_millis(250));

        env.advance_to(SimInstant::ZERO);
        assert_eq!(clone.now() - SimInstant::ZERO, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let env = SimEnv::with_seed(1);
        let start = env.now();

        env.sleep(Duration::from_secs(30)).await;

        assert_eq!(env.now() - start, Duration::from_secs(30));
    }
}
