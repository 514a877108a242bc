use std::time::Duration;

/// Exponential doubling schedule: `delay(n) = base * 2^(n-1)`.
///
/// `n` is the 1-based index of the attempt that just finished, so the first
/// retry waits `base`, the second `2 * base`, and so on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
}

impl ExponentialBackoff {
    pub const fn new(base: Duration) -> Self {
        Self { base }
    }

    pub const fn from_millis(base_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms))
    }

    pub const fn base(&self) -> Duration {
        self.base
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        self.base.saturating_mul(1u32 << exp)
    }

    /// Sum of the first `retries` delays.
    pub fn total(&self, retries: usize) -> Duration {
        (1..=retries).map(|attempt| self.delay(attempt)).sum()
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_millis(10)
    }
}
