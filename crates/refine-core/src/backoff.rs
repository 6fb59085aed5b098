//! Exponential backoff with jitter, shared by every retry loop.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the capped delay added or removed at random, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Backoff {
    /// `base * 2^attempt`, capped at `max`, then spread by the jitter
    /// factor. A server hint wins outright.
    pub fn delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }
        let base = self.base.as_millis() as f64;
        let capped = (base * 2f64.powi(attempt.min(30) as i32)).min(self.max.as_millis() as f64);
        let spread = capped * self.jitter_factor.clamp(0.0, 1.0);
        // unit in [-1.0, 1.0]
        let unit = (next_random() % 2001) as f64 / 1000.0 - 1.0;
        Duration::from_millis((capped + spread * unit).max(1.0) as u64)
    }
}

/// xorshift64 over a thread-local seed. Only used for jitter.
fn next_random() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static SEED: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9E37_79B9_7F4A_7C15)
                | 1
        );
    }

    SEED.with(|seed| {
        let mut x = seed.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        seed.set(x);
        x
    })
}
