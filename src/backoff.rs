//! Adaptive backoff from a short rolling history of lock dead-times
//!
//! Dead-time is the wall-clock time a writer spent waiting to acquire the
//! contended table lock. The last five realized dead-times drive the next
//! wait: a writer facing a busy table backs off roughly as long as recent
//! acquisitions took, plus jitter so competing writers desynchronize.

use rand::Rng;

/// Number of dead-time samples kept.
const HISTORY_CAPACITY: usize = 5;

/// Tuning knobs for contended-lock waiting, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Assumed dead-time before any history exists.
    pub default_deadtime: f64,
    /// Hard cap on any single computed wait.
    pub max_wait: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            default_deadtime: 10.0,
            max_wait: 180.0,
        }
    }
}

/// Fixed-capacity ring buffer of recent dead-times.
#[derive(Debug)]
pub struct DeadtimeHistory {
    policy: BackoffPolicy,
    samples: [f64; HISTORY_CAPACITY],
    len: usize,
    next: usize,
}

impl DeadtimeHistory {
    /// Create an empty history under the given policy.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            samples: [0.0; HISTORY_CAPACITY],
            len: 0,
            next: 0,
        }
    }

    /// Record a realized dead-time, evicting the oldest sample beyond
    /// capacity.
    pub fn record(&mut self, deadtime: f64) {
        self.samples[self.next] = deadtime.max(0.0);
        self.next = (self.next + 1) % HISTORY_CAPACITY;
        self.len = (self.len + 1).min(HISTORY_CAPACITY);
    }

    /// Running average of the recorded dead-times; the policy default
    /// before any history.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> f64 {
        if self.len == 0 {
            return self.policy.default_deadtime;
        }
        self.samples[..self.len].iter().sum::<f64>() / self.len as f64
    }

    /// Compute the next wait after a failed acquisition: average dead-time
    /// plus the time already spent on this attempt plus jitter in
    /// `[1, max(average, 1)]`, capped at the policy maximum.
    pub fn next_wait<R: Rng>(&self, elapsed_this_attempt: f64, rng: &mut R) -> f64 {
        let average = self.average();
        let jitter = rng.gen_range(1.0..=average.max(1.0));
        (average + elapsed_this_attempt.max(0.0) + jitter).min(self.policy.max_wait)
    }

    /// Number of recorded samples (at most 5).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no dead-time has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
