//! Delay strategies used while waiting on a raw channel that is not ready.
//!
//! Both strategies are infinite iterators of [`Duration`]; bound them with
//! `take` or a deadline.

use std::time::Duration;

/// A strategy driven by a fixed interval between attempts.
/// ```
/// use std::time::Duration;
/// use fluvio_tls_channel::backoff::FixedDelay;
///
/// let mut delays = FixedDelay::from_millis(5).take(2);
/// assert_eq!(delays.next(), Some(Duration::from_millis(5)));
/// assert_eq!(delays.next(), Some(Duration::from_millis(5)));
/// assert_eq!(delays.next(), None);
/// ```
#[derive(Default, Clone, Debug, Eq, PartialEq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl Iterator for FixedDelay {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.delay)
    }
}

/// A strategy driven by exponential back-off.
///
/// Each delay is the previous one multiplied by the base, saturating at
/// `u64::MAX` milliseconds or at `max_delay` when set.
#[derive(Default, Clone, Debug, Eq, PartialEq)]
pub struct ExponentialBackoff {
    base_millis: u64,
    current_millis: u64,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn from_millis(millis: u64) -> Self {
        Self {
            base_millis: millis,
            current_millis: millis,
            max_delay: None,
        }
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// start over from the base delay
    pub fn reset(&mut self) {
        self.current_millis = self.base_millis;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let duration = Duration::from_millis(self.current_millis);
        if let Some(ref max_delay) = self.max_delay {
            if duration > *max_delay {
                return Some(*max_delay);
            }
        };
        if let Some(next) = self.current_millis.checked_mul(self.base_millis) {
            self.current_millis = next;
        } else {
            self.current_millis = u64::MAX;
        }
        Some(duration)
    }
}
