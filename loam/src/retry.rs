use core::ops::{Add, RangeInclusive, Sub};

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use crate::time::{millis_between, Clock};

/// A non-blocking timer that allows a fixed-delay or exponential-backoff retry,
/// that lives alongside some operation to retry.
///
/// It does not _contain_ the work to be done (e.g. `Box<fn()>`); the caller
/// keeps the retryable thing (for the engine, a serialized message) next to
/// its timer and asks the timer what to do whenever it gets a chance.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  init: Milliseconds<u64>,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

impl Add for Attempts {
  type Output = Attempts;

  fn add(self, rhs: Self) -> Self::Output {
    Self(self.0 + rhs.0)
  }
}

impl Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Self) -> Self::Output {
    Self(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retrier
  pub fn new(start: Instant<C>, strategy: Strategy, max_attempts: Attempts) -> Self {
    Self { start,
           strategy,
           init: if strategy.has_jitter() {
             let seed = millis_between(start, Instant::new(0));
             let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
             Milliseconds(rand.gen_range(strategy.range()))
           } else {
             Milliseconds(*strategy.range().start())
           },
           max_attempts,
           attempts: Attempts(1) }
  }

  /// When the thing we keep trying fails, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet
  /// waited the appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else if self.is_ready(Milliseconds(millis_between(now, self.start)), self.attempts.0) {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// Check if the strategy says an appropriate time has passed
  pub fn is_ready(&self, Milliseconds(time_passed): Milliseconds<u64>, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    time_passed >= self.strategy.total_delay(self.init, attempts)
  }

  /// Milliseconds until the next deadline (zero when it is already due)
  pub fn due_in(&self, now: Instant<C>) -> u64 {
    let due_at = self.strategy.total_delay(self.init, self.attempts.0);
    due_at.saturating_sub(millis_between(now, self.start))
  }

  /// How many attempts have been performed so far
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Wait `init` between the first attempt and the second,
  /// then double the wait before every attempt after that.
  ///
  /// (`init` is picked at random from the inclusive `init_min..=init_max`
  /// range when they differ)
  Exponential {
    /// Minimum (inclusive) delay for second attempt
    init_min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for second attempt
    init_max: Milliseconds<u64>,
  },
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  Delay {
    /// Minimum (inclusive) delay for attempts
    min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for attempts
    max: Milliseconds<u64>,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we should probably skip the random number generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max),

      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max),
    }
  }

  /// Get the amount of time this strategy will take if all attempts fail
  pub fn max_time(&self, max_attempts: Attempts) -> Milliseconds<u64> {
    Milliseconds(self.total_delay(Milliseconds(*self.range().end()), max_attempts.0))
  }

  /// Given the initial delay and number of attempts that have been performed,
  /// yields the total time since the first attempt at which the next attempt is due.
  fn total_delay(&self, Milliseconds(init): Milliseconds<u64>, attempt: u16) -> u64 {
    match self {
      // | attempt | total delay      |
      // | 1       | init             |
      // | 2       | init * 3         |
      // | 3       | init * 7         |
      // | n       | init * (2^n - 1) |
      | Self::Exponential { .. } => init * (2u64.pow(attempt as u32) - 1),
      | Self::Delay { .. } => init * attempt as u64,
    }
  }
}

#[cfg(test)]
mod test {
  use embedded_time::Clock as _;

  use super::*;
  use crate::test::TestClock;

  #[test]
  fn delay_retrier() {
    let (clock, time) = TestClock::new();
    let now = || clock.try_now().unwrap();
    let mut retry = RetryTimer::new(now(),
                                    Strategy::Delay { min: Milliseconds(1000),
                                                      max: Milliseconds(1000) },
                                    Attempts(5));

    // attempt 1 happens before asking what_should_i_do

    time.set(999);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    time.set(1000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);
    // Fails again (attempt 2)

    time.set(1999);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    time.set(2000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);
    // Fails again (attempt 3)

    time.set(10_000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);
    // Fails again (attempt 5)

    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Cry);
  }

  #[test]
  fn exponential_retrier() {
    let (clock, time) = TestClock::new();
    let now = || clock.try_now().unwrap();
    let mut retry = RetryTimer::new(now(),
                                    Strategy::Exponential { init_min: Milliseconds(2000),
                                                            init_max: Milliseconds(2000) },
                                    Attempts(4));

    // attempt 1 happens before asking what_should_i_do;
    // retransmits land at 2s, 6s and 14s, cumulative doubling

    time.set(1999);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    time.set(2000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);

    time.set(5999);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    time.set(6000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);

    time.set(13_999);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    time.set(14_000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);

    // all four sends spent; the next deadline is terminal
    assert_eq!(retry.due_in(now()), 16_000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Cry);
  }

  #[test]
  fn exp_calculation() {
    let strategy = Strategy::Exponential { init_min: Milliseconds(100),
                                           init_max: Milliseconds(100) };
    assert_eq!(strategy.total_delay(Milliseconds(100), 1), 100);
    assert_eq!(strategy.total_delay(Milliseconds(100), 2), 300);
    assert_eq!(strategy.total_delay(Milliseconds(100), 3), 700);
    assert_eq!(strategy.max_time(Attempts(3)), Milliseconds(700u64));
  }
}
