use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Timeout configuration allowing for "never time out" as an option
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

impl Timeout {
  /// Shrink this timeout so that it expires no later than `deadline_in`
  /// milliseconds from now.
  ///
  /// ```
  /// use loam::time::Timeout;
  ///
  /// let mut t = Timeout::Never;
  /// t.narrow(4_000);
  /// t.narrow(9_000);
  /// assert_eq!(t, Timeout::Millis(4_000));
  /// ```
  pub fn narrow(&mut self, deadline_in: u64) {
    *self = match *self {
      | Timeout::Never => Timeout::Millis(deadline_in),
      | Timeout::Millis(cur) => Timeout::Millis(cur.min(deadline_in)),
    };
  }
}

/// Milliseconds elapsed between two instants (zero when `later` precedes
/// `earlier` or the difference cannot be represented).
pub(crate) fn millis_between<C: Clock>(later: Instant<C>, earlier: Instant<C>) -> u64 {
  later.checked_duration_since(&earlier)
       .and_then(|d| Millis::try_from(d).ok())
       .map(|Milliseconds(ms)| ms)
       .unwrap_or(0)
}
