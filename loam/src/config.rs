use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration options related to parsing & handling outbound CON requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Con {
  /// Retry strategy for CON requests that
  /// have not yet been ACKed.
  ///
  /// Defaults to the exponential schedule of RFC7252 with a 2 second
  /// initial timeout; retransmits land 2, 6 and 14 seconds after the
  /// first send.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use loam::config::Con;
  /// use loam::retry::Strategy;
  ///
  /// assert_eq!(Con::default().unacked_retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(2_000) });
  /// ```
  pub unacked_retry_strategy: Strategy,
  /// Retry strategy for CON requests that have been ACKed.
  ///
  /// This is **lazier** than `unacked_retry_strategy` and acts as the
  /// separate-response timeout: once a peer ACKs a request we can
  /// reasonably wait longer for the actual response, and when this
  /// deadline fires the dialog is reported as timed out.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use loam::config::Con;
  /// use loam::retry::Strategy;
  ///
  /// assert_eq!(Con::default().acked_retry_strategy,
  ///            Strategy::Delay { min: Milliseconds(4_000),
  ///                              max: Milliseconds(4_000) });
  /// ```
  pub acked_retry_strategy: Strategy,
  /// Number of times we are allowed to send a CON request
  /// before erroring.
  ///
  /// Defaults to 4 attempts.
  /// ```
  /// use loam::config::Con;
  /// use loam::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(4));
  /// ```
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { unacked_retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                          init_max: Milliseconds(2_000) },
          acked_retry_strategy: Strategy::Delay { min: Milliseconds(4_000),
                                                  max: Milliseconds(4_000) },
          max_attempts: Attempts(4) }
  }
}

/// Configuration options related to generating & correlating messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
  /// Seed folded into generated message tokens,
  /// customizable to allow for your application to generate tokens
  /// less guessably.
  ///
  /// The default value is 0, although it is
  /// best to set this to something else.
  /// (random integer, machine identifier)
  ///
  /// ```
  /// use loam::config::Msg;
  ///
  /// assert_eq!(Msg::default().token_seed, 0);
  /// ```
  pub token_seed: u16,

  /// Length in bytes of generated tokens (at most 8).
  ///
  /// ```
  /// use loam::config::Msg;
  ///
  /// assert_eq!(Msg::default().token_length, 4);
  /// ```
  pub token_length: u8,

  /// See [`Con`]
  pub con: Con,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          token_length: 4,
          con: Con::default() }
  }
}

/// Configuration options related to blockwise transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blockwise {
  /// Largest block the engine will emit or accept, in bytes.
  ///
  /// Must be a power of two in `16..=1024`. Payloads larger than this are
  /// carried with Block1/Block2 segmentation.
  ///
  /// ```
  /// use loam::config::Blockwise;
  ///
  /// assert_eq!(Blockwise::default().max_chunk_size, 1024);
  /// ```
  pub max_chunk_size: u16,

  /// How long an untouched blockwise response cache entry lives.
  ///
  /// Request accumulators get twice this, since they are correlated with a
  /// live peer that may pause mid-upload.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use loam::config::Blockwise;
  ///
  /// assert_eq!(Blockwise::default().max_age, Milliseconds(60_000u64));
  /// ```
  pub max_age: Millis,
}

impl Default for Blockwise {
  fn default() -> Self {
    Blockwise { max_chunk_size: 1024,
                max_age: Milliseconds(60_000) }
  }
}

/// Runtime config
///
/// ```
/// use loam::config::Config;
///
/// assert_eq!(Config::default().max_packet_size, 1152);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,
  /// See [`Blockwise`]
  pub block: Blockwise,
  /// Largest datagram the engine will serialize
  pub max_packet_size: usize,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             block: Blockwise::default(),
             max_packet_size: 1152 }
  }
}

impl Config {
  pub(crate) fn max_transmit_span_millis(&self) -> u64 {
    self.msg
        .con
        .unacked_retry_strategy
        .max_time(self.msg.con.max_attempts - Attempts(1))
        .0
  }

  // TODO: adjust these on the fly based on actual timings?
  pub(crate) fn max_latency_millis(&self) -> u64 {
    100_000
  }

  pub(crate) fn expected_processing_delay_millis(&self) -> u64 {
    200
  }

  /// How long a (session, message id) pair stays fresh for duplicate
  /// suppression.
  pub(crate) fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.expected_processing_delay_millis()
  }
}
