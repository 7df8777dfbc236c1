use core::ops::{Add, Sub};

use std_alloc::vec::Vec;

use crate::from_bytes::{Cursor, TryConsumeBytes};

/// Option parsing errors
pub mod parse_error;
pub use parse_error::*;

/// Block1 / Block2 option value
pub mod block;
pub use block::*;

macro_rules! opt {
  (#[doc = $doc:expr] $name:ident = $n:literal) => {
    #[doc = $doc]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: crate::OptNumber = crate::OptNumber($n);
  };
}

pub(crate) use opt;

/// Non-repeatable options
pub mod no_repeat {
  use super::opt;

  opt!(#[doc = "Observe; <https://www.rfc-editor.org/rfc/rfc7641#section-2>"]
       OBSERVE = 6);
  opt!(#[doc = "Content-Format; RFC7252 section 5.10.3"]
       CONTENT_FORMAT = 12);
  opt!(#[doc = "Block2: descriptor of one block of a segmented response \
                payload; draft-ietf-core-block"]
       BLOCK2 = 23);
  opt!(#[doc = "Block1: descriptor of one block of a segmented request \
                payload; draft-ietf-core-block"]
       BLOCK1 = 27);
  opt!(#[doc = "Size2: advertised total length of a segmented response"]
       SIZE2 = 28);
  opt!(#[doc = "Size1: advertised total length of a segmented request"]
       SIZE1 = 60);
}

/// Repeatable options
pub mod repeat {
  use super::opt;

  opt!(#[doc = "ETag; RFC7252 section 5.10.6"]
       ETAG = 4);
  opt!(#[doc = "Location-Path; RFC7252 section 5.10.7"]
       LOCATION_PATH = 8);
  opt!(#[doc = "Uri-Path; RFC7252 section 5.10.1"]
       PATH = 11);
  opt!(#[doc = "Uri-Query; RFC7252 section 5.10.1"]
       QUERY = 15);
}

/// The "Option Delta" is the difference between this Option's Number
/// and the previous Option's number.
///
/// This is just used to compute the Option Number, identifying which
/// Option is being set (e.g. Content-Format has a Number of 12)
///
/// # Related
/// - [RFC7252#section-3.1 Option Format](https://datatracker.ietf.org/doc/html/rfc7252#section-3.1)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

/// A CoAP Option Number, identifying which option an [`Opt`] carries
/// (e.g. Uri-Path has a Number of 11).
///
/// # Related
/// - [RFC7252#section-12.2 Core CoAP Option Numbers](https://datatracker.ietf.org/doc/html/rfc7252#section-12.2)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

impl Add for OptNumber {
  type Output = OptNumber;

  fn add(self, rhs: Self) -> Self::Output {
    Self(self.0 + rhs.0)
  }
}

impl Sub for OptNumber {
  type Output = OptNumber;

  fn sub(self, rhs: Self) -> Self::Output {
    Self(self.0 - rhs.0)
  }
}

/// The value of a CoAP option; an opaque byte string.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Encode an unsigned integer option value (e.g. Observe, Size1/2)
  /// in the minimal big-endian form mandated by RFC7252 section 3.2.
  ///
  /// ```
  /// use loam_msg::OptValue;
  ///
  /// assert_eq!(OptValue::uint(0).0, Vec::<u8>::new());
  /// assert_eq!(OptValue::uint(12).0, vec![12]);
  /// assert_eq!(OptValue::uint(0x0100).0, vec![1, 0]);
  /// ```
  pub fn uint(val: u32) -> Self {
    let bytes = val.to_be_bytes();
    let zeros = bytes.iter().take_while(|b| **b == 0).count();
    Self(bytes[zeros..].to_vec())
  }

  /// Decode an option value holding an unsigned integer of up to 4 bytes.
  pub fn as_uint(&self) -> Option<u32> {
    match self.0.len() {
      | n if n > 4 => None,
      | _ => Some(self.0.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))),
    }
  }

  /// Borrow the raw bytes of this value
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

/// Low-level representation of a CoAP Option, closely mirroring the byte
/// layout of message options.
///
/// Notably, this doesn't include the Number (key, e.g. "Content-Format" or
/// "Uri-Path"); on the wire the number is recovered by summing the
/// [deltas](OptDelta) of all preceding options.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

impl Opt {
  /// Given a collection to [`Extend`] and an Opt, add that Opt's bytes to the collection.
  pub fn extend_bytes(self, bytes: &mut impl Extend<u8>) {
    let (del, del_bytes) = crate::to_bytes::opt_len_or_delta(self.delta.0);
    let (len, len_bytes) = crate::to_bytes::opt_len_or_delta(self.value.0.len() as u16);
    let del = del << 4;

    let header = del | len;

    bytes.extend(Some(header));

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0);
  }
}

impl TryConsumeBytes for Opt {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<'_>) -> Result<Self, Self::Error> {
    let head = match bytes.peek() {
      | Some(0b1111_1111) | None => return Err(OptParseError::OptionsExhausted),
      | Some(b) => {
        bytes.next();
        b
      },
    };

    let delta = parse_opt_len_or_delta(head >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let len = parse_opt_len_or_delta(head & 0b1111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?;

    let value = bytes.take_exact(len as usize)
                     .ok_or_else(OptParseError::eof)?;

    Ok(Opt { delta: OptDelta(delta),
             value: OptValue(value.to_vec()) })
  }
}

pub(crate) fn parse_opt_len_or_delta(head: u8,
                                     bytes: &mut Cursor<'_>,
                                     reserved_err: OptParseError)
                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}
