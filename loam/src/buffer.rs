use std_alloc::vec::Vec;

use loam_msg::Code;

/// Why a [`LargeBuffer`] refused an append
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AppendError {
  /// The append would introduce a hole (`offset > length`)
  Incomplete,
  /// The backing allocation could not grow to fit the append
  TooLarge,
}

impl AppendError {
  /// The CoAP response code this error maps to on the wire
  pub fn code(&self) -> Code {
    match self {
      | AppendError::Incomplete => Code::REQUEST_ENTITY_INCOMPLETE,
      | AppendError::TooLarge => Code::REQUEST_ENTITY_TOO_LARGE,
    }
  }
}

/// A growable, offset-addressed byte accumulator.
///
/// Both sides of the blockwise machinery share this primitive: inbound
/// segments are appended at their block offset as they arrive, and outbound
/// segmented payloads are captured once and sliced per block.
///
/// The backing storage is kept zero-filled up to its capacity; `length` is
/// the high-water mark of written bytes. Invariant: `length <= capacity`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LargeBuffer {
  bytes: Vec<u8>,
  length: usize,
}

impl LargeBuffer {
  /// Allocate a buffer of capacity `max(size_hint, 4 * first_chunk.len())`
  /// holding `first_chunk` at offset zero.
  pub fn new(size_hint: usize, first_chunk: &[u8]) -> Result<Self, AppendError> {
    let mut buf = Self { bytes: Vec::new(),
                         length: 0 };
    buf.grow_to(if size_hint > 0 { size_hint } else { first_chunk.len() * 4 })?;
    buf.append(0, first_chunk)?;
    Ok(buf)
  }

  /// Wrap an already-complete payload without copying.
  pub fn from_vec(bytes: Vec<u8>) -> Self {
    Self { length: bytes.len(),
           bytes }
  }

  /// Write `bytes` at `offset`.
  ///
  /// * `offset > length` would leave a hole: [`AppendError::Incomplete`].
  /// * `offset + bytes.len() <= length` is a re-received block; succeeds
  ///   without copying.
  /// * Otherwise the capacity doubles (at least) as needed and `length`
  ///   advances to `offset + bytes.len()`.
  pub fn append(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AppendError> {
    if offset > self.length {
      return Err(AppendError::Incomplete);
    }

    let end = offset + bytes.len();
    if end <= self.length {
      return Ok(());
    }

    if end > self.bytes.len() {
      self.grow_to((self.bytes.len() * 2).max(end))?;
    }

    self.bytes[offset..end].copy_from_slice(bytes);
    self.length = end;
    Ok(())
  }

  fn grow_to(&mut self, capacity: usize) -> Result<(), AppendError> {
    if capacity > self.bytes.len() {
      self.bytes
          .try_reserve_exact(capacity - self.bytes.len())
          .map_err(|_| AppendError::TooLarge)?;
      self.bytes.resize(capacity, 0);
    }
    Ok(())
  }

  /// The written bytes, `[0..length)`
  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes[..self.length]
  }

  /// High-water mark of written bytes
  pub fn len(&self) -> usize {
    self.length
  }

  /// Has nothing been written yet?
  pub fn is_empty(&self) -> bool {
    self.length == 0
  }

  /// Allocated capacity
  pub fn capacity(&self) -> usize {
    self.bytes.len()
  }

  /// Unwrap into the written bytes
  pub fn into_bytes(mut self) -> Vec<u8> {
    self.bytes.truncate(self.length);
    self.bytes
  }
}
