use core::str::{from_utf8, Utf8Error};

use std_alloc::collections::BTreeMap;
use std_alloc::vec::Vec;

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::from_bytes::{Cursor, TryConsumeBytes};
use crate::TryFromBytes;

/// The message body; everything after the `0xFF` payload marker.
#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub Vec<u8>);

impl Payload {
  /// Convert a reference to a Payload to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  /// Number of bytes in the payload
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Is the payload zero bytes long?
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// The map of option number to (one or more) values used by [`Message`].
///
/// `BTreeMap` keeps the options sorted by number, which is exactly the order
/// the delta encoding on the wire requires.
pub type OptMap = BTreeMap<OptNumber, Vec<OptValue>>;

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

/// # CoAP Messages
/// This struct provides a high-level API for manipulating requests & responses,
/// while still being cheaply serializable to & from the byte layout of CoAP messages on the wire.
///
/// ## Options
/// Options (the CoAP equivalent to HTTP headers) can be manipulated with the
/// accessor methods on this struct, which cover getting & setting the options
/// the LwM2M engine speaks (Uri-Path, Uri-Query, Location-Path, ETag,
/// Observe, Block1/2, Size1/2, Content-Format).
///
/// ## Constructing
/// [`Message::new`] is the most straightforward way to initialize messages,
/// though the fields are all public and a struct literal works too.
///
/// ```
/// use loam_msg::{Code, Id, Message, Payload, Token, Type, Version};
///
/// let a = Message { id: Id(1),
///                   token: Token(Default::default()),
///                   ver: Version::default(),
///                   ty: Type::Con,
///                   code: Code::GET,
///                   payload: Payload(vec![]),
///                   opts: Default::default() };
///
/// let b = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
///
/// assert_eq!(a, b);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::Opt`] for details
  pub opts: OptMap,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           token,
           ty,
           code,
           ver: Version::default(),
           payload: Payload(Vec::new()),
           opts: OptMap::new() }
  }

  /// Create the empty ACK for this message (same id, no token, no options).
  pub fn ack(&self) -> Self {
    Self::new(Type::Ack, Code::EMPTY, self.id, Token(Default::default()))
  }

  /// Replace any / all existing values for an option with a new one,
  /// yielding the previous value(s)
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    let old = self.opts.remove(&n);
    self.opts.insert(n, std_alloc::vec![v]);
    old
  }

  /// Insert a new value for an option, alongside any existing values
  pub fn add(&mut self, n: OptNumber, v: OptValue) {
    self.opts.entry(n).or_default().push(v);
  }

  /// Get the value(s) of an option by number
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(&n)
  }

  /// Get the value of an option, taking the first if there are multiple.
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  /// Remove all values for an option, yielding them if there were any
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&n)
  }

  fn get_strs<'a>(&'a self, n: OptNumber) -> Result<Vec<&'a str>, Utf8Error> {
    match self.get(n) {
      | Some(vs) => vs.iter().map(|v| from_utf8(&v.0)).collect(),
      | None => Ok(Vec::new()),
    }
  }

  fn get_uint(&self, n: OptNumber) -> Option<u32> {
    self.get_first(n).and_then(OptValue::as_uint)
  }

  /// Get the Uri-Path as its decoded segments, in order
  pub fn path_segments(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(repeat::PATH)
  }

  /// Append a Uri-Path segment
  pub fn add_path_segment(&mut self, seg: &str) {
    self.add(repeat::PATH, OptValue(seg.as_bytes().to_vec()));
  }

  /// Get the Uri-Query values, in order
  pub fn queries(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(repeat::QUERY)
  }

  /// Append a Uri-Query value (e.g. `"ep=urn:dev:1234"`)
  pub fn add_query(&mut self, query: &str) {
    self.add(repeat::QUERY, OptValue(query.as_bytes().to_vec()));
  }

  /// Get the Location-Path as its decoded segments, in order
  pub fn location_path(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(repeat::LOCATION_PATH)
  }

  /// Append a Location-Path segment
  pub fn add_location_segment(&mut self, seg: &str) {
    self.add(repeat::LOCATION_PATH, OptValue(seg.as_bytes().to_vec()));
  }

  /// Get the Observe option value
  pub fn observe(&self) -> Option<u32> {
    self.get_uint(no_repeat::OBSERVE)
  }

  /// Set the Observe option value
  pub fn set_observe(&mut self, n: u32) {
    self.set(no_repeat::OBSERVE, OptValue::uint(n));
  }

  /// Remove the Observe option
  pub fn remove_observe(&mut self) {
    self.remove(no_repeat::OBSERVE);
  }

  /// Get the Block1 option (request-payload segmentation)
  pub fn block1(&self) -> Option<Block> {
    self.get_uint(no_repeat::BLOCK1).map(Block::from)
  }

  /// Set the Block1 option
  pub fn set_block1(&mut self, b: Block) {
    self.set(no_repeat::BLOCK1, OptValue::uint(b.into()));
  }

  /// Get the Block2 option (response-payload segmentation)
  pub fn block2(&self) -> Option<Block> {
    self.get_uint(no_repeat::BLOCK2).map(Block::from)
  }

  /// Set the Block2 option
  pub fn set_block2(&mut self, b: Block) {
    self.set(no_repeat::BLOCK2, OptValue::uint(b.into()));
  }

  /// Get the Size1 option (total request payload length)
  pub fn size1(&self) -> Option<u32> {
    self.get_uint(no_repeat::SIZE1)
  }

  /// Set the Size1 option
  pub fn set_size1(&mut self, n: u32) {
    self.set(no_repeat::SIZE1, OptValue::uint(n));
  }

  /// Remove the Size1 option
  pub fn remove_size1(&mut self) {
    self.remove(no_repeat::SIZE1);
  }

  /// Get the Size2 option (total response payload length)
  pub fn size2(&self) -> Option<u32> {
    self.get_uint(no_repeat::SIZE2)
  }

  /// Set the Size2 option
  pub fn set_size2(&mut self, n: u32) {
    self.set(no_repeat::SIZE2, OptValue::uint(n));
  }

  /// Get the first ETag option value
  pub fn etag(&self) -> Option<&[u8]> {
    self.get_first(repeat::ETAG).map(OptValue::as_bytes)
  }

  /// Set the ETag option, replacing any existing values
  pub fn set_etag(&mut self, tag: &[u8]) {
    self.set(repeat::ETAG, OptValue(tag.to_vec()));
  }

  /// Get the Content-Format option
  pub fn content_format(&self) -> Option<u32> {
    self.get_uint(no_repeat::CONTENT_FORMAT)
  }

  /// Set the Content-Format option
  pub fn set_content_format(&mut self, cf: u32) {
    self.set(no_repeat::CONTENT_FORMAT, OptValue::uint(cf));
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes.as_ref());

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver.0 != 1 {
      return Err(Self::Error::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = tinyvec::ArrayVec::<[u8; 8]>::try_from(token).expect("tkl was checked to be <= 8");
    let token = Token(token);

    let mut opts = OptMap::new();
    let mut number = OptNumber(0);
    loop {
      match Opt::try_consume_bytes(&mut bytes) {
        | Ok(opt) => {
          number = number + OptNumber(opt.delta.0 as u32);
          opts.entry(number).or_default().push(opt.value);
        },
        | Err(OptParseError::OptionsExhausted) => break,
        | Err(e) => return Err(Self::Error::OptParseError(e)),
      }
    }

    // step past the payload marker, if any
    let payload = match bytes.next() {
      | Some(_) => Payload(bytes.take_until_end().to_vec()),
      | None => Payload(Vec::new()),
    };

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::TryIntoBytes;

  #[test]
  fn parse_msg() {
    let (expect, msg) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&msg).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_rejects_bad_version() {
    let (_, mut bytes) = crate::test_msg();
    bytes[0] = (bytes[0] & 0b0011_1111) | 0b1000_0000;
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::InvalidVersion(2)));
  }

  #[test]
  fn parse_rejects_bad_token_length() {
    let (_, mut bytes) = crate::test_msg();
    bytes[0] = (bytes[0] & 0b1111_0000) | 12;
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::InvalidTokenLength(12)));
  }

  #[test]
  fn repeated_options_keep_their_order() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(9), Token(Default::default()));
    msg.add_path_segment("1024");
    msg.add_path_segment("5");
    msg.add_path_segment("3");

    let bytes: Vec<u8> = msg.clone().try_into_bytes().unwrap();
    let parsed = Message::try_from_bytes(&bytes).unwrap();

    assert_eq!(parsed.path_segments().unwrap(), vec!["1024", "5", "3"]);
  }

  #[test]
  fn observe_accessors() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(9), Token(Default::default()));
    assert_eq!(msg.observe(), None);

    msg.set_observe(12);
    assert_eq!(msg.observe(), Some(12));

    msg.remove_observe();
    assert_eq!(msg.observe(), None);
  }

  #[test]
  fn block_accessors() {
    let mut msg = Message::new(Type::Con, Code::PUT, Id(9), Token(Default::default()));
    msg.set_block1(Block::new(512, 3, true));

    let b = msg.block1().unwrap();
    assert_eq!(b.size(), 512);
    assert_eq!(b.num(), 3);
    assert!(b.more());
    assert_eq!(b.offset(), 1536);
    assert_eq!(msg.block2(), None);
  }
}
