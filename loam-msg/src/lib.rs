//! Low-level representation of CoAP messages for the loam LwM2M stack.
//!
//! The most notable item in `loam_msg` is [`Message`];
//! a CoAP message very close to the actual byte layout.
//!
//! ## Scope
//! This crate explicitly does **not** know or care about how messages are
//! sent and received, and is **just** concerned with the data structures
//! involved on the machines having a CoAP conversation.
//!
//! For the engine that drives LwM2M dialogs with this library, see `loam`.
//!
//! ## Allocation
//! CoAP messages have some attributes whose size is dynamic:
//! - The message payload (in http terms: the request/response body)
//! - the number of options (in http terms: headers)
//! - the value of an option (in http terms: header value)
//!
//! `Message` stores these in `alloc` collections (`Vec` and `BTreeMap`),
//! keeping the crate usable on `no_std` targets that provide an allocator.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(not(test), forbid(unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code, missing_copy_implementations))]
#![deny(missing_docs)]

extern crate alloc as std_alloc;

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::TryIntoBytes;

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, std_alloc::vec::Vec<u8>) {
  use std_alloc::vec::Vec;

  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b1100_1101, 0x03], content_format];
  let payload: [&[u8]; 2] = [&[0b1111_1111], b"hello, world!"];

  let bytes: Vec<u8> = [&header, token.as_ref()].into_iter()
                                                .chain(options)
                                                .chain(payload)
                                                .flatten()
                                                .copied()
                                                .collect();

  let mut msg = Message::new(Type::Con,
                             Code { class: 2, detail: 5 },
                             Id(1),
                             Token(tinyvec::array_vec!([u8; 8] => 254)));
  msg.set(opt::no_repeat::CONTENT_FORMAT, OptValue(content_format.to_vec()));
  msg.payload = Payload(b"hello, world!".to_vec());

  (msg, bytes)
}
