use std_alloc::vec::Vec;

use loam_msg::Code;

use crate::uri::Uri;

/// The object model backing a client-role engine.
///
/// The engine routes inbound device-management requests here and never
/// interprets resource values itself; results are plain CoAP response codes
/// so a store can express anything the wire can (`4.04` for an unknown path,
/// `4.05` for an unwritable resource, and so on).
///
/// All methods take `&mut self`: stores are free to mutate on read
/// (counters, cached renders).
pub trait ObjectStore {
  /// Render the value(s) at `uri`.
  ///
  /// `Ok` is reported as `2.05 Content` with the returned bytes as the
  /// response payload.
  fn read(&mut self, uri: &Uri) -> Result<Vec<u8>, Code>;

  /// Replace the value(s) at `uri`. Expected to yield `2.04 Changed`.
  fn write(&mut self, uri: &Uri, value: &[u8]) -> Code;

  /// Execute the resource at `uri` with `args` as the argument payload.
  fn execute(&mut self, uri: &Uri, args: &[u8]) -> Code;

  /// Create an object instance.
  ///
  /// When `uri` carries no instance id the store picks one; `Ok` yields the
  /// id the instance lives at.
  fn create(&mut self, uri: &Uri, value: &[u8]) -> Result<u16, Code>;

  /// Delete the instance at `uri`. Expected to yield `2.02 Deleted`.
  fn delete(&mut self, uri: &Uri) -> Code;

  /// Write notification attributes (`pmin`/`pmax`/...) carried as a
  /// Uri-Query string.
  fn write_attributes(&mut self, uri: &Uri, query: &str) -> Code;

  /// Does `instance` of `object` not exist yet?
  ///
  /// Distinguishes "POST to a fresh instance" (create) from "POST to an
  /// existing instance" (write).
  fn is_instance_new(&mut self, object: u16, instance: u16) -> bool;
}
