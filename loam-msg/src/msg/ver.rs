/// Version of the CoAP protocol that the message adheres to.
///
/// As far as this crate is concerned, this will always be 1. (But will not
/// always be 1)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
