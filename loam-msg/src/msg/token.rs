/// # Message Token
///
/// Used to correlate requests with responses that may arrive separately
/// from the acknowledgement (0 to 8 bytes of opaque data, chosen by the
/// request originator).
///
/// Where the [`Id`](crate::Id) matches an ACK to the confirmable message it
/// acknowledges, the token survives across the whole dialog and matches a
/// separate response to the request that elicited it.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Default)]
pub struct Token(pub tinyvec::ArrayVec<[u8; 8]>);

impl Token {
  /// Take an arbitrary-length sequence of bytes and turn it into an opaque message token
  ///
  /// Currently uses the BLAKE2 hashing algorithm, but this may change in the future.
  ///
  /// ```
  /// use loam_msg::Token;
  ///
  /// let my_token = Token::opaque(&[0, 1, 2]);
  /// ```
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    Token(Into::<[u8; 8]>::into(digest.finalize()).into())
  }

  /// Shorten this token to its first `len` bytes
  pub fn truncate(mut self, len: usize) -> Token {
    self.0.truncate(len);
    self
  }

  /// Is this the zero-length token?
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
