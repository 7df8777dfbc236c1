/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum MessageParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Protocol version was not 1
  InvalidVersion(u8),

  /// Token length was > 8
  InvalidTokenLength(u8),

  /// Error parsing option
  OptParseError(super::opt::parse_error::OptParseError),

  /// The message type is invalid (see [`Type`](crate::Type) for information & valid values)
  InvalidType(u8),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }

  /// A short diagnostic phrase suitable for an error-response payload
  pub fn reason(&self) -> &'static str {
    use MessageParseError::*;
    match self {
      | UnexpectedEndOfStream => "message truncated",
      | InvalidVersion(_) => "unknown protocol version",
      | InvalidTokenLength(_) => "token too long",
      | OptParseError(_) => "malformed option",
      | InvalidType(_) => "unknown message type",
    }
  }
}
