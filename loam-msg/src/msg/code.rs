#[cfg(feature = "std")]
use std_alloc::string::{String, ToString};

/// # Message Code
///
/// The code of a message identifies it as a request (with a method),
/// a response (with a status), or an empty message.
///
/// # Examples
/// ```
/// use loam_msg::Code;
///
/// assert_eq!(Code { class: 2,
///                   detail: 5 }.to_string(),
///            "2.05".to_string());
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Code {
  /// The "class" of message codes identify it as a request or response, and provides the class of response status:
  ///
  /// |class|meaning|
  /// |---|---|
  /// |`0`|Message is a request|
  /// |`2`|Message is a success response|
  /// |`4`|Message is a client error response|
  /// |`5`|Message is a server error response|
  pub class: u8,

  /// 2-digit integer (range `[0, 32)`) that provides granular information about the response status.
  ///
  /// Will always be `0` for requests.
  pub detail: u8,
}

/// Whether a code is for a request, response, or empty message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
  /// A request code (0.xx)
  Request,
  /// A response code ([2-5].xx)
  Response,
  /// EMPTY (0.00)
  Empty,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use loam_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Get the human string representation of a message code
  ///
  /// # Returns
  /// A `char` array
  ///
  /// This is to avoid unnecessary heap allocation,
  /// you can create a `String` with `FromIterator::<String>::from_iter`,
  /// or if the `std` feature is enabled there is a `ToString` implementation provided for Code.
  /// ```
  /// use loam_msg::Code;
  ///
  /// let code = Code { class: 2,
  ///                   detail: 5 };
  /// let chars = code.to_human();
  /// let string = String::from_iter(chars);
  /// assert_eq!(string, "2.05".to_string());
  /// ```
  pub fn to_human(&self) -> [char; 4] {
    let to_char = |d: u8| char::from_digit(d.into(), 10).unwrap_or('?');
    [to_char(self.class),
     '.',
     to_char(self.detail / 10),
     to_char(self.detail % 10)]
  }

  /// Get whether this code is for a request, response, or empty message
  ///
  /// ```
  /// use loam_msg::{Code, CodeKind};
  ///
  /// let empty: Code = Code::new(0, 0);
  /// assert_eq!(empty.kind(), CodeKind::Empty);
  ///
  /// let req = Code::new(0, 1); // GET
  /// assert_eq!(req.kind(), CodeKind::Request);
  ///
  /// let resp = Code::new(2, 5); // OK CONTENT
  /// assert_eq!(resp.kind(), CodeKind::Response);
  /// ```
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// Is this a client- or server-error code (4.xx / 5.xx)?
  ///
  /// ```
  /// use loam_msg::Code;
  ///
  /// assert!(!Code::CONTENT.is_error());
  /// assert!(Code::BAD_REQUEST.is_error());
  /// assert!(Code::INTERNAL_SERVER_ERROR.is_error());
  /// ```
  pub fn is_error(&self) -> bool {
    self.class >= 4
  }

  /// 0.00; an empty message (e.g. a bare ACK or a CoAP ping)
  pub const EMPTY: Self = Self::new(0, 0);

  /// 0.01 GET
  pub const GET: Self = Self::new(0, 1);

  /// 0.02 PUT
  pub const PUT: Self = Self::new(0, 2);

  /// 0.03 POST
  pub const POST: Self = Self::new(0, 3);

  /// 0.04 DELETE
  pub const DELETE: Self = Self::new(0, 4);

  /// 2.01 Created
  pub const CREATED: Self = Self::new(2, 1);

  /// 2.02 Deleted
  pub const DELETED: Self = Self::new(2, 2);

  /// 2.04 Changed
  pub const CHANGED: Self = Self::new(2, 4);

  /// 2.05 Content
  pub const CONTENT: Self = Self::new(2, 5);

  /// 2.31 Continue; an intermediate Block1 segment was accepted
  pub const CONTINUE: Self = Self::new(2, 31);

  /// 4.00 Bad Request
  pub const BAD_REQUEST: Self = Self::new(4, 0);

  /// 4.01 Unauthorized
  pub const UNAUTHORIZED: Self = Self::new(4, 1);

  /// 4.02 Bad Option
  pub const BAD_OPTION: Self = Self::new(4, 2);

  /// 4.03 Forbidden
  pub const FORBIDDEN: Self = Self::new(4, 3);

  /// 4.04 Not Found
  pub const NOT_FOUND: Self = Self::new(4, 4);

  /// 4.05 Method Not Allowed
  pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);

  /// 4.06 Not Acceptable
  pub const NOT_ACCEPTABLE: Self = Self::new(4, 6);

  /// 4.08 Request Entity Incomplete; a blockwise transfer would have a hole
  pub const REQUEST_ENTITY_INCOMPLETE: Self = Self::new(4, 8);

  /// 4.13 Request Entity Too Large
  pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);

  /// 5.00 Internal Server Error
  pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

  /// 5.01 Not Implemented
  pub const NOT_IMPLEMENTED: Self = Self::new(5, 1);

  /// 5.03 Service Unavailable; also how timeouts are reported to callbacks
  pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
}

#[cfg(feature = "std")]
impl ToString for Code {
  fn to_string(&self) -> String {
    String::from_iter(self.to_human())
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    // xxxyyyyy

    // xxx => class
    let class = b >> 5;

    // yyyyy => detail
    let detail = b & 0b00011111;

    Code { class, detail }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    let class = (code.class << 5) & 0b11100000;
    let detail = code.detail & 0b00011111;

    class | detail
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_code() {
    let byte = 0b01000101_u8;
    let code = Code::from(byte);
    assert_eq!(code,
               Code { class: 2,
                      detail: 5 })
  }

  #[test]
  fn serialize_code() {
    let code = Code { class: 2,
                      detail: 5 };
    let actual: u8 = code.into();
    assert_eq!(actual, 0b01000101_u8)
  }

  #[test]
  fn kinds() {
    assert_eq!(Code::GET.kind(), CodeKind::Request);
    assert_eq!(Code::DELETE.kind(), CodeKind::Request);
    assert_eq!(Code::CONTINUE.kind(), CodeKind::Response);
    assert_eq!(Code::EMPTY.kind(), CodeKind::Empty);
  }
}
