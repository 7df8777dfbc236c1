use core::fmt;
use core::str::FromStr;

use std_alloc::string::String;
use std_alloc::vec::Vec;

/// Which corner of the LwM2M interface a URI addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UriKind {
  /// Device management & service enablement (`/objectId[/instanceId[/resourceId]]`)
  Dm,
  /// Bootstrap (`/bs`)
  Bootstrap,
  /// Registration (`/rd[/...]`)
  Registration,
}

/// A structured LwM2M path.
///
/// The identifier components mirror the OMA object model: an optional
/// object, an optional instance of that object, and an optional resource of
/// that instance. An absent instance with a present resource is legal and
/// written with an empty path segment (`/3//2`).
///
/// ```
/// use loam::uri::Uri;
///
/// let uri: Uri = "/1024/5/3".parse().unwrap();
/// assert_eq!(uri, Uri::resource(1024, 5, 3));
/// assert_eq!(uri.to_string(), "/1024/5/3");
///
/// assert!(Uri::instance(1024, 5).matches(&uri));
/// assert!(!uri.matches(&Uri::instance(1024, 5)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uri {
  /// See [`UriKind`]
  pub kind: UriKind,
  /// Object id (`/3`)
  pub object: Option<u16>,
  /// Object instance id (`/3/0`)
  pub instance: Option<u16>,
  /// Resource id (`/3/0/2`)
  pub resource: Option<u16>,
}

/// Errors encounterable parsing a [`Uri`] from a string or path segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UriParseError {
  /// The path was empty, or a DM path had no object id
  Empty,
  /// A path segment was not a decimal id in `0..=65535`
  InvalidId,
  /// More than 3 id segments in a DM path
  TooManySegments,
}

impl Uri {
  /// A path addressing a whole object (`/3`)
  pub fn object(object: u16) -> Self {
    Self { kind: UriKind::Dm,
           object: Some(object),
           instance: None,
           resource: None }
  }

  /// A path addressing one instance of an object (`/3/0`)
  pub fn instance(object: u16, instance: u16) -> Self {
    Self { instance: Some(instance),
           ..Self::object(object) }
  }

  /// A path addressing one resource of an object instance (`/3/0/2`)
  pub fn resource(object: u16, instance: u16, resource: u16) -> Self {
    Self { resource: Some(resource),
           ..Self::instance(object, instance) }
  }

  /// The registration interface (`/rd`)
  pub fn registration() -> Self {
    Self { kind: UriKind::Registration,
           object: None,
           instance: None,
           resource: None }
  }

  /// The bootstrap interface (`/bs`)
  pub fn bootstrap() -> Self {
    Self { kind: UriKind::Bootstrap,
           object: None,
           instance: None,
           resource: None }
  }

  /// Parse a URI from decoded Uri-Path segments.
  ///
  /// Yields the URI plus, for registration paths, the location under `/rd`
  /// (`["rd", "17"]` parses as the registration interface at location `"17"`).
  pub fn from_segments<'a>(segs: &[&'a str]) -> Result<(Self, Option<&'a str>), UriParseError> {
    match segs {
      | [] => Err(UriParseError::Empty),
      | ["rd", rest @ ..] => Ok((Self::registration(), rest.first().copied())),
      | ["bs"] => Ok((Self::bootstrap(), None)),
      | ids if ids.len() <= 3 => {
        let parse = |s: &&str| -> Result<Option<u16>, UriParseError> {
          match s {
            | &"" => Ok(None),
            | s => s.parse::<u16>().map(Some).map_err(|_| UriParseError::InvalidId),
          }
        };

        let object = ids.first().map(parse).transpose()?.flatten();
        let instance = ids.get(1).map(parse).transpose()?.flatten();
        let resource = ids.get(2).map(parse).transpose()?.flatten();

        match object {
          | None => Err(UriParseError::Empty),
          | Some(object) => Ok((Self { kind: UriKind::Dm,
                                       object: Some(object),
                                       instance,
                                       resource },
                                None)),
        }
      },
      | _ => Err(UriParseError::TooManySegments),
    }
  }

  /// Is `self` a prefix of (or equal to) `other`?
  ///
  /// Any component present on both sides must agree; components absent on
  /// `self` match anything on `other`.
  pub fn matches(&self, other: &Uri) -> bool {
    fn prefix(a: Option<u16>, b: Option<u16>) -> bool {
      a.is_none() || a == b
    }

    self.kind == other.kind
    && prefix(self.object, other.object)
    && prefix(self.instance, other.instance)
    && prefix(self.resource, other.resource)
  }

  /// The Uri-Path segments addressing this URI, in order.
  ///
  /// An absent instance below a present resource becomes an empty segment.
  pub fn segments(&self) -> Vec<String> {
    use std_alloc::string::ToString;

    match self.kind {
      | UriKind::Registration => std_alloc::vec!["rd".to_string()],
      | UriKind::Bootstrap => std_alloc::vec!["bs".to_string()],
      | UriKind::Dm => {
        let mut segs = Vec::new();
        if let Some(o) = self.object {
          segs.push(o.to_string());
        }
        match (self.instance, self.resource) {
          | (Some(i), _) => segs.push(i.to_string()),
          | (None, Some(_)) => segs.push(String::new()),
          | (None, None) => (),
        }
        if let Some(r) = self.resource {
          segs.push(r.to_string());
        }
        segs
      },
    }
  }
}

impl FromStr for Uri {
  type Err = UriParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let segs: Vec<&str> = s.trim_start_matches('/').split('/').collect();
    Uri::from_segments(&segs).map(|(uri, _)| uri)
  }
}

impl fmt::Display for Uri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for seg in self.segments() {
      write!(f, "/{}", seg)?;
    }
    Ok(())
  }
}
