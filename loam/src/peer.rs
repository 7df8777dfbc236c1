use no_std_net::SocketAddr;
use std_alloc::string::String;
use std_alloc::vec::Vec;

use crate::uri::Uri;

/// A device registered with the server role, as learned from the
/// registration interface.
#[derive(Debug, Clone)]
pub struct ClientPeer {
  /// Engine-internal identifier; what the `dm_*` operations address
  pub id: u16,
  /// The endpoint name the device registered under (`ep=` query)
  pub endpoint: String,
  /// Session handle of the device
  pub session: SocketAddr,
  /// Location under `/rd` assigned at registration
  pub location: String,
  /// Registration lifetime in seconds (`lt=` query)
  pub lifetime: u32,
  /// Object links advertised in the registration payload
  pub objects: Vec<Uri>,
  /// Last blocksize negotiated with this device; only ever shrinks
  pub(crate) blocksize: u16,
}

/// Where a client-role engine stands with one management server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
  /// No registration has been attempted
  Unregistered,
  /// A register transaction is in flight
  Pending,
  /// The server accepted the registration
  Registered,
  /// The last register/update attempt failed or timed out
  Failed,
}

/// A management server known to the client role.
#[derive(Debug, Clone)]
pub struct ServerPeer {
  /// Engine-internal identifier
  pub id: u16,
  /// Session handle of the server
  pub session: SocketAddr,
  /// The location the server assigned to our registration
  pub location: Option<String>,
  /// See [`RegistrationStatus`]
  pub status: RegistrationStatus,
  /// Last blocksize negotiated with this server; only ever shrinks
  pub(crate) blocksize: u16,
}

/// A peer referenced by identifier rather than by pointer; resolved against
/// the context on use, so a peer deleted mid-dialog reads as a late cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerKey {
  /// Index into the registered-client list by internal id
  Client(u16),
  /// Index into the known-server list by internal id
  Server(u16),
}
