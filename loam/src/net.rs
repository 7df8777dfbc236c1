use no_std_net::SocketAddr;

/// Data that came from (or is going to) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// The one thing the engine asks of the host platform's network stack:
/// put these bytes on the wire, addressed to this peer.
///
/// The [`SocketAddr`] inside the [`Addrd`] is the engine's notion of a
/// session handle; address equality defines "same peer."
///
/// The engine never opens sockets and never blocks waiting to receive;
/// inbound datagrams are pushed into it with
/// [`Context::handle_packet`](crate::Context::handle_packet).
pub trait Transport {
  /// The error yielded when a send fails.
  ///
  /// A send error aborts the current outbound message and surfaces as a
  /// `5.00`-class failure; the transaction layer owns any retries.
  type Error: core::fmt::Debug;

  /// Transmit a datagram to a remote peer
  fn send(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Self::Error>;
}

#[cfg(feature = "std")]
impl Transport for std::net::UdpSocket {
  type Error = std::io::Error;

  fn send(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Self::Error> {
    // no-std-net addresses are only `ToSocketAddrs` under its std re-export
    self.send_to(dgram.data(), dgram.addr().to_string())
        .map(|_| ())
  }
}
