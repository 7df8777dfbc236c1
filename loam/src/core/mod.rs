use embedded_time::Instant;
use no_std_net::SocketAddr;
use rand::{Rng, SeedableRng};
use std_alloc::boxed::Box;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;

use loam_msg::{Id, Message, Token, TryIntoBytes};

use crate::blockwise::Ledger;
use crate::config::Config;
use crate::net::{Addrd, Transport};
use crate::object::ObjectStore;
use crate::observe::{Observation, Watcher};
use crate::peer::{ClientPeer, PeerKey, RegistrationStatus, ServerPeer};
use crate::registration::MonitorHandler;
use crate::retry::YouShould;
use crate::time::{millis_between, Clock, Timeout};
use crate::transaction::Transaction;

mod error;

#[doc(inline)]
pub use error::*;

/// A reply we already produced, kept so a retransmitted request is answered
/// without running its handler twice.
#[derive(Debug, Clone)]
pub(crate) struct Reply<C: Clock> {
  pub(crate) session: SocketAddr,
  pub(crate) id: Id,
  pub(crate) bytes: Vec<u8>,
  pub(crate) time: Instant<C>,
}

/// One engine instance: the whole state of a LwM2M endpoint in either role.
///
/// The engine is passive. It never opens sockets, spawns threads or sleeps;
/// the host feeds it received datagrams through
/// [`handle_packet`](Context::handle_packet) and time through
/// [`step`](Context::step), and it emits datagrams through the [`Transport`]
/// and results through callbacks, always synchronously.
///
/// Both roles are always available: exercise the `dm_*`/`observe` surface
/// (and [`set_monitor`](Context::set_monitor)) to act as a management
/// server, or [`set_object_store`](Context::set_object_store) +
/// [`register`](Context::register) to act as a managed device.
pub struct Context<T, C>
  where T: Transport,
        C: Clock
{
  pub(crate) config: Config,
  pub(crate) clock: C,
  pub(crate) transport: T,
  pub(crate) rand: rand_chacha::ChaCha8Rng,
  pub(crate) next_mid: u16,

  // client role
  pub(crate) endpoint_name: Option<String>,
  pub(crate) store: Option<Box<dyn ObjectStore>>,
  pub(crate) servers: Vec<ServerPeer>,
  pub(crate) watchers: Vec<Watcher>,
  pub(crate) observe_seq: u32,

  // server role
  pub(crate) clients: Vec<ClientPeer>,
  pub(crate) next_client_id: u16,
  pub(crate) monitor: Option<MonitorHandler>,
  pub(crate) observations: Vec<Observation>,

  pub(crate) transactions: Vec<Transaction<C>>,
  pub(crate) blockwise: Ledger<C>,
  pub(crate) replies: Vec<Reply<C>>,
}

impl<T: Transport, C: Clock> Context<T, C> {
  /// Creates a new engine with the default runtime behavior
  pub fn new(clock: C, transport: T) -> Self {
    Self::new_config(Config::default(), clock, transport)
  }

  /// Create a new engine with custom runtime behavior
  pub fn new_config(config: Config, clock: C, transport: T) -> Self {
    let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(config.msg.token_seed as u64);
    let next_mid = rand.gen();

    Self { config,
           clock,
           transport,
           rand,
           next_mid,
           endpoint_name: None,
           store: None,
           servers: Vec::new(),
           watchers: Vec::new(),
           observe_seq: 0,
           clients: Vec::new(),
           next_client_id: 0,
           monitor: None,
           observations: Vec::new(),
           transactions: Vec::new(),
           blockwise: Ledger::default(),
           replies: Vec::new() }
  }

  /// Set the endpoint name this device registers under (client role)
  pub fn set_endpoint_name(&mut self, name: &str) {
    self.endpoint_name = Some(name.to_string());
  }

  /// Attach the object model that device-management requests are routed to
  /// (client role)
  pub fn set_object_store(&mut self, store: Box<dyn ObjectStore>) {
    self.store = Some(store);
  }

  /// Register a callback observing client registration lifecycle events
  /// (server role); it receives the client's internal id and `2.01`/`2.04`/
  /// `2.02` for register/update/deregister.
  pub fn set_monitor(&mut self, monitor: MonitorHandler) {
    self.monitor = Some(monitor);
  }

  /// Teach the client role about a management server, yielding the internal
  /// id to register with
  pub fn add_server(&mut self, session: SocketAddr) -> u16 {
    let id = self.servers.len() as u16;
    self.servers.push(ServerPeer { id,
                                   session,
                                   location: None,
                                   status: RegistrationStatus::Unregistered,
                                   blocksize: self.config.block.max_chunk_size });
    id
  }

  /// The devices currently registered with the server role
  pub fn clients(&self) -> &[ClientPeer] {
    &self.clients
  }

  /// The management servers known to the client role
  pub fn servers(&self) -> &[ServerPeer] {
    &self.servers
  }

  /// Advance all timers: retransmit due confirmables, time out abandoned
  /// dialogs, evict idle blockwise entries and stale cached replies.
  ///
  /// `timeout` is narrowed to the nearest future deadline, so a host
  /// select/poll loop can sleep exactly until the engine next needs a tick.
  pub fn step(&mut self, timeout: &mut Timeout) -> Result<(), Error<T::Error>> {
    let now = self.now();

    let mut ix = 0;
    while ix < self.transactions.len() {
      let due = match self.transactions[ix].retry {
        | Some(ref r) => r.due_in(now),
        | None => {
          ix += 1;
          continue;
        },
      };
      if due > 0 {
        ix += 1;
        continue;
      }

      if self.transactions[ix].ack_received {
        // acked, but the separate response never came
        log::debug!("transaction {:?} expired awaiting its response",
                    self.transactions[ix].id);
        let tx = self.transactions.remove(ix);
        self.finish_transaction(tx, None);
        continue;
      }

      let session = self.peer_session(self.transactions[ix].peer);
      let should = self.transactions[ix].retry
                                        .as_mut()
                                        .map(|r| r.what_should_i_do(now));

      match (session, should) {
        | (Some(session), Some(Ok(YouShould::Retry))) => {
          log::debug!("retransmitting {:?} -> {}", self.transactions[ix].id, session);
          self.transport
              .send(Addrd(&self.transactions[ix].buffer, session))
              .ok();
          ix += 1;
        },
        | (_, Some(Err(nb::Error::WouldBlock))) => ix += 1,
        | _ => {
          // attempts exhausted, or the peer evaporated mid-dialog
          let tx = self.transactions.remove(ix);
          self.finish_transaction(tx, None);
        },
      }
    }

    let max_age = self.config.block.max_age.0;
    self.blockwise.sweep(now, max_age);

    let lifetime = self.config.exchange_lifetime_millis();
    self.replies
        .retain(|r| millis_between(now, r.time) <= lifetime);

    for tx in &self.transactions {
      if let Some(ref r) = tx.retry {
        timeout.narrow(r.due_in(now));
      }
    }
    if let Some(ms) = self.blockwise.next_expiry_in(now, max_age) {
      timeout.narrow(ms);
    }

    Ok(())
  }

  pub(crate) fn now(&self) -> Instant<C> {
    // a host clock that cannot tell time degrades every timer to "due now"
    // rather than killing the engine
    self.clock.try_now().unwrap_or_else(|_| Instant::new(0))
  }

  pub(crate) fn next_mid(&mut self) -> Id {
    let id = Id(self.next_mid);
    self.next_mid = self.next_mid.wrapping_add(1);
    id
  }

  /// Fabricate a token for a dialog we originate: a hash of the token seed,
  /// the message id, the clock and fresh randomness, truncated to the
  /// configured length.
  pub(crate) fn next_token(&mut self, id: Id) -> Token {
    let millis = millis_between(self.now(), Instant::new(0));
    let salt: u64 = self.rand.gen();

    let mut material = [0u8; 20];
    material[0..2].copy_from_slice(&self.config.msg.token_seed.to_be_bytes());
    material[2..4].copy_from_slice(&id.0.to_be_bytes());
    material[4..12].copy_from_slice(&millis.to_be_bytes());
    material[12..20].copy_from_slice(&salt.to_be_bytes());

    Token::opaque(&material).truncate(self.config.msg.token_length.min(8) as usize)
  }

  pub(crate) fn peer_session(&self, key: PeerKey) -> Option<SocketAddr> {
    match key {
      | PeerKey::Client(id) => self.clients.iter().find(|c| c.id == id).map(|c| c.session),
      | PeerKey::Server(id) => self.servers.iter().find(|s| s.id == id).map(|s| s.session),
    }
  }

  pub(crate) fn peer_blocksize(&self, key: PeerKey) -> u16 {
    match key {
      | PeerKey::Client(id) => self.clients.iter().find(|c| c.id == id).map(|c| c.blocksize),
      | PeerKey::Server(id) => self.servers.iter().find(|s| s.id == id).map(|s| s.blocksize),
    }.unwrap_or(self.config.block.max_chunk_size)
  }

  pub(crate) fn set_peer_blocksize(&mut self, key: PeerKey, blocksize: u16) {
    match key {
      | PeerKey::Client(id) => {
        if let Some(c) = self.clients.iter_mut().find(|c| c.id == id) {
          c.blocksize = blocksize;
        }
      },
      | PeerKey::Server(id) => {
        if let Some(s) = self.servers.iter_mut().find(|s| s.id == id) {
          s.blocksize = blocksize;
        }
      },
    }
  }

  /// Serialize and transmit a message outside the transaction machinery
  /// (responses, empty ACKs, notifications), yielding the bytes that went
  /// out so the dispatcher can cache them for duplicate suppression.
  pub(crate) fn message_send(&mut self,
                             session: SocketAddr,
                             msg: Message)
                             -> Result<Vec<u8>, Error<T::Error>> {
    log::trace!("sending {} -> {}", crate::logging::msg_summary(&msg), session);

    let bytes = msg.try_into_bytes().map_err(Error::ToBytes)?;
    if bytes.len() > self.config.max_packet_size {
      log::warn!("{}b datagram exceeds max_packet_size ({})",
                 bytes.len(),
                 self.config.max_packet_size);
    }
    self.transport
        .send(Addrd(&bytes, session))
        .map_err(Error::Send)?;
    Ok(bytes)
  }

  pub(crate) fn cached_reply(&self, session: SocketAddr, id: Id) -> Option<&[u8]> {
    self.replies
        .iter()
        .find(|r| r.session == session && r.id == id)
        .map(|r| r.bytes.as_slice())
  }

  pub(crate) fn cache_reply(&mut self, session: SocketAddr, id: Id, bytes: Vec<u8>) {
    let time = self.now();
    self.replies.push(Reply { session,
                              id,
                              bytes,
                              time });
  }
}
