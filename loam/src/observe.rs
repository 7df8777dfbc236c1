use core::fmt;

use no_std_net::SocketAddr;

use loam_msg::{Block, Code, Id, Message, Payload, Token, Type};

use crate::buffer::LargeBuffer;
use crate::core::{Context, Error};
use crate::net::Transport;
use crate::peer::PeerKey;
use crate::time::Clock;
use crate::transaction::{Outcome, Purpose, ResultHandler, Transaction};
use crate::uri::Uri;

/// A peer watching one of our resources (client role): the bookkeeping
/// needed to emit notifications and to honor an RST cancelling them.
#[derive(Debug, Clone)]
pub(crate) struct Watcher {
  pub(crate) uri: Uri,
  pub(crate) session: SocketAddr,
  pub(crate) token: Token,
  pub(crate) last_mid: Option<Id>,
}

/// A resource we are watching on a registered client (server role).
/// Notifications are matched to it by token.
pub(crate) struct Observation {
  pub(crate) client: u16,
  pub(crate) uri: Uri,
  pub(crate) token: Token,
  pub(crate) handler: Option<ResultHandler>,
}

impl fmt::Debug for Observation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Observation")
     .field("client", &self.client)
     .field("uri", &self.uri)
     .field("token", &self.token)
     .finish_non_exhaustive()
  }
}

impl<T: Transport, C: Clock> Context<T, C> {
  /// A GET carrying Observe reached the object store successfully; enter
  /// (Observe 0) or leave (Observe 1) the observation before the read
  /// result goes back out.
  pub(crate) fn handle_observe_request(&mut self,
                                       uri: &Uri,
                                       session: SocketAddr,
                                       msg: &Message,
                                       resp: &mut Message)
                                       -> Code {
    match msg.observe() {
      | Some(0) => {
        if !self.watchers
                .iter()
                .any(|w| w.session == session && w.token == msg.token && w.uri == *uri)
        {
          log::debug!("observe: {} now watching {}", session, uri);
          self.watchers.push(Watcher { uri: *uri,
                                       session,
                                       token: msg.token,
                                       last_mid: None });
        }

        self.observe_seq = self.observe_seq.wrapping_add(1) & 0x00FF_FFFF;
        resp.set_observe(self.observe_seq);
        Code::CONTENT
      },
      | Some(1) => {
        log::debug!("observe: {} stopped watching {}", session, uri);
        self.watchers
            .retain(|w| !(w.session == session && w.uri == *uri));
        Code::CONTENT
      },
      // unknown register values: just serve the read
      | _ => Code::CONTENT,
    }
  }

  /// Tell the engine a resource changed (client role): every watcher whose
  /// subscription overlaps `uri` gets a confirmable notification with a
  /// fresh Observe sequence number.
  pub fn resource_value_changed(&mut self, uri: &Uri) {
    // cached segmented responses under this path are stale now
    self.blockwise.remove_matching(uri);

    let mut store = match self.store.take() {
      | Some(store) => store,
      | None => return,
    };

    let mut ix = 0;
    while ix < self.watchers.len() {
      let (w_uri, w_session, w_token) = {
        let w = &self.watchers[ix];
        (w.uri, w.session, w.token)
      };

      if !(w_uri.matches(uri) || uri.matches(&w_uri)) {
        ix += 1;
        continue;
      }

      match store.read(&w_uri) {
        | Ok(value) => {
          self.observe_seq = self.observe_seq.wrapping_add(1) & 0x00FF_FFFF;
          let id = self.next_mid();
          let mut note = Message::new(Type::Con, Code::CONTENT, id, w_token);
          note.set_observe(self.observe_seq);
          note.payload = Payload(value);

          log::debug!("observe: notifying {} of {} ({:?})", w_session, w_uri, id);
          self.watchers[ix].last_mid = Some(id);
          self.message_send(w_session, note).ok();
          ix += 1;
        },
        | Err(code) => {
          // the resource went away under its watcher; report once and drop
          let id = self.next_mid();
          let note = Message::new(Type::Con, code, id, w_token);
          self.message_send(w_session, note).ok();
          self.watchers.remove(ix);
        },
      }
    }

    self.store = Some(store);
  }

  /// An RST arrived for a notification we sent: the watcher it belonged to
  /// is gone.
  pub(crate) fn cancel_watcher(&mut self, mid: Id, session: SocketAddr) {
    self.watchers.retain(|w| {
                  let cancelled = w.last_mid == Some(mid) && w.session == session;
                  if cancelled {
                    log::debug!("observe: {} reset notification {:?}; dropping watcher of {}",
                                session,
                                mid,
                                w.uri);
                  }
                  !cancelled
                });
  }

  /// Start observing `uri` on a registered client (server role).
  ///
  /// `handler` fires with the initial value and then once per notification
  /// until the observation is cancelled.
  pub fn observe(&mut self,
                 client: u16,
                 uri: &Uri,
                 handler: ResultHandler)
                 -> Result<(), Error<T::Error>> {
    let blocksize = self.clients
                        .iter()
                        .find(|c| c.id == client)
                        .map(|c| c.blocksize)
                        .ok_or(Error::Status(Code::NOT_FOUND))?;

    let id = self.next_mid();
    let token = self.next_token(id);
    let mut tx = Transaction::new(Type::Con,
                                  Code::GET,
                                  Some(uri),
                                  id,
                                  token,
                                  PeerKey::Client(client),
                                  blocksize)
      .ok_or(Error::Status(Code::INTERNAL_SERVER_ERROR))?;

    tx.message.set_observe(0);
    tx.purpose = Purpose::Observe { client, uri: *uri };
    tx.handler = Some(handler);

    self.transaction_send(tx)
  }

  /// Stop observing `uri` on a registered client (server role).
  pub fn observe_cancel(&mut self,
                        client: u16,
                        uri: &Uri,
                        handler: Option<ResultHandler>)
                        -> Result<(), Error<T::Error>> {
    let blocksize = self.clients
                        .iter()
                        .find(|c| c.id == client)
                        .map(|c| c.blocksize)
                        .ok_or(Error::Status(Code::NOT_FOUND))?;

    let id = self.next_mid();
    let token = self.next_token(id);
    let mut tx = Transaction::new(Type::Con,
                                  Code::GET,
                                  Some(uri),
                                  id,
                                  token,
                                  PeerKey::Client(client),
                                  blocksize)
      .ok_or(Error::Status(Code::INTERNAL_SERVER_ERROR))?;

    tx.message.set_observe(1);
    tx.purpose = Purpose::ObserveCancel { client, uri: *uri };
    tx.handler = handler;

    self.transaction_send(tx)
  }

  /// The observe-register dialog finished successfully; remember the
  /// subscription so later notifications find their way to the handler.
  pub(crate) fn observation_established(&mut self,
                                        client: u16,
                                        uri: Uri,
                                        token: Token,
                                        handler: Option<ResultHandler>) {
    log::debug!("observe: established on client {} at {}", client, uri);
    match self.observations
              .iter()
              .position(|o| o.client == client && o.uri == uri)
    {
      | Some(ix) => {
        let o = &mut self.observations[ix];
        o.token = token;
        o.handler = handler;
      },
      | None => self.observations.push(Observation { client,
                                                     uri,
                                                     token,
                                                     handler }),
    }
  }

  pub(crate) fn observation_cancelled(&mut self, client: u16, uri: &Uri) {
    self.observations
        .retain(|o| !(o.client == client && o.uri == *uri));
  }

  /// A 2.04/2.05 with Observe arrived outside any transaction. Deliver it
  /// to the matching observation, fetching the remaining blocks first when
  /// the notification body is block-paced.
  ///
  /// Yields false when no observation matches (the message then falls
  /// through to transaction correlation).
  pub(crate) fn handle_observe_notify(&mut self, session: SocketAddr, msg: &mut Message) -> bool {
    let ix = self.observations.iter().position(|o| {
                                        o.token == msg.token
                                        && self.peer_session(PeerKey::Client(o.client))
                                           == Some(session)
                                      });
    let ix = match ix {
      | Some(ix) => ix,
      | None => return false,
    };

    if let Some(b2) = msg.block2() {
      if b2.more() {
        let (client, uri, token) = {
          let o = &self.observations[ix];
          (o.client, o.uri, o.token)
        };
        let block_size = self.adjust_blocksize(PeerKey::Client(client), Some(b2.size()));

        let id = self.next_mid();
        let mut tx = match Transaction::new(Type::Con,
                                            Code::GET,
                                            Some(&uri),
                                            id,
                                            token,
                                            PeerKey::Client(client),
                                            block_size)
        {
          | Some(tx) => tx,
          | None => return true,
        };

        tx.observe = msg.observe();
        tx.block2 = LargeBuffer::new(msg.size2().unwrap_or(0) as usize,
                                     msg.payload.as_bytes()).ok();
        tx.message.set_block2(Block::new(block_size, b2.num() + 1, false));
        tx.purpose = Purpose::NotifyFetch { token };

        log::debug!("observe: notification for {} is block-paced; fetching the rest",
                    uri);
        self.transaction_send(tx).ok();
        return true;
      }
    }

    let (client, uri) = (self.observations[ix].client, self.observations[ix].uri);
    let code = msg.code;
    let observe = msg.observe();

    let mut handler = self.observations[ix].handler.take();
    if let Some(ref mut h) = handler {
      h(Outcome { peer: client,
                  uri,
                  code,
                  payload: Some(msg.payload.as_bytes()).filter(|p| !p.is_empty()),
                  observe });
    }
    self.observations[ix].handler = handler;
    true
  }

  /// Hand a fully reassembled (or plain) notification body to the
  /// observation the token belongs to.
  pub(crate) fn deliver_notification(&mut self,
                                     token: Token,
                                     code: Code,
                                     payload: Option<&[u8]>,
                                     observe: Option<u32>) {
    let ix = match self.observations.iter().position(|o| o.token == token) {
      | Some(ix) => ix,
      | None => return,
    };

    let (client, uri) = (self.observations[ix].client, self.observations[ix].uri);
    let mut handler = self.observations[ix].handler.take();
    if let Some(ref mut h) = handler {
      h(Outcome { peer: client,
                  uri,
                  code,
                  payload,
                  observe });
    }
    self.observations[ix].handler = handler;
  }
}
