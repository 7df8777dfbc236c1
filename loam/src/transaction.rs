use core::fmt;
use core::mem;

use embedded_time::duration::Milliseconds;
use std_alloc::boxed::Box;
use std_alloc::vec::Vec;

use loam_msg::{Block, Code, CodeKind, Id, Message, Payload, Token, TryIntoBytes, Type};

use crate::buffer::LargeBuffer;
use crate::core::{Context, Error, TransferError};
use crate::net::{Addrd, Transport};
use crate::peer::PeerKey;
use crate::retry::{Attempts, RetryTimer, Strategy};
use crate::time::Clock;
use crate::uri::Uri;

/// What a finished operation hands to its callback.
///
/// `payload` is `None` both for empty response bodies and for dialogs that
/// died without a response; `code` is [`Code::SERVICE_UNAVAILABLE`] in the
/// latter case.
#[derive(Debug, Clone, Copy)]
pub struct Outcome<'a> {
  /// Internal id of the peer the dialog was with
  pub peer: u16,
  /// The path the operation addressed
  pub uri: Uri,
  /// Final response code (`5.03` on timeout / cancellation)
  pub code: Code,
  /// Response body, if any
  pub payload: Option<&'a [u8]>,
  /// Observe value visible on the delivered response, if any
  pub observe: Option<u32>,
}

/// Callback invoked exactly once with the outcome of an operation
pub type ResultHandler = Box<dyn FnMut(Outcome<'_>)>;

/// Engine-internal continuation run when a transaction finishes, before the
/// host-facing [`ResultHandler`] (the registration and observe machinery
/// need to touch context state the boxed handler cannot reach).
#[derive(Debug, Clone, Copy)]
pub(crate) enum Purpose {
  /// Nothing beyond the handler
  Plain,
  /// A `dm_*` operation issued by the server role
  Operation {
    /// Internal id of the addressed client
    client: u16,
    /// Path the operation addressed
    uri: Uri,
  },
  /// Client-role registration with a management server
  Register { server: u16 },
  /// Client-role registration update
  Update { server: u16 },
  /// Client-role deregistration
  Deregister { server: u16 },
  /// Server-role observation establishment
  Observe { client: u16, uri: Uri },
  /// Server-role observation cancellation
  ObserveCancel { client: u16, uri: Uri },
  /// Server-role fetch of the remaining blocks of a notification
  NotifyFetch { token: Token },
}

/// One outstanding confirmable (or correlated non-confirmable) exchange.
///
/// Lives in the context's transaction list from first send until its
/// callback runs or retransmission is exhausted, and owns the serialized
/// bytes it retransmits.
pub(crate) struct Transaction<C: Clock> {
  pub(crate) id: Id,
  pub(crate) peer: PeerKey,
  pub(crate) message: Message,
  pub(crate) buffer: Vec<u8>,
  pub(crate) ack_received: bool,
  pub(crate) retry: Option<RetryTimer<C>>,
  pub(crate) blocksize: u16,
  pub(crate) block1: Option<LargeBuffer>,
  pub(crate) block2: Option<LargeBuffer>,
  pub(crate) observe: Option<u32>,
  pub(crate) error: Option<TransferError>,
  pub(crate) purpose: Purpose,
  pub(crate) handler: Option<ResultHandler>,
}

impl<C: Clock> fmt::Debug for Transaction<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Transaction")
     .field("id", &self.id)
     .field("peer", &self.peer)
     .field("ack_received", &self.ack_received)
     .field("blocksize", &self.blocksize)
     .field("error", &self.error)
     .field("purpose", &self.purpose)
     .finish_non_exhaustive()
  }
}

impl<C: Clock> Transaction<C> {
  /// Create a transaction for a dialog we are about to start.
  ///
  /// Refuses ACK/RST (nothing to retransmit, nothing to await) and NON
  /// messages that could never be correlated (responses, and requests
  /// without a token).
  pub(crate) fn new(ty: Type,
                    code: Code,
                    uri: Option<&Uri>,
                    id: Id,
                    token: Token,
                    peer: PeerKey,
                    blocksize: u16)
                    -> Option<Self> {
    match ty {
      | Type::Ack | Type::Reset => return None,
      | Type::Non if code.kind() != CodeKind::Request => return None,
      | Type::Non if token.is_empty() => return None,
      | _ => (),
    }

    let mut message = Message::new(ty, code, id, token);
    if let Some(uri) = uri {
      for seg in uri.segments() {
        message.add_path_segment(&seg);
      }
    }

    Some(Self { id,
                peer,
                message,
                buffer: Vec::new(),
                ack_received: false,
                retry: None,
                blocksize,
                block1: None,
                block2: None,
                observe: None,
                error: None,
                purpose: Purpose::Plain,
                handler: None })
  }

  /// Forget the serialized bytes and retransmission history so the (mutated)
  /// message goes out as a fresh confirmable exchange.
  pub(crate) fn reset(&mut self) {
    self.buffer.clear();
    self.ack_received = false;
    self.id = self.message.id;
    self.retry = None;
  }

  /// Does receiving `msg` conclude this dialog?
  ///
  /// * an unACKed CON is never finished
  /// * a tokenless message is finished the moment its ACK lands
  /// * a response we sent is finished at its ACK
  /// * a request with a token is finished only by a same-token response
  pub(crate) fn finished_by(&self, msg: &Message) -> bool {
    if self.message.ty == Type::Con && !self.ack_received {
      return false;
    }

    if self.message.token.is_empty() {
      return true;
    }

    if self.message.code.kind() != CodeKind::Request {
      return true;
    }

    !msg.token.is_empty() && msg.token == self.message.token
  }
}

impl<T: Transport, C: Clock> Context<T, C> {
  /// Serialize (installing a Block1 stream if the payload exceeds the
  /// negotiated blocksize), transmit, arm the retry timer, and enqueue.
  ///
  /// Transport failure aborts only this send; the transaction stays queued
  /// and the retransmission schedule owns any retries.
  pub(crate) fn transaction_send(&mut self, mut tx: Transaction<C>) -> Result<(), Error<T::Error>> {
    let session = match self.peer_session(tx.peer) {
      | Some(s) => s,
      | None => {
        self.finish_transaction(tx, None);
        return Err(Error::UnknownPeer);
      },
    };

    if tx.buffer.is_empty() {
      if tx.message.payload.len() > tx.blocksize as usize && tx.block1.is_none() {
        let full = mem::take(&mut tx.message.payload);
        let total = full.len();
        let stream = LargeBuffer::from_vec(full.0);

        tx.message.set_block1(Block::new(tx.blocksize, 0, true));
        tx.message.set_size1(total as u32);
        tx.message.payload = Payload(stream.as_bytes()[..tx.blocksize as usize].to_vec());
        tx.block1 = Some(stream);
      }

      match tx.message.clone().try_into_bytes() {
        | Ok(bytes) => tx.buffer = bytes,
        | Err(e) => {
          self.finish_transaction(tx, None);
          return Err(Error::ToBytes(e));
        },
      }

      if tx.buffer.len() > self.config.max_packet_size {
        log::warn!("{}b datagram exceeds max_packet_size ({})",
                   tx.buffer.len(),
                   self.config.max_packet_size);
      }
    }

    log::trace!("sending {} -> {}",
                crate::logging::msg_summary(&tx.message),
                session);
    let sent = self.transport.send(Addrd(&tx.buffer, session));

    if tx.retry.is_none() {
      tx.retry = Some(RetryTimer::new(self.now(),
                                      self.config.msg.con.unacked_retry_strategy,
                                      self.config.msg.con.max_attempts));
    }

    self.transactions.push(tx);
    sent.map_err(Error::Send)
  }

  /// Correlate an inbound non-request message with the transaction list.
  ///
  /// ACKs match on (session, id); separate responses match on
  /// (session, token). The list is scanned in insertion order and the first
  /// match wins. RST cancels the matched transaction outright.
  pub(crate) fn transaction_handle_response(&mut self, session: no_std_net::SocketAddr, msg: &mut Message) {
    let mut ix = 0;
    while ix < self.transactions.len() {
      match self.peer_session(self.transactions[ix].peer) {
        | Some(s) if s == session => (),
        | _ => {
          ix += 1;
          continue;
        },
      }

      let mut found = false;
      {
        let tx = &mut self.transactions[ix];
        if !tx.ack_received && tx.id == msg.id {
          found = true;
          tx.ack_received = true;
        }
      }

      if msg.ty == Type::Reset {
        if found {
          log::debug!("transaction {:?} reset by peer", msg.id);
          let tx = self.transactions.remove(ix);
          self.finish_transaction(tx, None);
          return;
        }
        ix += 1;
        continue;
      }

      if self.transactions[ix].finished_by(msg) {
        let mut tx = self.transactions.remove(ix);
        let code = msg.code;

        if (msg.block1().is_some() || tx.message.block1().is_some())
           && (!code.is_error() || code == Code::REQUEST_ENTITY_TOO_LARGE)
        {
          match self.continue_block1(msg, tx) {
            | None => return,
            | Some(t) => tx = t,
          }
        }

        // A message sent from the registration monitor callback can race
        // ahead of the registration ACK and get denied; give the dialog one
        // more deadline instead of reporting the 4.01.
        if code == Code::UNAUTHORIZED && self.retries_exhausted(&tx) {
          let timeout = Milliseconds(*self.config.msg.con.unacked_retry_strategy.range().start());
          tx.ack_received = false;
          tx.retry = Some(RetryTimer::new(self.now(),
                                          Strategy::Delay { min: timeout,
                                                            max: timeout },
                                          Attempts(2)));
          self.transactions.push(tx);
          return;
        }

        if msg.payload.len() > self.config.block.max_chunk_size as usize {
          tx.error = Some(TransferError::ChunkTooLarge);
        } else if !code.is_error() && msg.block2().is_some() {
          match self.continue_block2(msg, tx) {
            | None => return,
            | Some(t) => tx = t,
          }
        }

        // keep the Observe value visible when the response was block-paced
        if msg.observe().is_none() {
          if let Some(obs) = tx.observe {
            log::trace!("blockwise: restore observe {}", obs);
            msg.set_observe(obs);
          }
        }

        self.finish_transaction(tx, Some(msg));
        return;
      }

      if found {
        // ACKed; the peer owes us a separate response, so fall back to the
        // lazier deadline
        let now = self.now();
        let strategy = self.config.msg.con.acked_retry_strategy;
        self.transactions[ix].retry = Some(RetryTimer::new(now, strategy, Attempts(2)));
        return;
      }

      ix += 1;
    }
  }

  /// Block1 initiator state machine: advance (or restart) the upload this
  /// response belongs to.
  ///
  /// Consumes the transaction and yields `None` when the next segment went
  /// out; yields it back when the dialog should proceed to its callback.
  fn continue_block1(&mut self,
                     msg: &Message,
                     mut tx: Transaction<C>)
                     -> Option<Transaction<C>> {
    let b1 = msg.block1();
    let block_size = self.adjust_blocksize(tx.peer, b1.map(|b| b.size()));

    let block_num: u32;
    let more: bool;

    if msg.code == Code::REQUEST_ENTITY_TOO_LARGE {
      match b1 {
        | Some(b) if b.num() == 0 && block_size < tx.blocksize => {
          if tx.block1.is_none() {
            let full = mem::take(&mut tx.message.payload);
            tx.block1 = Some(LargeBuffer::from_vec(full.0));
          }
          let stream = tx.block1.as_ref().unwrap();
          let total = stream.len();
          let len = total.min(block_size as usize);

          block_num = 0;
          more = len < total;
          tx.blocksize = block_size;
          tx.message.set_size1(total as u32);
          tx.message.payload = Payload(stream.as_bytes()[..len].to_vec());
        },
        // the transfer is finished, with the 4.13 as its outcome
        | _ => return Some(tx),
      }
    } else if tx.block1.is_none() {
      // no stream in flight; the peer merely stated a size preference
      return Some(tx);
    } else if b1.is_none() {
      tx.error = Some(TransferError::Block1Ignored);
      return Some(tx);
    } else {
      let b = b1.unwrap();
      let offset: usize;

      if block_size < tx.blocksize {
        match (b.num(), tx.message.block1()) {
          | (0, Some(prev)) => {
            // the peer shrank the block size on our first block; everything
            // up to the old block length got through
            let old_size = prev.size();
            offset = old_size as usize;
            block_num = (old_size / block_size) as u32;
            tx.blocksize = block_size;
          },
          | _ => {
            tx.error = Some(TransferError::ChangingBlocksize);
            return Some(tx);
          },
        }
      } else {
        offset = b.offset() + block_size as usize;
        block_num = b.num() + 1;
      }

      let stream = tx.block1.as_ref().unwrap();
      let total = stream.len();
      if offset >= total {
        // transfer finished. process the response.
        return Some(tx);
      }

      tx.message.remove_size1();
      more = offset + (block_size as usize) < total;
      let len = if more { block_size as usize } else { total - offset };
      tx.message.payload = Payload(stream.as_bytes()[offset..offset + len].to_vec());
    }

    tx.message.id = self.next_mid();
    tx.message.set_block1(Block::new(block_size, block_num, more));
    tx.reset();
    self.transaction_send(tx).ok();
    None
  }

  /// Block2 initiator state machine: accumulate this segment and request
  /// the next, or substitute the assembled body into `msg` for delivery.
  fn continue_block2(&mut self,
                     msg: &mut Message,
                     mut tx: Transaction<C>)
                     -> Option<Transaction<C>> {
    let resource_size = msg.size2().unwrap_or(0) as usize;
    let b2 = msg.block2();
    let block_size = self.adjust_blocksize(tx.peer, b2.map(|b| b.size()));
    let (block_num, more, block_offset) = b2.map(|b| (b.num(), b.more(), b.offset()))
                                            .unwrap_or((0, false, 0));

    log::trace!("blockwise: response block {} ({}b @ {}, {})",
                block_num,
                msg.payload.len(),
                block_offset,
                if more { "more..." } else { "last" });

    match tx.block2 {
      | None => match LargeBuffer::new(resource_size, msg.payload.as_bytes()) {
        | Ok(buf) => tx.block2 = Some(buf),
        | Err(_) => tx.error = Some(TransferError::OutOfMemory),
      },
      | Some(ref mut buf) => {
        match buf.append(block_offset, msg.payload.as_bytes()) {
          | Err(crate::buffer::AppendError::Incomplete) => {
            tx.error = Some(TransferError::ResponseIncomplete)
          },
          | Err(crate::buffer::AppendError::TooLarge) => {
            tx.error = Some(TransferError::OutOfMemory)
          },
          | Ok(()) => (),
        }
      },
    }

    if more && tx.error.is_none() && !msg.code.is_error() {
      if let Some(obs) = msg.observe() {
        log::trace!("blockwise: save observe {}", obs);
        tx.observe = Some(obs);
      }

      tx.message.id = self.next_mid();
      tx.message.payload = Payload(Vec::new());
      tx.message.remove_observe();
      // on a request the more bit of Block2 must be zero
      tx.message.set_block2(Block::new(block_size, block_num + 1, false));
      tx.reset();
      self.transaction_send(tx).ok();
      None
    } else {
      if let Some(ref buf) = tx.block2 {
        msg.payload = Payload(buf.as_bytes().to_vec());
      }
      Some(tx)
    }
  }

  /// Clamp an advertised block size against our chunk limit and the peer's
  /// stored blocksize. The stored value only ever shrinks; re-expanding
  /// would need an explicit negotiation this engine does not perform.
  pub(crate) fn adjust_blocksize(&mut self, peer: PeerKey, advertised: Option<u16>) -> u16 {
    let stored = self.peer_blocksize(peer);
    match advertised {
      | Some(adv) => {
        let clamped = adv.min(self.config.block.max_chunk_size);
        self.set_peer_blocksize(peer, stored.min(clamped));
        clamped
      },
      | None => stored,
    }
  }

  pub(crate) fn retries_exhausted(&self, tx: &Transaction<C>) -> bool {
    tx.retry
      .as_ref()
      .map(|r| r.attempts() >= self.config.msg.con.max_attempts)
      .unwrap_or(false)
  }

  /// Run a finished (or failed) transaction's continuation and callback.
  ///
  /// `msg = None` means the dialog died: retransmission exhausted, reset by
  /// the peer, or cancelled; the callback sees `5.03` with no payload.
  pub(crate) fn finish_transaction(&mut self, mut tx: Transaction<C>, msg: Option<&Message>) {
    let code = msg.map(|m| m.code).unwrap_or(Code::SERVICE_UNAVAILABLE);
    let payload = msg.map(|m| m.payload.as_bytes()).filter(|p| !p.is_empty());
    let observe = msg.and_then(|m| m.observe());

    if let Some(err) = tx.error {
      log::warn!("transaction {:?} finished with {:?}", tx.id, err);
    }

    let mut handler = tx.handler.take();
    let mut deliver = |uri: Uri, peer: u16| {
      if let Some(ref mut h) = handler {
        h(Outcome { peer,
                    uri,
                    code,
                    payload,
                    observe })
      }
    };

    match tx.purpose {
      | Purpose::Plain => deliver(Uri::registration(), 0),

      | Purpose::Operation { client, uri } => {
        // a Created response may carry the client-assigned location of the
        // fresh instance; report that path rather than the one we posted to
        let uri = match (code, msg.and_then(|m| m.location_path().ok())) {
          | (Code::CREATED, Some(segs)) if !segs.is_empty() => {
            Uri::from_segments(&segs).map(|(u, _)| u).unwrap_or(uri)
          },
          | _ => uri,
        };
        deliver(uri, client);
      },

      | Purpose::Register { server } => {
        let location = msg.and_then(|m| m.location_path().ok())
                          .map(|segs| segs.join("/"));
        self.registration_finished(server, code == Code::CREATED, location);
        deliver(Uri::registration(), server);
      },

      | Purpose::Update { server } => {
        self.registration_finished(server, code == Code::CHANGED, None);
        deliver(Uri::registration(), server);
      },

      | Purpose::Deregister { server } => {
        self.deregistration_finished(server);
        deliver(Uri::registration(), server);
      },

      | Purpose::Observe { client, uri } => {
        deliver(uri, client);
        if msg.is_some() && !code.is_error() {
          self.observation_established(client, uri, tx.message.token, handler);
          return;
        }
      },

      | Purpose::ObserveCancel { client, uri } => {
        self.observation_cancelled(client, &uri);
        deliver(uri, client);
      },

      | Purpose::NotifyFetch { token } => {
        self.deliver_notification(token, code, payload, observe);
      },
    }
  }
}
