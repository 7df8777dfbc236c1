use core::mem;

use no_std_net::SocketAddr;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;

use loam_msg::{Block, Code, CodeKind, Id, Message, MessageParseError, Payload, Token,
               TryFromBytes, Type};

use crate::buffer::LargeBuffer;
use crate::core::{Context, Error};
use crate::net::{Addrd, Transport};
use crate::time::Clock;
use crate::uri::{Uri, UriKind};

/// What a request handler decided: the response code, plus whether the
/// handled operation changed a resource value (which must fire observation
/// notifications once the response is on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandleResult {
  pub(crate) code: Code,
  pub(crate) value_changed: bool,
}

impl HandleResult {
  pub(crate) fn code(code: Code) -> Self {
    Self { code,
           value_changed: false }
  }

  pub(crate) fn changed(code: Code) -> Self {
    Self { code,
           value_changed: true }
  }
}

impl<T: Transport, C: Clock> Context<T, C> {
  /// Feed one received datagram into the engine.
  ///
  /// Parses, classifies and routes the message; any response it provokes is
  /// serialized and handed to the transport before this returns. Parse
  /// failures are answered with a diagnostic ACK and reported as `Ok` (the
  /// engine survived; the peer is the problem).
  pub fn handle_packet(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Error<T::Error>> {
    let Addrd(bytes, session) = dgram;

    let mut msg = match Message::try_from_bytes(bytes) {
      | Ok(msg) => msg,
      | Err(e) => {
        log::debug!("dropping unparseable {}b datagram from {}: {:?}",
                    bytes.len(),
                    session,
                    e);
        return self.reject_unparseable(session, bytes, e);
      },
    };

    log::trace!("recvd {} <- {}", crate::logging::msg_summary(&msg), session);

    match msg.code.kind() {
      | CodeKind::Request if (1..=4).contains(&msg.code.detail) => {
        self.handle_request_packet(session, &mut msg)
      },
      | CodeKind::Request => {
        let mut reply = Message::new(Type::Ack,
                                     Code::METHOD_NOT_ALLOWED,
                                     msg.id,
                                     Token(Default::default()));
        reply.payload = Payload(b"unknown method".to_vec());
        self.message_send(session, reply).map(|_| ())
      },
      | _ => match msg.ty {
        | Type::Con | Type::Non => {
          let notify = (msg.code == Code::CHANGED || msg.code == Code::CONTENT)
                       && msg.observe().is_some();
          let handled = notify && self.handle_observe_notify(session, &mut msg);
          if !handled {
            self.transaction_handle_response(session, &mut msg);
          }

          if msg.ty == Type::Con {
            let ack = msg.ack();
            self.message_send(session, ack)?;
          }
          Ok(())
        },
        | Type::Ack => {
          self.transaction_handle_response(session, &mut msg);
          Ok(())
        },
        | Type::Reset => {
          self.cancel_watcher(msg.id, session);
          self.transaction_handle_response(session, &mut msg);
          Ok(())
        },
      },
    }
  }

  /// Answer bytes that would not parse with an ACK carrying the error code
  /// and a short diagnostic payload, when enough of a header survived to
  /// correlate one.
  fn reject_unparseable(&mut self,
                        session: SocketAddr,
                        bytes: &[u8],
                        e: MessageParseError)
                        -> Result<(), Error<T::Error>> {
    let id = match bytes {
      | &[_, _, a, b, ..] => Id::from_be_bytes([a, b]),
      | _ => return Ok(()),
    };

    let code = match e {
      | MessageParseError::OptParseError(_) => Code::BAD_OPTION,
      | _ => Code::BAD_REQUEST,
    };

    let mut reply = Message::new(Type::Ack, code, id, Token(Default::default()));
    reply.payload = Payload(e.reason().as_bytes().to_vec());
    self.message_send(session, reply).map(|_| ())
  }

  fn handle_request_packet(&mut self,
                           session: SocketAddr,
                           msg: &mut Message)
                           -> Result<(), Error<T::Error>> {
    if msg.ty == Type::Con {
      if let Some(bytes) = self.cached_reply(session, msg.id) {
        log::debug!("duplicate {:?} from {}; replaying cached reply", msg.id, session);
        let bytes = bytes.to_vec();
        return self.transport
                   .send(Addrd(&bytes, session))
                   .map_err(Error::Send);
      }
    }

    // CON requests are answered on their own id; NON requests get a fresh
    // NON of our own
    let mut resp = match msg.ty {
      | Type::Con => Message::new(Type::Ack, Code::CONTENT, msg.id, msg.token),
      | _ => {
        let id = self.next_mid();
        Message::new(Type::Non, Code::CONTENT, id, msg.token)
      },
    };

    let decoded = {
      let segs: Vec<String> = match msg.path_segments() {
        | Ok(segs) => segs.iter().map(|s| s.to_string()).collect(),
        | Err(_) => Vec::new(),
      };
      let refs: Vec<&str> = segs.iter().map(String::as_str).collect();
      Uri::from_segments(&refs).ok()
                               .map(|(uri, loc)| (uri, loc.map(|l| l.to_string())))
    };

    let result = match decoded {
      | None => HandleResult::code(Code::BAD_REQUEST),
      | Some((uri, ref loc)) => self.handle_request(session, &uri, loc.as_deref(), msg, &mut resp),
    };

    if !result.code.is_error() {
      resp.code = result.code;
      let bytes = self.message_send(session, resp)?;
      if msg.ty == Type::Con {
        self.cache_reply(session, msg.id, bytes);
      }
      if result.value_changed {
        if let Some((uri, _)) = decoded {
          self.resource_value_changed(&uri);
        }
      }
      Ok(())
    } else {
      let mut reply = Message::new(Type::Ack, result.code, msg.id, Token(Default::default()));
      reply.payload = Payload(String::from_iter(result.code.to_human()).into_bytes());
      let bytes = self.message_send(session, reply)?;
      if msg.ty == Type::Con {
        self.cache_reply(session, msg.id, bytes);
      }
      Ok(())
    }
  }

  /// The request pipeline: Block1 accumulation, Block2 cache consultation,
  /// handler dispatch by URI type, Block2 registration of large responses.
  fn handle_request(&mut self,
                    session: SocketAddr,
                    uri: &Uri,
                    loc: Option<&str>,
                    msg: &mut Message,
                    resp: &mut Message)
                    -> HandleResult {
    let mut accumulated: Option<LargeBuffer> = None;

    if let Some(b1) = msg.block1() {
      let size = b1.size().min(self.config.block.max_chunk_size);
      log::debug!("blockwise: request block {} ({}b/{}b) @ {}",
                  b1.num(),
                  size,
                  self.config.block.max_chunk_size,
                  b1.offset());
      resp.set_block1(Block::new(size, b1.num(), b1.more()));

      let now = self.now();
      match self.blockwise.position(Some(session), msg.code, uri) {
        | None if b1.num() > 0 => {
          return HandleResult::code(Code::REQUEST_ENTITY_INCOMPLETE);
        },
        | None => {
          if let Err(e) = self.blockwise
                              .insert_accumulator(session, msg.code, uri, msg, now)
          {
            return HandleResult::code(e.code());
          }
        },
        | Some(ix) => {
          if let Err(e) = self.blockwise.append(ix, b1.offset(), msg, now) {
            self.blockwise.remove(ix);
            return HandleResult::code(e.code());
          }
        },
      }

      if b1.more() {
        return HandleResult::code(Code::CONTINUE);
      }

      // final segment; the handler consumes the whole reassembled body
      let ix = self.blockwise
                   .position(Some(session), msg.code, uri)
                   .expect("accumulator inserted or appended above");
      accumulated = Some(self.blockwise.remove(ix).buffer);
    }

    let mut block_size = self.config.block.max_chunk_size;
    let mut block_num = 0u32;
    if let Some(b2) = msg.block2() {
      block_size = b2.size().min(block_size);
      block_num = b2.num();
    }

    // observe-registering GETs have side effects and must always reach the
    // handler; everything else may be served from the response cache
    let observing = msg.code == Code::GET && msg.observe().is_some();
    let mut cached = match observing {
      | true => None,
      | false => self.blockwise.position(None, msg.code, uri),
    };

    let mut result = HandleResult::code(Code::CONTENT);
    if cached.is_none() {
      let saved = accumulated.map(|buf| mem::replace(&mut msg.payload, Payload(buf.into_bytes())));

      result = match uri.kind {
        | UriKind::Dm => self.handle_dm_request(uri, session, msg, resp),
        | UriKind::Bootstrap => HandleResult::code(Code::NOT_IMPLEMENTED),
        | UriKind::Registration => self.handle_registration_request(session, loc, msg, resp),
      };

      if let Some(original) = saved {
        msg.payload = original;
      }

      if !result.code.is_error() && resp.payload.len() > block_size as usize {
        let now = self.now();
        let payload = mem::take(&mut resp.payload).0;
        let etag = resp.etag().map(|t| t.to_vec());
        cached = Some(self.blockwise
                          .insert_response(msg.code, uri, payload, etag.as_deref(), now));
      }
    }

    if !result.code.is_error() {
      if let Some(ix) = cached {
        let now = self.now();
        self.blockwise.prepare(ix, block_num, block_size, resp, now);
      }
    }

    result
  }
}

#[cfg(test)]
mod tests {
  use loam_msg::TryIntoBytes;

  use super::*;
  use crate::test::{addr, ctx, TestStore};

  #[test]
  fn parse_error_answers_with_diagnostic_ack() {
    let (mut ctx, io) = ctx();

    // version 2 header
    let bad = [0b1000_0000u8, 0x01, 0x30, 0x39];
    ctx.handle_packet(Addrd(&bad, addr(1))).unwrap();

    let sent = io.sent();
    assert_eq!(sent.len(), 1);
    let reply = Message::try_from_bytes(sent[0].data()).unwrap();
    assert_eq!(reply.ty, Type::Ack);
    assert_eq!(reply.code, Code::BAD_REQUEST);
    assert_eq!(reply.id, Id(0x3039));
    assert!(!reply.payload.is_empty());
  }

  #[test]
  fn con_request_gets_piggybacked_ack() {
    let (mut ctx, io) = ctx();
    ctx.set_object_store(Box::new(TestStore::default()));

    let mut req = Message::new(Type::Con, Code::GET, Id(7), Token::opaque(&[1]).truncate(2));
    req.add_path_segment("3");
    req.add_path_segment("0");
    req.add_path_segment("0");
    let bytes = req.clone().try_into_bytes().unwrap();

    ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();

    let sent = io.sent();
    assert_eq!(sent.len(), 1);
    let resp = Message::try_from_bytes(sent[0].data()).unwrap();
    assert_eq!(resp.ty, Type::Ack);
    assert_eq!(resp.id, Id(7));
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.token, req.token);
    assert_eq!(resp.payload.as_bytes(), b"Nordic");
  }

  #[test]
  fn duplicate_con_is_replayed_without_rerunning_the_handler() {
    let (mut ctx, io) = ctx();
    let store = TestStore::default();
    ctx.set_object_store(Box::new(store.clone()));

    let mut req = Message::new(Type::Con, Code::GET, Id(7), Token::opaque(&[1]).truncate(2));
    req.add_path_segment("3");
    req.add_path_segment("0");
    req.add_path_segment("0");
    let bytes = req.try_into_bytes().unwrap();

    ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();
    ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();

    let sent = io.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data(), sent[1].data());
    assert_eq!(store.reads(), 1);
  }

  #[test]
  fn unknown_uri_is_a_bad_request() {
    let (mut ctx, io) = ctx();

    let mut req = Message::new(Type::Con, Code::GET, Id(8), Token(Default::default()));
    req.add_path_segment("not-a-number");
    let bytes = req.try_into_bytes().unwrap();

    ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();

    let resp = Message::try_from_bytes(io.sent()[0].data()).unwrap();
    assert_eq!(resp.code, Code::BAD_REQUEST);
  }

  #[test]
  fn block1_upload_is_accumulated_and_continued() {
    let (mut ctx, io) = ctx();
    let store = TestStore::default();
    ctx.set_object_store(Box::new(store.clone()));

    let body: Vec<u8> = (0..2048u32).map(|b| b as u8).collect();
    let token = Token::opaque(&[2]).truncate(2);

    for num in 0..2u32 {
      let mut req = Message::new(Type::Con, Code::PUT, Id(100 + num as u16), token);
      req.add_path_segment("1024");
      req.add_path_segment("5");
      req.add_path_segment("3");
      req.set_block1(Block::new(1024, num, num == 0));
      if num == 0 {
        req.set_size1(2048);
      }
      req.payload = Payload(body[num as usize * 1024..(num as usize + 1) * 1024].to_vec());
      let bytes = req.try_into_bytes().unwrap();
      ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();
    }

    let sent = io.sent();
    assert_eq!(sent.len(), 2);

    let first = Message::try_from_bytes(sent[0].data()).unwrap();
    assert_eq!(first.code, Code::CONTINUE);
    let b = first.block1().unwrap();
    assert_eq!((b.num(), b.more()), (0, true));

    let last = Message::try_from_bytes(sent[1].data()).unwrap();
    assert_eq!(last.code, Code::CHANGED);

    // the handler saw the reassembled body, byte-identical
    assert_eq!(store.written(), Some(body));
  }

  #[test]
  fn block1_gap_gets_entity_incomplete() {
    let (mut ctx, io) = ctx();
    ctx.set_object_store(Box::new(TestStore::default()));

    let mut req = Message::new(Type::Con, Code::PUT, Id(9), Token(Default::default()));
    req.add_path_segment("1024");
    req.add_path_segment("5");
    req.add_path_segment("3");
    req.set_block1(Block::new(1024, 3, true));
    req.payload = Payload(vec![0; 1024]);
    let bytes = req.try_into_bytes().unwrap();

    ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();

    let resp = Message::try_from_bytes(io.sent()[0].data()).unwrap();
    assert_eq!(resp.code, Code::REQUEST_ENTITY_INCOMPLETE);
  }

  #[test]
  fn large_response_is_served_in_blocks_from_one_cache_entry() {
    let (mut ctx, io) = ctx();
    let store = TestStore::big(4096);
    ctx.set_object_store(Box::new(store.clone()));

    let get = |id: u16, num: u32| {
      let mut req = Message::new(Type::Con, Code::GET, Id(id), Token(Default::default()));
      req.add_path_segment("1024");
      req.add_path_segment("7");
      req.add_path_segment("3");
      if num > 0 {
        req.set_block2(Block::new(1024, num, false));
      }
      req.try_into_bytes().unwrap()
    };

    // two peers interleave their downloads of the same resource
    ctx.handle_packet(Addrd(&get(1, 0)[..], addr(1))).unwrap();
    ctx.handle_packet(Addrd(&get(2, 0)[..], addr(2))).unwrap();
    ctx.handle_packet(Addrd(&get(3, 1)[..], addr(1))).unwrap();
    ctx.handle_packet(Addrd(&get(4, 3)[..], addr(2))).unwrap();

    // the resource rendered once; every block came from the shared cache
    assert_eq!(store.reads(), 1);

    let sent = io.sent();
    let first = Message::try_from_bytes(sent[0].data()).unwrap();
    assert_eq!(first.size2(), Some(4096));
    assert_eq!(first.payload.len(), 1024);
    let b = first.block2().unwrap();
    assert_eq!((b.num(), b.more()), (0, true));

    let last = Message::try_from_bytes(sent[3].data()).unwrap();
    let b = last.block2().unwrap();
    assert_eq!((b.num(), b.more()), (3, false));
    assert_eq!(last.size2(), None);
  }

  #[test]
  fn bootstrap_is_not_implemented() {
    let (mut ctx, io) = ctx();

    let mut req = Message::new(Type::Con, Code::POST, Id(5), Token(Default::default()));
    req.add_path_segment("bs");
    let bytes = req.try_into_bytes().unwrap();
    ctx.handle_packet(Addrd(&bytes, addr(1))).unwrap();

    let resp = Message::try_from_bytes(io.sent()[0].data()).unwrap();
    assert_eq!(resp.code, Code::NOT_IMPLEMENTED);
  }
}
