use no_std_net::SocketAddr;
use std_alloc::boxed::Box;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;

use loam_msg::{Code, Message, Payload, Type};

use crate::core::{Context, Error};
use crate::dispatch::HandleResult;
use crate::net::Transport;
use crate::peer::{ClientPeer, PeerKey, RegistrationStatus};
use crate::time::Clock;
use crate::transaction::{Purpose, ResultHandler, Transaction};
use crate::uri::Uri;

/// Callback observing the server role's registration lifecycle: receives
/// the client's internal id and `2.01` / `2.04` / `2.02` as devices
/// register, refresh and deregister.
pub type MonitorHandler = Box<dyn FnMut(u16, Code)>;

/// Render an object list as a CoRE link-format registration payload
/// (`</3/0>,</1>`).
fn write_link_format(objects: &[Uri]) -> Vec<u8> {
  let mut out = String::new();
  for (ix, uri) in objects.iter().enumerate() {
    if ix > 0 {
      out.push(',');
    }
    out.push('<');
    out.push_str(&uri.to_string());
    out.push('>');
  }
  out.into_bytes()
}

/// Pick the object links out of a CoRE link-format payload, ignoring
/// attributes and anything that is not a DM path.
fn parse_link_format(bytes: &[u8]) -> Vec<Uri> {
  let text = match core::str::from_utf8(bytes) {
    | Ok(t) => t,
    | Err(_) => return Vec::new(),
  };

  text.split(',')
      .filter_map(|link| {
        let link = link.split(';').next().unwrap_or("").trim();
        link.strip_prefix('<')
            .and_then(|l| l.strip_suffix('>'))
            .and_then(|l| l.parse::<Uri>().ok())
      })
      .filter(|uri| uri.object.is_some())
      .collect()
}

impl<T: Transport, C: Clock> Context<T, C> {
  /// The registration interface (server role): POST `/rd` registers,
  /// PUT `/rd/<loc>` refreshes, DELETE `/rd/<loc>` removes.
  pub(crate) fn handle_registration_request(&mut self,
                                            session: SocketAddr,
                                            loc: Option<&str>,
                                            msg: &Message,
                                            resp: &mut Message)
                                            -> HandleResult {
    match (msg.code, loc) {
      | (Code::POST, None) => {
        let queries = msg.queries().unwrap_or_default();
        let endpoint = match queries.iter().find_map(|q| q.strip_prefix("ep=")) {
          | Some(ep) if !ep.is_empty() => ep.to_string(),
          | _ => return HandleResult::code(Code::BAD_REQUEST),
        };
        let lifetime = queries.iter()
                              .find_map(|q| q.strip_prefix("lt="))
                              .and_then(|v| v.parse().ok())
                              .unwrap_or(86_400);
        let objects = parse_link_format(msg.payload.as_bytes());

        // a returning endpoint replaces its previous record
        let id = match self.clients.iter().position(|c| c.endpoint == endpoint) {
          | Some(ix) => {
            let c = &mut self.clients[ix];
            c.session = session;
            c.lifetime = lifetime;
            c.objects = objects;
            c.id
          },
          | None => {
            let id = self.next_client_id;
            self.next_client_id = self.next_client_id.wrapping_add(1);
            self.clients.push(ClientPeer { id,
                                           endpoint,
                                           session,
                                           location: id.to_string(),
                                           lifetime,
                                           objects,
                                           blocksize: self.config.block.max_chunk_size });
            id
          },
        };

        let location = self.clients
                           .iter()
                           .find(|c| c.id == id)
                           .map(|c| c.location.clone())
                           .unwrap_or_default();
        log::info!("registered {} as client {} at rd/{}", session, id, location);

        resp.add_location_segment("rd");
        resp.add_location_segment(&location);
        self.notify_monitor(id, Code::CREATED);
        HandleResult::code(Code::CREATED)
      },

      | (Code::PUT, Some(loc)) => {
        match self.clients.iter().position(|c| c.location == loc) {
          | Some(ix) => {
            let c = &mut self.clients[ix];
            c.session = session;
            if let Some(lt) = msg.queries()
                                 .unwrap_or_default()
                                 .iter()
                                 .find_map(|q| q.strip_prefix("lt="))
                                 .and_then(|v| v.parse().ok())
            {
              c.lifetime = lt;
            }
            if !msg.payload.is_empty() {
              c.objects = parse_link_format(msg.payload.as_bytes());
            }
            let id = c.id;
            log::info!("client {} refreshed its registration", id);
            self.notify_monitor(id, Code::CHANGED);
            HandleResult::code(Code::CHANGED)
          },
          | None => HandleResult::code(Code::NOT_FOUND),
        }
      },

      | (Code::DELETE, Some(loc)) => {
        match self.clients.iter().position(|c| c.location == loc) {
          | Some(ix) => {
            let client = self.clients.remove(ix);
            self.observations.retain(|o| o.client != client.id);
            log::info!("client {} deregistered", client.id);
            self.notify_monitor(client.id, Code::DELETED);
            HandleResult::code(Code::DELETED)
          },
          | None => HandleResult::code(Code::NOT_FOUND),
        }
      },

      | _ => HandleResult::code(Code::BAD_REQUEST),
    }
  }

  fn notify_monitor(&mut self, client: u16, status: Code) {
    if let Some(mut monitor) = self.monitor.take() {
      monitor(client, status);
      self.monitor = Some(monitor);
    }
  }

  /// Register with a management server (client role): POST `/rd` with our
  /// endpoint name and the link-format object list.
  ///
  /// The server-peer record tracks the outcome; `handler` (optional) also
  /// hears it.
  pub fn register(&mut self,
                  server: u16,
                  objects: &[Uri],
                  handler: Option<ResultHandler>)
                  -> Result<(), Error<T::Error>> {
    let endpoint = self.endpoint_name
                       .clone()
                       .ok_or(Error::Status(Code::BAD_REQUEST))?;
    let blocksize = self.servers
                        .iter()
                        .find(|s| s.id == server)
                        .map(|s| s.blocksize)
                        .ok_or(Error::UnknownPeer)?;

    let id = self.next_mid();
    let token = self.next_token(id);
    let mut tx = Transaction::new(Type::Con,
                                  Code::POST,
                                  Some(&Uri::registration()),
                                  id,
                                  token,
                                  PeerKey::Server(server),
                                  blocksize)
      .ok_or(Error::Status(Code::INTERNAL_SERVER_ERROR))?;

    let mut query = String::from("ep=");
    query.push_str(&endpoint);
    tx.message.add_query(&query);
    tx.message.payload = Payload(write_link_format(objects));
    tx.purpose = Purpose::Register { server };
    tx.handler = handler;

    if let Some(s) = self.servers.iter_mut().find(|s| s.id == server) {
      s.status = RegistrationStatus::Pending;
    }
    self.transaction_send(tx)
  }

  /// Refresh our registration (client role): PUT to the location the server
  /// assigned, optionally replacing the advertised object list.
  pub fn update_registration(&mut self,
                             server: u16,
                             objects: Option<&[Uri]>,
                             handler: Option<ResultHandler>)
                             -> Result<(), Error<T::Error>> {
    let (blocksize, location) = self.registered_server(server)?;

    let id = self.next_mid();
    let token = self.next_token(id);
    let mut tx = Transaction::new(Type::Con,
                                  Code::PUT,
                                  None,
                                  id,
                                  token,
                                  PeerKey::Server(server),
                                  blocksize)
      .ok_or(Error::Status(Code::INTERNAL_SERVER_ERROR))?;

    for seg in location.split('/') {
      tx.message.add_path_segment(seg);
    }
    if let Some(objects) = objects {
      tx.message.payload = Payload(write_link_format(objects));
    }
    tx.purpose = Purpose::Update { server };
    tx.handler = handler;

    self.transaction_send(tx)
  }

  /// Leave a management server (client role): DELETE our registration
  /// location.
  pub fn deregister(&mut self,
                    server: u16,
                    handler: Option<ResultHandler>)
                    -> Result<(), Error<T::Error>> {
    let (blocksize, location) = self.registered_server(server)?;

    let id = self.next_mid();
    let token = self.next_token(id);
    let mut tx = Transaction::new(Type::Con,
                                  Code::DELETE,
                                  None,
                                  id,
                                  token,
                                  PeerKey::Server(server),
                                  blocksize)
      .ok_or(Error::Status(Code::INTERNAL_SERVER_ERROR))?;

    for seg in location.split('/') {
      tx.message.add_path_segment(seg);
    }
    tx.purpose = Purpose::Deregister { server };
    tx.handler = handler;

    self.transaction_send(tx)
  }

  fn registered_server(&self, server: u16) -> Result<(u16, String), Error<T::Error>> {
    let s = self.servers
                .iter()
                .find(|s| s.id == server)
                .ok_or(Error::UnknownPeer)?;
    let location = s.location.clone().ok_or(Error::Status(Code::BAD_REQUEST))?;
    Ok((s.blocksize, location))
  }

  /// A register/update dialog finished (from the transaction machinery).
  pub(crate) fn registration_finished(&mut self,
                                      server: u16,
                                      accepted: bool,
                                      location: Option<String>) {
    if let Some(s) = self.servers.iter_mut().find(|s| s.id == server) {
      s.status = match accepted {
        | true => RegistrationStatus::Registered,
        | false => RegistrationStatus::Failed,
      };
      if accepted {
        if let Some(loc) = location {
          log::info!("registered with server {} at {}", server, loc);
          s.location = Some(loc);
        }
      }
    }
  }

  /// A deregister dialog finished (from the transaction machinery).
  pub(crate) fn deregistration_finished(&mut self, server: u16) {
    if let Some(s) = self.servers.iter_mut().find(|s| s.id == server) {
      s.status = RegistrationStatus::Unregistered;
      s.location = None;
    }
  }
}

#[cfg(test)]
mod tests {
  use core::cell::RefCell;
  use std::rc::Rc;

  use loam_msg::{Id, Token, TryFromBytes, TryIntoBytes};

  use super::*;
  use crate::net::Addrd;
  use crate::test::{addr, ctx};

  #[test]
  fn link_format_roundtrip() {
    let objects = [Uri::instance(3, 0), Uri::object(1), Uri::instance(1024, 5)];
    let text = write_link_format(&objects);
    assert_eq!(text, b"</3/0>,</1>,</1024/5>".to_vec());
    assert_eq!(parse_link_format(&text), objects.to_vec());

    // attributes are skipped, garbage is skipped
    assert_eq!(parse_link_format(b"</3/0>;rt=\"x\",nonsense,</9>"),
               vec![Uri::instance(3, 0), Uri::object(9)]);
  }

  #[test]
  fn register_update_deregister_lifecycle() {
    let (mut ctx, io) = ctx();

    let events: Rc<RefCell<Vec<(u16, Code)>>> = Default::default();
    let sink = events.clone();
    ctx.set_monitor(Box::new(move |id, code| sink.borrow_mut().push((id, code))));

    let send = |ctx: &mut crate::core::Context<_, _>, id: u16, code: Code, path: &[&str], query: Option<&str>, payload: &[u8]| {
      let mut req = Message::new(Type::Con, code, Id(id), Token::opaque(&[id as u8]).truncate(2));
      for seg in path {
        req.add_path_segment(seg);
      }
      if let Some(q) = query {
        req.add_query(q);
      }
      req.payload = Payload(payload.to_vec());
      let bytes = req.try_into_bytes().unwrap();
      ctx.handle_packet(Addrd(&bytes[..], addr(7))).unwrap();
    };

    send(&mut ctx, 30, Code::POST, &["rd"], Some("ep=urn:dev:42"), b"</3/0>,</1>");
    let resp = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(resp.code, Code::CREATED);
    assert_eq!(resp.location_path().unwrap(), vec!["rd", "0"]);

    assert_eq!(ctx.clients().len(), 1);
    let c = &ctx.clients()[0];
    assert_eq!(c.endpoint, "urn:dev:42");
    assert_eq!(c.objects, vec![Uri::instance(3, 0), Uri::object(1)]);

    send(&mut ctx, 31, Code::PUT, &["rd", "0"], Some("lt=300"), b"");
    let resp = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(resp.code, Code::CHANGED);
    assert_eq!(ctx.clients()[0].lifetime, 300);

    send(&mut ctx, 32, Code::DELETE, &["rd", "0"], None, b"");
    let resp = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(resp.code, Code::DELETED);
    assert!(ctx.clients().is_empty());

    assert_eq!(*events.borrow(),
               vec![(0, Code::CREATED), (0, Code::CHANGED), (0, Code::DELETED)]);

    // the location is gone now
    send(&mut ctx, 33, Code::PUT, &["rd", "0"], None, b"");
    let resp = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(resp.code, Code::NOT_FOUND);
  }

  #[test]
  fn missing_endpoint_name_is_rejected() {
    let (mut ctx, io) = ctx();

    let mut req = Message::new(Type::Con, Code::POST, Id(40), Token(Default::default()));
    req.add_path_segment("rd");
    let bytes = req.try_into_bytes().unwrap();
    ctx.handle_packet(Addrd(&bytes[..], addr(7))).unwrap();

    let resp = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(resp.code, Code::BAD_REQUEST);
  }

  #[test]
  fn client_role_registration_flow() {
    let (mut ctx, io) = ctx();
    ctx.set_endpoint_name("urn:dev:7");
    let server = ctx.add_server(addr(2));

    ctx.register(server, &[Uri::instance(3, 0)], None).unwrap();
    assert_eq!(ctx.servers()[0].status, RegistrationStatus::Pending);

    let req = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(req.code, Code::POST);
    assert_eq!(req.path_segments().unwrap(), vec!["rd"]);
    assert_eq!(req.queries().unwrap(), vec!["ep=urn:dev:7"]);
    assert_eq!(req.payload.as_bytes(), b"</3/0>");

    let mut resp = Message::new(Type::Ack, Code::CREATED, req.id, req.token);
    resp.add_location_segment("rd");
    resp.add_location_segment("5");
    let bytes = resp.try_into_bytes().unwrap();
    ctx.handle_packet(Addrd(&bytes[..], addr(2))).unwrap();

    assert_eq!(ctx.servers()[0].status, RegistrationStatus::Registered);
    assert_eq!(ctx.servers()[0].location.as_deref(), Some("rd/5"));

    // refresh goes to the assigned location
    io.clear();
    ctx.update_registration(server, None, None).unwrap();
    let req = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(req.code, Code::PUT);
    assert_eq!(req.path_segments().unwrap(), vec!["rd", "5"]);

    let resp = Message::new(Type::Ack, Code::CHANGED, req.id, req.token);
    let bytes = resp.try_into_bytes().unwrap();
    ctx.handle_packet(Addrd(&bytes[..], addr(2))).unwrap();
    assert_eq!(ctx.servers()[0].status, RegistrationStatus::Registered);

    // and deregistration clears the slate
    ctx.deregister(server, None).unwrap();
    let req = Message::try_from_bytes(io.sent().last().unwrap().data()).unwrap();
    assert_eq!(req.code, Code::DELETE);
    let resp = Message::new(Type::Ack, Code::DELETED, req.id, req.token);
    let bytes = resp.try_into_bytes().unwrap();
    ctx.handle_packet(Addrd(&bytes[..], addr(2))).unwrap();

    assert_eq!(ctx.servers()[0].status, RegistrationStatus::Unregistered);
    assert_eq!(ctx.servers()[0].location, None);
  }
}
