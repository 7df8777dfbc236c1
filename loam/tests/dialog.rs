//! Cross-role dialog tests: two engines (or one engine and a scripted peer)
//! talking over an in-memory wire.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use no_std_net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use loam::net::{Addrd, Transport};
use loam::object::ObjectStore;
use loam::uri::Uri;
use loam::{Context, Timeout};
use loam_msg::{Block, Code, Id, Message, Payload, Token, TryFromBytes, TryIntoBytes, Type};

#[derive(Debug, Clone)]
struct SharedClock(Rc<Cell<u64>>);

impl embedded_time::Clock for SharedClock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

#[derive(Debug, Clone, Default)]
struct Wire(Rc<RefCell<Vec<Addrd<Vec<u8>>>>>);

impl Transport for Wire {
  type Error = &'static str;

  fn send(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Self::Error> {
    self.0.borrow_mut().push(dgram.map(|b| b.to_vec()));
    Ok(())
  }
}

impl Wire {
  fn drain(&self) -> Vec<Addrd<Vec<u8>>> {
    self.0.borrow_mut().drain(..).collect()
  }

  fn last_message(&self) -> Message {
    let sent = self.0.borrow();
    Message::try_from_bytes(sent.last().expect("nothing was sent").data()).unwrap()
  }
}

fn addr(n: u8) -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, n), 5683))
}

type Engine = Context<Wire, SharedClock>;

fn engine(time: &Rc<Cell<u64>>) -> (Engine, Wire) {
  let wire = Wire::default();
  (Context::new(SharedClock(time.clone()), wire.clone()), wire)
}

fn engine_config(time: &Rc<Cell<u64>>, config: loam::config::Config) -> (Engine, Wire) {
  let wire = Wire::default();
  (Context::new_config(config, SharedClock(time.clone()), wire.clone()), wire)
}

/// Deliver everything `from` sent to whichever engine it addressed.
fn pump(from: &Wire, from_addr: SocketAddr, engines: &mut [(SocketAddr, &mut Engine)]) -> usize {
  let dgrams = from.drain();
  let count = dgrams.len();
  for Addrd(bytes, dest) in dgrams {
    for (addr, engine) in engines.iter_mut() {
      if *addr == dest {
        engine.handle_packet(Addrd(&bytes[..], from_addr)).unwrap();
      }
    }
  }
  count
}

/// Run traffic both ways until the wire goes quiet.
fn settle(a: (&Wire, SocketAddr, &mut Engine), b: (&Wire, SocketAddr, &mut Engine)) {
  let (a_wire, a_addr, a_engine) = a;
  let (b_wire, b_addr, b_engine) = b;
  loop {
    let mut moved = 0;
    moved += pump(a_wire, a_addr, &mut [(b_addr, &mut *b_engine)]);
    moved += pump(b_wire, b_addr, &mut [(a_addr, &mut *a_engine)]);
    if moved == 0 {
      break;
    }
  }
}

/// A device-side store holding one readable resource and recording writes.
#[derive(Clone, Default)]
struct DeviceStore {
  written: Rc<RefCell<Option<Vec<u8>>>>,
}

impl ObjectStore for DeviceStore {
  fn read(&mut self, _uri: &Uri) -> Result<Vec<u8>, Code> {
    Ok(b"Nordic".to_vec())
  }

  fn write(&mut self, _uri: &Uri, value: &[u8]) -> Code {
    *self.written.borrow_mut() = Some(value.to_vec());
    Code::CHANGED
  }

  fn execute(&mut self, _uri: &Uri, _args: &[u8]) -> Code {
    Code::CHANGED
  }

  fn create(&mut self, uri: &Uri, _value: &[u8]) -> Result<u16, Code> {
    Ok(uri.instance.unwrap_or(0))
  }

  fn delete(&mut self, _uri: &Uri) -> Code {
    Code::DELETED
  }

  fn write_attributes(&mut self, _uri: &Uri, _query: &str) -> Code {
    Code::CHANGED
  }

  fn is_instance_new(&mut self, _object: u16, _instance: u16) -> bool {
    false
  }
}

/// Register a scripted "device" endpoint with a server engine by walking the
/// registration interface, yielding the client's internal id.
fn register_scripted_device(server: &mut Engine, wire: &Wire, device: SocketAddr) -> u16 {
  let mut req = Message::new(Type::Con, Code::POST, Id(1), Token::opaque(&[1]).truncate(2));
  req.add_path_segment("rd");
  req.add_query("ep=urn:dev:scripted");
  req.payload = Payload(b"</1024/5>".to_vec());
  let bytes = req.try_into_bytes().unwrap();
  server.handle_packet(Addrd(&bytes[..], device)).unwrap();
  wire.drain();

  server.clients().last().unwrap().id
}

#[test]
fn small_get_end_to_end() {
  let time = Rc::new(Cell::new(0));
  let (mut server, server_wire) = engine(&time);
  let (mut device, device_wire) = engine(&time);
  let (server_addr, device_addr) = (addr(1), addr(2));

  device.set_endpoint_name("urn:dev:1234");
  device.set_object_store(Box::new(DeviceStore::default()));
  let sid = device.add_server(server_addr);

  device.register(sid, &[Uri::instance(3, 0)], None).unwrap();
  settle((&device_wire, device_addr, &mut device),
         (&server_wire, server_addr, &mut server));

  assert_eq!(server.clients().len(), 1);
  assert_eq!(server.clients()[0].endpoint, "urn:dev:1234");
  let client = server.clients()[0].id;

  let results: Rc<RefCell<Vec<(Code, Option<Vec<u8>>)>>> = Default::default();
  let sink = results.clone();
  server.dm_read(client,
                 &Uri::resource(3, 0, 0),
                 Box::new(move |out| {
                   sink.borrow_mut()
                       .push((out.code, out.payload.map(|p| p.to_vec())));
                 }))
        .unwrap();

  settle((&server_wire, server_addr, &mut server),
         (&device_wire, device_addr, &mut device));

  assert_eq!(*results.borrow(),
             vec![(Code::CONTENT, Some(b"Nordic".to_vec()))]);
}

#[test]
fn block1_upload_with_late_shrink() {
  let time = Rc::new(Cell::new(0));
  let (mut server, wire) = engine(&time);
  let device_addr = addr(9);
  let client = register_scripted_device(&mut server, &wire, device_addr);

  let body: Vec<u8> = (0..2000u32).map(|b| (b % 251) as u8).collect();
  let results: Rc<RefCell<Vec<Code>>> = Default::default();
  let sink = results.clone();

  server.dm_write(client,
                  &Uri::resource(1024, 5, 3),
                  &body,
                  Box::new(move |out| sink.borrow_mut().push(out.code)))
        .unwrap();

  // the 2000 byte payload goes out blockwise at the initial 1024 blocksize
  let first = wire.last_message();
  let b = first.block1().unwrap();
  assert_eq!((b.num(), b.more(), b.size()), (0, true, 1024));
  assert_eq!(first.size1(), Some(2000));
  assert_eq!(first.payload.len(), 1024);
  wire.drain();

  // the device refuses: too large, take 512
  let mut refuse = Message::new(Type::Ack,
                                Code::REQUEST_ENTITY_TOO_LARGE,
                                first.id,
                                first.token);
  refuse.set_block1(Block::new(512, 0, false));
  let bytes = refuse.try_into_bytes().unwrap();
  server.handle_packet(Addrd(&bytes[..], device_addr)).unwrap();

  // the upload restarts from block 0 at the shrunken size
  let mut collected = Vec::new();
  for expect_num in 0..4u32 {
    let req = wire.last_message();
    wire.drain();
    let b = req.block1().unwrap();
    assert_eq!(b.num(), expect_num);
    assert_eq!(b.size(), 512);
    assert_eq!(b.more(), expect_num < 3);
    collected.extend_from_slice(req.payload.as_bytes());

    let code = if b.more() { Code::CONTINUE } else { Code::CHANGED };
    let mut reply = Message::new(Type::Ack, code, req.id, req.token);
    reply.set_block1(Block::new(512, expect_num, b.more()));
    let bytes = reply.try_into_bytes().unwrap();
    server.handle_packet(Addrd(&bytes[..], device_addr)).unwrap();
  }

  // every byte crossed exactly once and the callback saw only the final code
  assert_eq!(collected, body);
  assert_eq!(*results.borrow(), vec![Code::CHANGED]);
  assert!(wire.drain().is_empty());
}

#[test]
fn block2_download_with_observe() {
  let time = Rc::new(Cell::new(0));
  let (mut server, wire) = engine(&time);
  let device_addr = addr(9);
  let client = register_scripted_device(&mut server, &wire, device_addr);

  let body: Vec<u8> = (0..512u32).map(|b| (b % 13) as u8).collect();
  let seen: Rc<RefCell<Vec<(Code, Option<u32>, usize)>>> = Default::default();
  let sink = seen.clone();

  server.observe(client,
                 &Uri::resource(1024, 10, 3),
                 Box::new(move |out| {
                   sink.borrow_mut()
                       .push((out.code, out.observe, out.payload.map(|p| p.len()).unwrap_or(0)));
                 }))
        .unwrap();

  let req = wire.last_message();
  assert_eq!(req.observe(), Some(0));
  wire.drain();

  // first notification block rides the piggybacked response
  let mut resp = Message::new(Type::Ack, Code::CONTENT, req.id, req.token);
  resp.set_observe(12);
  resp.set_size2(512);
  resp.set_block2(Block::new(256, 0, true));
  resp.payload = Payload(body[..256].to_vec());
  let bytes = resp.try_into_bytes().unwrap();
  server.handle_packet(Addrd(&bytes[..], device_addr)).unwrap();

  // the engine fetches the rest without re-registering the observation
  let follow_up = wire.last_message();
  wire.drain();
  assert_eq!(follow_up.code, Code::GET);
  assert_eq!(follow_up.observe(), None);
  let b = follow_up.block2().unwrap();
  assert_eq!((b.num(), b.more(), b.size()), (1, false, 256));

  let mut last = Message::new(Type::Ack, Code::CONTENT, follow_up.id, follow_up.token);
  last.set_block2(Block::new(256, 1, false));
  last.payload = Payload(body[256..].to_vec());
  let bytes = last.try_into_bytes().unwrap();
  server.handle_packet(Addrd(&bytes[..], device_addr)).unwrap();

  // one delivery: the assembled 512 bytes with the observe value restored
  assert_eq!(*seen.borrow(), vec![(Code::CONTENT, Some(12), 512)]);
}

#[test]
fn retransmission_exhaustion() {
  let time = Rc::new(Cell::new(0));
  let (mut server, wire) = engine(&time);
  let client = register_scripted_device(&mut server, &wire, addr(9));

  let results: Rc<RefCell<Vec<(Code, bool)>>> = Default::default();
  let sink = results.clone();
  server.dm_read(client,
                 &Uri::resource(3, 0, 0),
                 Box::new(move |out| {
                   sink.borrow_mut().push((out.code, out.payload.is_none()));
                 }))
        .unwrap();
  assert_eq!(wire.drain().len(), 1);

  let mut sends_at = Vec::new();
  for millis in [1_999, 2_000, 5_999, 6_000, 13_999, 14_000, 29_999, 30_000] {
    time.set(millis);
    let mut timeout = Timeout::Never;
    server.step(&mut timeout).unwrap();
    for _ in wire.drain() {
      sends_at.push(millis);
    }
  }

  // retransmits at 2, 6 and 14 seconds; nothing in between or after
  assert_eq!(sends_at, vec![2_000, 6_000, 14_000]);

  // the fifth deadline reported the timeout exactly once
  assert_eq!(*results.borrow(), vec![(Code::SERVICE_UNAVAILABLE, true)]);

  time.set(120_000);
  let mut timeout = Timeout::Never;
  server.step(&mut timeout).unwrap();
  assert!(wire.drain().is_empty());
  assert_eq!(results.borrow().len(), 1);
}

#[test]
fn unauthorized_after_exhausted_retries_gets_one_more_attempt() {
  let time = Rc::new(Cell::new(0));
  let (mut server, wire) = engine(&time);
  let client = register_scripted_device(&mut server, &wire, addr(9));

  let results: Rc<RefCell<Vec<Code>>> = Default::default();
  let sink = results.clone();
  server.dm_read(client,
                 &Uri::resource(3, 0, 0),
                 Box::new(move |out| sink.borrow_mut().push(out.code)))
        .unwrap();
  let req = wire.last_message();
  wire.drain();

  // ride out every regular retransmit
  for millis in [2_000, 6_000, 14_000] {
    time.set(millis);
    let mut timeout = Timeout::Never;
    server.step(&mut timeout).unwrap();
  }
  assert_eq!(wire.drain().len(), 3);

  // the registration race: a late 4.01 instead of the real answer
  let denied = Message::new(Type::Ack, Code::UNAUTHORIZED, req.id, req.token);
  let bytes = denied.try_into_bytes().unwrap();
  server.handle_packet(Addrd(&bytes[..], addr(9))).unwrap();

  // no callback yet; the dialog gets one more deadline
  assert!(results.borrow().is_empty());

  time.set(16_000);
  let mut timeout = Timeout::Never;
  server.step(&mut timeout).unwrap();
  let resent = wire.drain();
  assert_eq!(resent.len(), 1);
  let resent = Message::try_from_bytes(resent[0].data()).unwrap();
  assert_eq!(resent.id, req.id);

  // this time the peer lets us in
  let mut ok = Message::new(Type::Ack, Code::CONTENT, req.id, req.token);
  ok.payload = Payload(b"Nordic".to_vec());
  let bytes = ok.try_into_bytes().unwrap();
  server.handle_packet(Addrd(&bytes[..], addr(9))).unwrap();

  assert_eq!(*results.borrow(), vec![Code::CONTENT]);
}

#[test]
fn step_narrows_timeout_to_next_deadline() {
  let time = Rc::new(Cell::new(0));
  let (mut server, wire) = engine(&time);
  let client = register_scripted_device(&mut server, &wire, addr(9));

  server.dm_read(client, &Uri::resource(3, 0, 0), Box::new(|_| {}))
        .unwrap();
  wire.drain();

  let mut timeout = Timeout::Never;
  server.step(&mut timeout).unwrap();
  assert_eq!(timeout, Timeout::Millis(2_000));

  time.set(500);
  let mut timeout = Timeout::Never;
  server.step(&mut timeout).unwrap();
  assert_eq!(timeout, Timeout::Millis(1_500));
}

#[test]
fn blockwise_upload_between_two_engines_with_unequal_chunk_sizes() {
  let time = Rc::new(Cell::new(0));
  let (mut server, server_wire) = engine(&time);

  let mut device_config = loam::config::Config::default();
  device_config.block.max_chunk_size = 512;
  let (mut device, device_wire) = engine_config(&time, device_config);

  let (server_addr, device_addr) = (addr(1), addr(2));
  let store = DeviceStore::default();
  device.set_endpoint_name("urn:dev:5678");
  device.set_object_store(Box::new(store.clone()));
  let sid = device.add_server(server_addr);

  device.register(sid, &[Uri::object(1024)], None).unwrap();
  settle((&device_wire, device_addr, &mut device),
         (&server_wire, server_addr, &mut server));
  let client = server.clients()[0].id;

  let body: Vec<u8> = (0..2000u32).map(|b| (b % 241) as u8).collect();
  let results: Rc<RefCell<Vec<Code>>> = Default::default();
  let sink = results.clone();

  server.dm_write(client,
                  &Uri::resource(1024, 5, 3),
                  &body,
                  Box::new(move |out| sink.borrow_mut().push(out.code)))
        .unwrap();

  settle((&server_wire, server_addr, &mut server),
         (&device_wire, device_addr, &mut device));

  // the device clamped us down to 512 mid-stream; the payload still arrived
  // byte-identical and the callback fired exactly once
  assert_eq!(store.written.borrow().as_deref(), Some(&body[..]));
  assert_eq!(*results.borrow(), vec![Code::CHANGED]);
}
