//! A minimal managed device: registers with a management server on
//! localhost and serves reads of `/3/0/0`.
//!
//! ```sh
//! cargo run --example device
//! ```

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::Duration;

use loam::net::Addrd;
use loam::object::ObjectStore;
use loam::uri::Uri;
use loam::{Context, Timeout};
use loam_msg::Code;

struct Device {
  manufacturer: Vec<u8>,
}

impl ObjectStore for Device {
  fn read(&mut self, uri: &Uri) -> Result<Vec<u8>, Code> {
    match (uri.object, uri.resource) {
      | (Some(3), Some(0)) | (Some(3), None) => Ok(self.manufacturer.clone()),
      | _ => Err(Code::NOT_FOUND),
    }
  }

  fn write(&mut self, _uri: &Uri, _value: &[u8]) -> Code {
    Code::METHOD_NOT_ALLOWED
  }

  fn execute(&mut self, _uri: &Uri, _args: &[u8]) -> Code {
    Code::METHOD_NOT_ALLOWED
  }

  fn create(&mut self, _uri: &Uri, _value: &[u8]) -> Result<u16, Code> {
    Err(Code::METHOD_NOT_ALLOWED)
  }

  fn delete(&mut self, _uri: &Uri) -> Code {
    Code::METHOD_NOT_ALLOWED
  }

  fn write_attributes(&mut self, _uri: &Uri, _query: &str) -> Code {
    Code::METHOD_NOT_ALLOWED
  }

  fn is_instance_new(&mut self, _object: u16, _instance: u16) -> bool {
    false
  }
}

fn main() -> std::io::Result<()> {
  simple_logger::SimpleLogger::new().init().unwrap();

  let socket = UdpSocket::bind("0.0.0.0:56830")?;
  socket.set_nonblocking(true)?;

  let mut ctx = Context::new(loam::std::Clock::new(), socket.try_clone()?);
  ctx.set_endpoint_name("urn:dev:os:loam-demo");
  ctx.set_object_store(Box::new(Device { manufacturer: b"Nordic".to_vec() }));

  let server = ctx.add_server("127.0.0.1:5683".parse().unwrap());
  ctx.register(server, &[Uri::instance(3, 0)], None).ok();

  let mut buf = [0u8; 1152];
  loop {
    let mut timeout = Timeout::Millis(1_000);
    ctx.step(&mut timeout).ok();

    match socket.recv_from(&mut buf) {
      | Ok((n, peer)) => {
        let session = peer.to_string().parse().expect("socket addresses round-trip");
        ctx.handle_packet(Addrd(&buf[..n], session)).ok();
      },
      | Err(e) if e.kind() == ErrorKind::WouldBlock => {
        let millis = match timeout {
          | Timeout::Millis(ms) => ms.min(1_000),
          | Timeout::Never => 1_000,
        };
        std::thread::sleep(Duration::from_millis(millis.max(10)));
      },
      | Err(e) => return Err(e),
    }
  }
}
