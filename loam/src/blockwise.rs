use embedded_time::Instant;
use no_std_net::SocketAddr;
use std_alloc::vec::Vec;
use tinyvec::ArrayVec;

use loam_msg::{Block, Code, Message, Payload};

use crate::buffer::{AppendError, LargeBuffer};
use crate::time::{millis_between, Clock};
use crate::uri::Uri;

/// One in-flight blockwise transfer.
///
/// `session = Some(_)` marks a request accumulator, owned by the uploading
/// peer; `session = None` marks a cached segmented response, shared by every
/// peer retrieving the same resource.
#[derive(Debug, Clone)]
pub(crate) struct Entry<C: Clock> {
  pub(crate) uri: Uri,
  pub(crate) method: Code,
  pub(crate) session: Option<SocketAddr>,
  pub(crate) buffer: LargeBuffer,
  pub(crate) etag: ArrayVec<[u8; 8]>,
  pub(crate) touched: Instant<C>,
}

/// The collection of in-flight blockwise transfers.
///
/// At most one entry exists per (session, method, uri) for accumulators and
/// per (method, uri) for cached responses; [`Ledger::position`] is an exact
/// match on those keys.
#[derive(Debug)]
pub(crate) struct Ledger<C: Clock> {
  entries: Vec<Entry<C>>,
  #[cfg(feature = "etag")]
  etag_counter: u16,
}

impl<C: Clock> Default for Ledger<C> {
  fn default() -> Self {
    Self { entries: Vec::new(),
           #[cfg(feature = "etag")]
           etag_counter: 0 }
  }
}

impl<C: Clock> Ledger<C> {
  pub(crate) fn position(&self,
                         session: Option<SocketAddr>,
                         method: Code,
                         uri: &Uri)
                         -> Option<usize> {
    self.entries
        .iter()
        .position(|e| e.method == method && e.session == session && e.uri == *uri)
  }

  pub(crate) fn get(&self, ix: usize) -> &Entry<C> {
    &self.entries[ix]
  }

  /// Start accumulating a Block1 upload, seeded with the first segment.
  pub(crate) fn insert_accumulator(&mut self,
                                   session: SocketAddr,
                                   method: Code,
                                   uri: &Uri,
                                   msg: &Message,
                                   now: Instant<C>)
                                   -> Result<usize, AppendError> {
    let size_hint = msg.size1().unwrap_or(0) as usize;
    let buffer = LargeBuffer::new(size_hint, msg.payload.as_bytes())?;

    let mut etag: ArrayVec<[u8; 8]> = ArrayVec::new();
    if let Some(tag) = msg.etag() {
      etag.extend_from_slice(&tag[..tag.len().min(8)]);
    }

    log::debug!("blockwise: new {}b accumulator for {}", buffer.len(), uri);
    self.entries.push(Entry { uri: *uri,
                              method,
                              session: Some(session),
                              buffer,
                              etag,
                              touched: now });
    Ok(self.entries.len() - 1)
  }

  /// Cache a rendered response that must be served in blocks, taking
  /// ownership of the payload.
  pub(crate) fn insert_response(&mut self,
                                method: Code,
                                uri: &Uri,
                                payload: Vec<u8>,
                                etag: Option<&[u8]>,
                                now: Instant<C>)
                                -> usize {
    let mut tag: ArrayVec<[u8; 8]> = ArrayVec::new();
    if let Some(t) = etag {
      tag.extend_from_slice(&t[..t.len().min(8)]);
    }

    #[cfg(feature = "etag")]
    if tag.is_empty() {
      tag = self.generate_etag(now);
    }

    log::debug!("blockwise: caching {}b response for {}", payload.len(), uri);
    self.entries.push(Entry { uri: *uri,
                              method,
                              session: None,
                              buffer: LargeBuffer::from_vec(payload),
                              etag: tag,
                              touched: now });
    self.entries.len() - 1
  }

  /// Append one received segment at its block offset.
  pub(crate) fn append(&mut self,
                       ix: usize,
                       offset: usize,
                       msg: &Message,
                       now: Instant<C>)
                       -> Result<(), AppendError> {
    let entry = &mut self.entries[ix];
    entry.touched = now;
    entry.buffer.append(offset, msg.payload.as_bytes())
  }

  /// Write block `block_num` of entry `ix` into `resp`: the payload slice,
  /// Block2, Size2 on the first block, and the stored ETag if any.
  pub(crate) fn prepare(&mut self,
                        ix: usize,
                        block_num: u32,
                        block_size: u16,
                        resp: &mut Message,
                        now: Instant<C>) {
    let entry = &mut self.entries[ix];
    let total = entry.buffer.len();
    let offset = (block_num as usize * block_size as usize).min(total);
    let len = (total - offset).min(block_size as usize);
    let more = offset + len < total;

    if block_num == 0 {
      resp.set_size2(total as u32);
    }
    resp.set_block2(Block::new(block_size, block_num, more));
    if !entry.etag.is_empty() {
      resp.set_etag(&entry.etag);
    }
    resp.payload = Payload(entry.buffer.as_bytes()[offset..offset + len].to_vec());
    entry.touched = now;

    log::trace!("blockwise: prepared block {} of {} ({}b, {})",
                block_num,
                entry.uri,
                len,
                if more { "more..." } else { "last" });
  }

  pub(crate) fn remove(&mut self, ix: usize) -> Entry<C> {
    self.entries.remove(ix)
  }

  /// Drop every entry whose uri is within `uri`.
  pub(crate) fn remove_matching(&mut self, uri: &Uri) {
    self.entries.retain(|e| !uri.matches(&e.uri));
  }

  /// Evict entries untouched for longer than their timeout: `max_age` for
  /// cached responses, twice that for accumulators tied to a live peer.
  pub(crate) fn sweep(&mut self, now: Instant<C>, max_age_millis: u64) {
    self.entries.retain(|e| {
                  let timeout = match e.session {
                    | Some(_) => max_age_millis * 2,
                    | None => max_age_millis,
                  };
                  let keep = millis_between(now, e.touched) <= timeout;
                  if !keep {
                    log::debug!("blockwise: evicting {}b for {}", e.buffer.len(), e.uri);
                  }
                  keep
                });
  }

  /// Milliseconds until the next eviction is due, if any entries live.
  pub(crate) fn next_expiry_in(&self, now: Instant<C>, max_age_millis: u64) -> Option<u64> {
    self.entries
        .iter()
        .map(|e| {
          let timeout = match e.session {
            | Some(_) => max_age_millis * 2,
            | None => max_age_millis,
          };
          timeout.saturating_sub(millis_between(now, e.touched))
        })
        .min()
  }

  #[cfg(feature = "etag")]
  fn generate_etag(&mut self, now: Instant<C>) -> ArrayVec<[u8; 8]> {
    self.etag_counter = self.etag_counter.wrapping_add(1);
    let secs = (millis_between(now, Instant::new(0)) / 1000) as u32;

    let mut tag: ArrayVec<[u8; 8]> = ArrayVec::new();
    tag.extend_from_slice(&secs.to_be_bytes());
    tag.extend_from_slice(&self.etag_counter.to_be_bytes());
    tag
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::Clock as _;
  use loam_msg::{Id, Token, Type};

  use super::*;
  use crate::test::TestClock;

  fn msg_with_payload(bytes: &[u8]) -> Message {
    let mut msg = Message::new(Type::Con, Code::PUT, Id(1), Token(Default::default()));
    msg.payload = Payload(bytes.to_vec());
    msg
  }

  fn addr() -> SocketAddr {
    crate::test::addr(1)
  }

  #[test]
  fn accumulators_are_keyed_per_session_method_uri() {
    let (clock, _) = TestClock::new();
    let now = clock.try_now().unwrap();
    let mut ledger = Ledger::<TestClock>::default();
    let uri = Uri::resource(1024, 5, 3);

    let msg = msg_with_payload(&[1; 16]);
    ledger.insert_accumulator(addr(), Code::PUT, &uri, &msg, now)
          .unwrap();

    assert!(ledger.position(Some(addr()), Code::PUT, &uri).is_some());
    assert!(ledger.position(Some(crate::test::addr(2)), Code::PUT, &uri)
                  .is_none());
    assert!(ledger.position(Some(addr()), Code::POST, &uri).is_none());
    assert!(ledger.position(None, Code::PUT, &uri).is_none());
  }

  #[test]
  fn response_cache_is_shared() {
    let (clock, _) = TestClock::new();
    let now = clock.try_now().unwrap();
    let mut ledger = Ledger::<TestClock>::default();
    let uri = Uri::resource(1024, 7, 3);

    let ix = ledger.insert_response(Code::GET, &uri, vec![9; 4096], None, now);
    assert_eq!(ledger.position(None, Code::GET, &uri), Some(ix));

    let mut resp = Message::new(Type::Ack, Code::CONTENT, Id(2), Token(Default::default()));
    ledger.prepare(ix, 0, 1024, &mut resp, now);
    assert_eq!(resp.size2(), Some(4096));
    assert_eq!(resp.payload.len(), 1024);
    let b = resp.block2().unwrap();
    assert_eq!((b.num(), b.more()), (0, true));

    let mut resp = Message::new(Type::Ack, Code::CONTENT, Id(3), Token(Default::default()));
    ledger.prepare(ix, 3, 1024, &mut resp, now);
    assert_eq!(resp.size2(), None);
    let b = resp.block2().unwrap();
    assert_eq!((b.num(), b.more()), (3, false));
  }

  #[test]
  fn sweep_uses_doubled_timeout_for_accumulators() {
    let (clock, time) = TestClock::new();
    let mut ledger = Ledger::<TestClock>::default();
    let uri_up = Uri::resource(1024, 5, 3);
    let uri_down = Uri::resource(1024, 7, 3);

    let now = clock.try_now().unwrap();
    ledger.insert_accumulator(addr(), Code::PUT, &uri_up, &msg_with_payload(&[1; 4]), now)
          .unwrap();
    ledger.insert_response(Code::GET, &uri_down, vec![2; 4], None, now);

    time.set(60_001);
    ledger.sweep(clock.try_now().unwrap(), 60_000);
    assert!(ledger.position(None, Code::GET, &uri_down).is_none());
    assert!(ledger.position(Some(addr()), Code::PUT, &uri_up).is_some());

    time.set(120_001);
    ledger.sweep(clock.try_now().unwrap(), 60_000);
    assert!(ledger.position(Some(addr()), Code::PUT, &uri_up).is_none());
  }

  #[test]
  fn remove_matching_is_prefix_wise() {
    let (clock, _) = TestClock::new();
    let now = clock.try_now().unwrap();
    let mut ledger = Ledger::<TestClock>::default();

    ledger.insert_response(Code::GET, &Uri::resource(3, 0, 1), vec![1; 4], None, now);
    ledger.insert_response(Code::GET, &Uri::resource(3, 0, 2), vec![2; 4], None, now);
    ledger.insert_response(Code::GET, &Uri::resource(4, 0, 1), vec![3; 4], None, now);

    ledger.remove_matching(&Uri::object(3));
    assert!(ledger.position(None, Code::GET, &Uri::resource(3, 0, 1)).is_none());
    assert!(ledger.position(None, Code::GET, &Uri::resource(3, 0, 2)).is_none());
    assert!(ledger.position(None, Code::GET, &Uri::resource(4, 0, 1)).is_some());
  }
}
