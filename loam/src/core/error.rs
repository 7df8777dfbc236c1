use loam_msg::to_bytes::MessageToBytesError;
use loam_msg::Code;

/// An error encounterable from within the engine.
///
/// `E` is the transport's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
  /// The transport refused to put bytes on the wire.
  ///
  /// The current send is aborted; for confirmable traffic the transaction
  /// layer will retry at its next deadline.
  Send(E),

  /// Serializing a message to bytes failed
  ToBytes(MessageToBytesError),

  /// The operation was refused before anything hit the wire
  /// (e.g. `4.04` for an unknown client id, `4.00` for an illegal URI form).
  Status(Code),

  /// A peer identifier no longer resolves to a live peer record
  UnknownPeer,
}

/// Engine-internal reasons a transfer went sideways, tagged on the
/// transaction and reported to its callback alongside the response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
  /// The peer answered a Block1-segmented request without echoing Block1
  Block1Ignored,
  /// The peer changed the negotiated block size somewhere other than block 0
  ChangingBlocksize,
  /// A single received block exceeded the configured chunk limit
  ChunkTooLarge,
  /// A Block2 body arrived with a hole in it
  ResponseIncomplete,
  /// An accumulator could not grow to hold the transfer
  OutOfMemory,
}
