//! A dual-role LwM2M device-management engine over CoAP (RFC 7252).
//!
//! One [`Context`] can play either side of the management relationship:
//!
//! - **device (client role)**: attach an [`ObjectStore`](object::ObjectStore),
//!   [`register`](Context::register) with a management server, answer the
//!   read/write/execute/create/delete traffic it sends, and push observation
//!   notifications when [`resource_value_changed`](Context::resource_value_changed)
//!   says a value moved.
//! - **management console (server role)**: accept registrations on `/rd`,
//!   then drive devices with the `dm_*` operations and
//!   [`observe`](Context::observe).
//!
//! Underneath both roles sit the same three machines: a CoAP transaction
//! table (retransmission, token correlation, exactly-once callbacks), a
//! blockwise engine (Block1/Block2 segmentation with mid-flight size
//! negotiation), and the request dispatcher tying them together.
//!
//! ## The engine is passive
//! It opens no sockets and owns no threads. Feed it received datagrams with
//! [`Context::handle_packet`] and time with [`Context::step`]; it emits
//! bytes through the [`Transport`](net::Transport) you give it and results
//! through callbacks, always synchronously. `step` narrows a [`Timeout`]
//! to the next deadline so your poll loop can sleep exactly long enough.
//!
//! Message parsing & serialization live in the sibling crate
//! [`loam_msg`](msg).

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(not(test), forbid(unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code))]
#![deny(missing_docs)]

extern crate alloc as std_alloc;

pub use loam_msg as msg;

/// Blockwise transfer bookkeeping
mod blockwise;

/// The offset-addressed byte accumulator shared by both blockwise directions
pub mod buffer;

/// Runtime configuration
pub mod config;

/// The engine context, step driver and error types
pub mod core;

/// Inbound packet dispatch
mod dispatch;

/// Device management: inbound routing (client role) and the `dm_*`
/// operations (server role)
mod dm;

mod logging;

/// Addressed datagrams & the outbound transport contract
pub mod net;

/// The object-store contract the client role delegates to
pub mod object;

/// Observations (server role) and watchers (client role)
mod observe;

/// Peer records: registered clients and known servers
pub mod peer;

/// Registration: the `/rd` interface (server role) and
/// register/update/deregister (client role)
mod registration;

/// Retransmission timers & strategies
pub mod retry;

/// `std` glue: a wall clock and a UDP transport
#[cfg(feature = "std")]
pub mod std;

/// Clocks, durations and timeout horizons
pub mod time;

/// The transaction table
mod transaction;

/// Structured LwM2M paths
pub mod uri;


#[doc(inline)]
pub use crate::core::{Context, Error, TransferError};
#[doc(inline)]
pub use crate::net::{Addrd, Transport};
#[doc(inline)]
pub use crate::object::ObjectStore;
#[doc(inline)]
pub use crate::registration::MonitorHandler;
#[doc(inline)]
pub use crate::time::Timeout;
#[doc(inline)]
pub use crate::transaction::{Outcome, ResultHandler};
#[doc(inline)]
pub use crate::uri::{Uri, UriKind};
