//! A small and safe multicast DNS (mDNS) client.
//!
//! The client resolves names and discovers records on the local link by
//! sending and receiving multicast DNS packets, with no unicast DNS server
//! involved. It keeps a cache of the records it hears and tells its users
//! about every change through listeners and transactions.
//!
//! The engine is single threaded: everything runs on one [`Scheduler`],
//! e.g. the [`EventLoop`] of this crate. For callers on other threads or in
//! async code, [`MdnsDaemon`] runs the engine on its own thread and talks to
//! it through [`flume`](https://crates.io/crates/flume) channels, which
//! support both `recv()` and `recv_async()`.
//!
//! For example, a query through the daemon behaves like this:
//!```text
//!  Caller       <channel>       mDNS client thread
//!    |                             | starts its run-loop.
//!    |       --- Query -->         |
//!    |                             | serves the cache
//!    |                             | sends a query
//!    |                             | receives a response
//!    |       <-- Record --         |
//!    |                             | (channel closed)
//!```
//! All commands in the public API are sent to the daemon using the unblocking `try_send()`
//! so that the caller can use it with both sync and async code, with no dependency on any
//! particular async runtimes.
//!
//! # Usage
//!
//! ## Example: querying through the daemon.
//!
//! ```no_run
//! use mdns_client::{MdnsDaemon, QueryEvent, QuerySource, RRType, TransactionMode};
//!
//! // Create a daemon
//! let mdns = MdnsDaemon::new().expect("Failed to create daemon");
//!
//! // Look up the instances of a service type.
//! let mode = TransactionMode::multi(QuerySource::CacheAndNetwork)
//!     .with_timeout(std::time::Duration::from_secs(3));
//! let receiver = mdns
//!     .query("_http._tcp.local", RRType::PTR, mode)
//!     .expect("Failed to query");
//!
//! while let Ok(event) = receiver.recv() {
//!     match event {
//!         QueryEvent::Record(record) => println!("Found: {}", record.rdata()),
//!         other_event => println!("Received other event: {:?}", &other_event),
//!     }
//! }
//! ```
//!
//! ## Example: listening on the current thread.
//!
//! ```no_run
//! use mdns_client::{EventLoop, ListenerDelegate, MdnsClient, ParsedRecord, RRType, UpdateType};
//! use std::rc::Rc;
//!
//! struct Printer;
//!
//! impl ListenerDelegate for Printer {
//!     fn on_record_update(&mut self, update: UpdateType, record: &ParsedRecord) {
//!         println!("{:?}: {} {}", update, record.name(), record.rdata());
//!     }
//!
//!     fn on_nsec_record(&mut self, name: &str, rr_type: RRType) {
//!         println!("{} has no {} record", name, rr_type);
//!     }
//! }
//!
//! let event_loop = EventLoop::new().unwrap();
//! let client = MdnsClient::new(event_loop.timers(), Rc::new(event_loop.socket_factory(true)));
//! let mut listener = client.create_listener(RRType::A, "my-printer.local", Printer);
//! listener.start().unwrap();
//!
//! loop {
//!     event_loop.run_once(None).unwrap();
//! }
//! ```
//!
//! # Limitations
//!
//! This implementation is based on the following RFCs:
//! - mDNS:   [RFC 6762](https://tools.ietf.org/html/rfc6762)
//! - DNS:    [RFC 1035](https://tools.ietf.org/html/rfc1035)
//! - NSEC:   [RFC 4034](https://tools.ietf.org/html/rfc4034)
//!
//! It is a client only: it never answers queries nor publishes records,
//! and it does not fall back to unicast DNS.

#![forbid(unsafe_code)]

// In mDNS, the basic data structure is the "Resource Record" (RR). The client
// keeps at most one record per (name, type) in its cache, and users subscribe
// to such keys:
//
// - A listener gets every Added / Changed / Removed update of its key.
// - A transaction serves the cache and/or queries the network, and completes
//   with the first result (single mode) or keeps reporting (multi mode).
//
// Names are compared in their canonical form: trailing dot trimmed and ASCII
// lowercased.

/// A simple macro to report all kinds of errors.
macro_rules! e_fmt {
  ($($arg:tt)+) => {
      Error::Msg(format!($($arg)+))
  };
}

#[cfg(feature = "logging")]
pub(crate) use log;

/// No-op logging macros when the `logging` feature is off.
#[cfg(not(feature = "logging"))]
#[macro_use]
pub(crate) mod log {
    macro_rules! trace {
        ($($arg:expr),*) => {
            { let _ = ($(&$arg),*); }
        };
    }

    macro_rules! debug {
        ($($arg:expr),*) => {
            { let _ = ($(&$arg),*); }
        };
    }
}

mod client;
mod config;
mod connection;
mod daemon;
mod dns_cache;
mod dns_parser;
mod error;
mod event_loop;
mod listener;
mod mdns_core;
mod record_rdata;
mod scheduler;

#[cfg(test)]
mod test_util;

pub use client::MdnsClient;
pub use config::{MdnsConfig, SendPolicy, TRANSACTION_TIMEOUT_DEFAULT};
pub use connection::{
    Connection, ConnectionDelegate, ConnectionState, DatagramSocket, IpVersion, ReadableCallback,
    SocketFactory, GROUP_ADDR_V4, GROUP_ADDR_V6, MDNS_PORT,
};
pub use daemon::{DaemonStatus, ListenerEvent, MdnsDaemon, QueryEvent};
pub use dns_cache::CacheUpdate;
pub use dns_parser::{
    DnsHeader, DnsOutgoing, DnsRecordParser, RRType, ResourceRecord, CLASS_IN, FLAGS_AA,
    FLAGS_QR_QUERY, FLAGS_QR_RESPONSE, MAX_MSG_ABSOLUTE,
};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, MioSocketFactory};
pub use listener::{
    ListenerDelegate, ListenerState, MdnsListener, MdnsTransaction, QuerySource, ResultMode,
    TransactionMode, TransactionResult, TransactionState, UpdateType,
};
pub use record_rdata::{NsecRdata, ParsedRecord, RecordRdata, SrvRdata};
pub use scheduler::{current_time_millis, Scheduler, TaskId, TimerQueue};

/// Re-export from `flume`.
pub use flume::Receiver;
