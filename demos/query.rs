//! Queries a name through the daemon and prints what comes back.
//!
//! Run with:
//!
//! ```text
//! cargo run --example query [name] [type]
//! ```
//!
//! Example:
//!
//! ```text
//! cargo run --example query _http._tcp.local PTR
//! ```
//!
//! Set `RUST_LOG=debug` to see the logs of the client.

use mdns_client::{MdnsDaemon, QueryEvent, QuerySource, RRType, TransactionMode};
use std::time::Duration;

fn main() {
    env_logger::builder().format_timestamp_millis().init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "_http._tcp.local".to_string());
    let rr_type = match args.next().as_deref() {
        None | Some("PTR") => RRType::PTR,
        Some("A") => RRType::A,
        Some("AAAA") => RRType::AAAA,
        Some("SRV") => RRType::SRV,
        Some("TXT") => RRType::TXT,
        Some("CNAME") => RRType::CNAME,
        Some(other) => {
            println!("unsupported type: {}", other);
            return;
        }
    };

    // Create a daemon
    let mdns = MdnsDaemon::new().expect("Failed to create daemon");

    let mode = TransactionMode::multi(QuerySource::CacheAndNetwork)
        .with_timeout(Duration::from_secs(5));
    let receiver = mdns.query(&name, rr_type, mode).expect("Failed to query");

    let now = std::time::Instant::now();
    while let Ok(event) = receiver.recv() {
        match event {
            QueryEvent::Record(record) => {
                println!(
                    "At {:?}: {} {} ttl {}: {}",
                    now.elapsed(),
                    record.rr_type(),
                    record.name(),
                    record.ttl(),
                    record.rdata()
                );
            }
            QueryEvent::Done => {
                println!("At {:?}: done", now.elapsed());
            }
            other_event => {
                println!("At {:?}: {:?}", now.elapsed(), &other_event);
            }
        }
    }

    mdns.shutdown().unwrap();
}
