use mdns_client::{
    DaemonStatus, Error, MdnsDaemon, QueryEvent, QuerySource, RRType, TransactionMode,
};
use std::time::Duration;
use test_log::test;

#[test]
fn test_status_and_shutdown() {
    let d = MdnsDaemon::new().expect("Failed to create daemon");

    let status = d.status().unwrap().recv_timeout(Duration::from_secs(1));
    assert_eq!(status, Ok(DaemonStatus::Running));

    let shutdown = d.shutdown().unwrap();
    let status = shutdown.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(status, DaemonStatus::Shutdown);

    // The daemon thread is gone; give it a moment to drop its receiver.
    std::thread::sleep(Duration::from_millis(100));
    let status = d.status().unwrap().recv_timeout(Duration::from_secs(1));
    assert_eq!(status, Ok(DaemonStatus::Shutdown));
}

#[test]
fn test_cache_only_query_without_network() {
    let d = MdnsDaemon::new().expect("Failed to create daemon");

    let mode = TransactionMode::single(QuerySource::CacheOnly);
    let receiver = d.query("nothing-here.local", RRType::A, mode).unwrap();
    let event = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event, QueryEvent::NoResults);

    // The channel closes after a final event.
    assert!(receiver.recv_timeout(Duration::from_secs(1)).is_err());

    d.shutdown().unwrap();
}

#[test]
fn test_invalid_name_is_rejected() {
    let d = MdnsDaemon::new().expect("Failed to create daemon");

    let long_label = "a".repeat(64);
    let result = d.listen(&format!("{}.local", long_label), RRType::A);
    assert!(matches!(result, Err(Error::Msg(_))));

    d.shutdown().unwrap();
}

#[test]
fn test_stop_query_closes_channel() {
    let d = MdnsDaemon::new().expect("Failed to create daemon");

    let mode = TransactionMode::multi(QuerySource::CacheOnly);
    let done = d.query("_stop._tcp.local", RRType::PTR, mode).unwrap();
    assert_eq!(done.recv_timeout(Duration::from_secs(1)), Ok(QueryEvent::Done));

    let mode = TransactionMode::multi(QuerySource::Network);
    let receiver = d.query("_stop._tcp.local", RRType::PTR, mode).unwrap();
    d.stop_query("_stop._tcp.local", RRType::PTR).unwrap();

    // Either the query is stopped, or it failed to open sockets; the
    // channel closes both ways.
    loop {
        match receiver.recv_timeout(Duration::from_secs(2)) {
            Ok(QueryEvent::Failed(_)) | Ok(QueryEvent::Record(_)) => continue,
            Ok(other) => panic!("unexpected event: {:?}", other),
            Err(e) => {
                assert_eq!(e, flume::RecvTimeoutError::Disconnected);
                break;
            }
        }
    }

    d.shutdown().unwrap();
}
