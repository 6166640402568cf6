//! The multicast connection: one IPv4 and one IPv6 socket behind a single
//! delegate.
//!
//! Sockets come from a [SocketFactory] so that the connection never deals
//! with platform socket options itself. Reads are driven by readiness
//! callbacks from the host; the connection reads one datagram per callback.

#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::{
    config::SendPolicy,
    dns_parser::MAX_MSG_ABSOLUTE,
    error::{Error, Result},
};
use std::{
    cell::{Cell, RefCell},
    fmt, io, mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    rc::{Rc, Weak},
};

/// The mDNS port, RFC 6762 section 3.
pub const MDNS_PORT: u16 = 5353;

/// The IPv4 mDNS group.
pub const GROUP_ADDR_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The IPv6 link-local mDNS group.
pub const GROUP_ADDR_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Enum to represent the IP version.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// The mDNS group address of this family.
    pub fn group_addr(self) -> IpAddr {
        match self {
            IpVersion::V4 => IpAddr::V4(GROUP_ADDR_V4),
            IpVersion::V6 => IpAddr::V6(GROUP_ADDR_V6),
        }
    }

    /// The wildcard address a socket of this family binds to.
    pub fn bind_addr(self) -> SocketAddr {
        match self {
            IpVersion::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MDNS_PORT),
            IpVersion::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), MDNS_PORT),
        }
    }

    /// Where queries of this family are sent.
    pub fn multicast_addr(self) -> SocketAddr {
        SocketAddr::new(self.group_addr(), MDNS_PORT)
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// Called by the host when a socket may have data. Returns true if a
/// datagram was consumed and the callback should be called again.
pub type ReadableCallback = Box<dyn FnMut() -> bool>;

/// A bindable, multicast-capable datagram socket.
pub trait DatagramSocket {
    fn bind(&mut self, addr: SocketAddr) -> Result<()>;

    /// Joins `group` so that datagrams sent to it are received.
    fn join_multicast(&mut self, group: IpAddr) -> Result<()>;

    /// Reads one datagram. `WouldBlock` means nothing is waiting.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Asks the host to call `on_readable` whenever the socket becomes readable,
    /// until the socket is dropped.
    fn watch_readable(&mut self, on_readable: ReadableCallback) -> Result<()>;
}

/// Creates sockets for a [Connection].
pub trait SocketFactory {
    fn create_socket(&self, version: IpVersion) -> Result<Box<dyn DatagramSocket>>;
}

/// Receives what a [Connection] reads.
pub trait ConnectionDelegate {
    fn handle_packet(&self, packet: &[u8], source: SocketAddr);

    /// Called at most once. The connection has closed every socket by then.
    fn on_connection_error(&self, error: Error);
}

/// Connection states. `Error` and `Closed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Bound,
    Listening,
    Error,
    Closed,
}

struct SocketHandler {
    version: IpVersion,
    socket: Box<dyn DatagramSocket>,
}

struct ConnectionShared {
    state: Cell<ConnectionState>,
    handlers: RefCell<Vec<SocketHandler>>,
    delegate: Weak<dyn ConnectionDelegate>,
}

/// One socket per IP family, bound to the mDNS port and joined to its group.
pub struct Connection {
    shared: Rc<ConnectionShared>,
    ip_versions: Vec<IpVersion>,
    send_policy: SendPolicy,
    require_all_families: bool,
}

impl Connection {
    pub fn new(
        delegate: Weak<dyn ConnectionDelegate>,
        ip_versions: Vec<IpVersion>,
        send_policy: SendPolicy,
        require_all_families: bool,
    ) -> Self {
        Self {
            shared: Rc::new(ConnectionShared {
                state: Cell::new(ConnectionState::Uninitialized),
                handlers: RefCell::new(Vec::new()),
                delegate,
            }),
            ip_versions,
            send_policy,
            require_all_families,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// IP families with a working socket.
    pub fn bound_versions(&self) -> Vec<IpVersion> {
        self.shared
            .handlers
            .borrow()
            .iter()
            .map(|h| h.version)
            .collect()
    }

    /// Binds and joins on every configured family, then starts listening.
    ///
    /// A family that fails is skipped unless all families are required.
    /// Fails if no family could be bound.
    pub fn init(&self, factory: &dyn SocketFactory) -> Result<()> {
        if self.state() != ConnectionState::Uninitialized {
            return Err(Error::Msg(format!(
                "connection cannot init in state {:?}",
                self.state()
            )));
        }

        let mut handlers = Vec::new();
        let mut last_error = None;
        for version in self.ip_versions.iter() {
            match bind_socket(factory, *version) {
                Ok(socket) => handlers.push(SocketHandler {
                    version: *version,
                    socket,
                }),
                Err(e) => {
                    debug!("failed to bind mDNS socket for {}: {}", version, e);
                    if self.require_all_families {
                        self.shared.state.set(ConnectionState::Error);
                        return Err(Error::Transport(e.to_string()));
                    }
                    last_error = Some(e);
                }
            }
        }

        if handlers.is_empty() {
            self.shared.state.set(ConnectionState::Error);
            let reason = last_error.map_or_else(
                || "no IP family configured".to_string(),
                |e| e.to_string(),
            );
            return Err(Error::Transport(reason));
        }

        self.shared.state.set(ConnectionState::Bound);

        for handler in handlers.iter_mut() {
            let weak = Rc::downgrade(&self.shared);
            let version = handler.version;
            let result = handler
                .socket
                .watch_readable(Box::new(move || ConnectionShared::on_readable(&weak, version)));
            if let Err(e) = result {
                debug!("failed to watch mDNS socket for {}: {}", version, e);
                self.shared.state.set(ConnectionState::Error);
                return Err(Error::Transport(e.to_string()));
            }
        }

        *self.shared.handlers.borrow_mut() = handlers;
        self.shared.state.set(ConnectionState::Listening);
        trace!("mDNS connection listening on {:?}", self.bound_versions());
        Ok(())
    }

    /// Sends `packet` to the mDNS group per the send policy. Succeeds when at
    /// least one family sent it.
    pub fn send(&self, packet: &[u8]) -> Result<()> {
        if self.state() != ConnectionState::Listening {
            return Err(Error::Msg(format!(
                "cannot send in connection state {:?}",
                self.state()
            )));
        }

        let mut handlers = self.shared.handlers.borrow_mut();
        let targets = match self.send_policy {
            SendPolicy::AllFamilies => handlers.len(),
            SendPolicy::FirstAvailable => 1,
        };

        let mut sent = 0;
        let mut last_error = None;
        for handler in handlers.iter_mut().take(targets) {
            let addr = handler.version.multicast_addr();
            match handler.socket.send_to(packet, addr) {
                Ok(sz) => {
                    trace!("sent out {} bytes to {}", sz, addr);
                    sent += 1;
                }
                Err(e) => {
                    debug!("Failed to send to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        if sent > 0 {
            return Ok(());
        }
        Err(Error::Transport(last_error.map_or_else(
            || "no socket to send on".to_string(),
            |e| e.to_string(),
        )))
    }

    /// Closes every socket. No delegate call follows.
    pub fn close(&self) {
        self.shared.close(ConnectionState::Closed);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl ConnectionShared {
    /// Reads one datagram from the socket of `version`.
    fn on_readable(weak: &Weak<ConnectionShared>, version: IpVersion) -> bool {
        let Some(shared) = weak.upgrade() else {
            return false;
        };
        if shared.state.get() != ConnectionState::Listening {
            return false;
        }

        let mut buf = vec![0u8; MAX_MSG_ABSOLUTE];

        // If the datagram is larger than `buf`, excess bytes may or may not
        // be truncated by the socket layer depending on the platform's libc.
        // In any case, such large datagram will not be decoded properly but
        // should not crash.
        let result = {
            let mut handlers = shared.handlers.borrow_mut();
            let Some(handler) = handlers.iter_mut().find(|h| h.version == version) else {
                return false;
            };
            handler.socket.recv_from(&mut buf)
        };

        match result {
            Ok((sz, source)) => {
                trace!("received {} bytes from {}", sz, source);
                if sz > 0 {
                    buf.truncate(sz);
                    if let Some(delegate) = shared.delegate.upgrade() {
                        delegate.handle_packet(&buf, source);
                    }
                }
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => true,
            Err(e) => {
                debug!("listening socket read failed on {}: {}", version, e);
                shared.close(ConnectionState::Error);
                if let Some(delegate) = shared.delegate.upgrade() {
                    delegate.on_connection_error(Error::Transport(format!(
                        "{} socket read failed: {}",
                        version, e
                    )));
                }
                false
            }
        }
    }

    fn close(&self, state: ConnectionState) {
        match self.state.get() {
            ConnectionState::Error | ConnectionState::Closed => return,
            _ => self.state.set(state),
        }
        let handlers = mem::take(&mut *self.handlers.borrow_mut());
        drop(handlers);
    }
}

/// Creates a socket bound to the mDNS port and joined to the group of `version`.
fn bind_socket(factory: &dyn SocketFactory, version: IpVersion) -> Result<Box<dyn DatagramSocket>> {
    let mut socket = factory.create_socket(version)?;
    socket.bind(version.bind_addr())?;
    socket.join_multicast(version.group_addr())?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::{Connection, ConnectionDelegate, ConnectionState, IpVersion};
    use crate::{
        config::SendPolicy,
        error::Error,
        test_util::{FakeNetwork, FakeSocketFactory},
    };
    use std::{
        cell::RefCell,
        net::SocketAddr,
        rc::{Rc, Weak},
    };
    use test_log::test;

    #[derive(Default)]
    struct RecordingDelegate {
        packets: RefCell<Vec<Vec<u8>>>,
        errors: RefCell<Vec<Error>>,
    }

    impl ConnectionDelegate for RecordingDelegate {
        fn handle_packet(&self, packet: &[u8], _source: SocketAddr) {
            self.packets.borrow_mut().push(packet.to_vec());
        }

        fn on_connection_error(&self, error: Error) {
            self.errors.borrow_mut().push(error);
        }
    }

    fn connection(delegate: &Rc<RecordingDelegate>, policy: SendPolicy, strict: bool) -> Connection {
        let weak = Rc::downgrade(delegate);
        let weak: Weak<dyn ConnectionDelegate> = weak;
        Connection::new(weak, vec![IpVersion::V4, IpVersion::V6], policy, strict)
    }

    #[test]
    fn test_init_both_families() {
        let network = FakeNetwork::new();
        let delegate = Rc::new(RecordingDelegate::default());
        let conn = connection(&delegate, SendPolicy::AllFamilies, false);

        conn.init(&FakeSocketFactory::new(&network)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Listening);
        assert_eq!(conn.bound_versions(), vec![IpVersion::V4, IpVersion::V6]);
        assert!(network.is_joined(IpVersion::V4));
        assert!(network.is_joined(IpVersion::V6));

        // A second init is refused.
        assert!(conn.init(&FakeSocketFactory::new(&network)).is_err());
    }

    #[test]
    fn test_degraded_mode() {
        let network = FakeNetwork::new();
        network.fail_bind(IpVersion::V6);
        let delegate = Rc::new(RecordingDelegate::default());

        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();
        assert_eq!(conn.bound_versions(), vec![IpVersion::V4]);

        let strict = connection(&delegate, SendPolicy::AllFamilies, true);
        assert!(matches!(
            strict.init(&FakeSocketFactory::new(&network)),
            Err(Error::Transport(_))
        ));
        assert_eq!(strict.state(), ConnectionState::Error);
    }

    #[test]
    fn test_no_family_bound() {
        let network = FakeNetwork::new();
        network.fail_bind(IpVersion::V4);
        network.fail_bind(IpVersion::V6);
        let delegate = Rc::new(RecordingDelegate::default());
        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        assert!(conn.init(&FakeSocketFactory::new(&network)).is_err());
        assert_eq!(conn.state(), ConnectionState::Error);
    }

    #[test]
    fn test_send_policy() {
        let network = FakeNetwork::new();
        let delegate = Rc::new(RecordingDelegate::default());

        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();
        conn.send(b"query").unwrap();
        assert_eq!(network.sent(IpVersion::V4).len(), 1);
        assert_eq!(network.sent(IpVersion::V6).len(), 1);
        drop(conn);

        let conn = connection(&delegate, SendPolicy::FirstAvailable, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();
        conn.send(b"query").unwrap();
        assert_eq!(network.sent(IpVersion::V4).len(), 2);
        assert_eq!(network.sent(IpVersion::V6).len(), 1);
    }

    #[test]
    fn test_send_fails_only_when_every_family_fails() {
        let network = FakeNetwork::new();
        let delegate = Rc::new(RecordingDelegate::default());
        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();

        network.fail_send(IpVersion::V4);
        assert!(conn.send(b"query").is_ok());
        network.fail_send(IpVersion::V6);
        assert!(matches!(conn.send(b"query"), Err(Error::Transport(_))));
        assert_eq!(conn.state(), ConnectionState::Listening);
    }

    #[test]
    fn test_receive_one_datagram_per_callback() {
        let network = FakeNetwork::new();
        let delegate = Rc::new(RecordingDelegate::default());
        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();

        network.deliver(IpVersion::V4, b"first");
        network.deliver(IpVersion::V6, b"second");
        assert_eq!(
            *delegate.packets.borrow(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
        assert!(delegate.errors.borrow().is_empty());
    }

    #[test]
    fn test_read_error_reported_once() {
        let network = FakeNetwork::new();
        let delegate = Rc::new(RecordingDelegate::default());
        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();

        network.fail_recv(IpVersion::V4);
        network.deliver(IpVersion::V4, b"lost");
        network.deliver(IpVersion::V6, b"also lost");

        assert_eq!(delegate.errors.borrow().len(), 1);
        assert!(delegate.packets.borrow().is_empty());
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(conn.bound_versions().is_empty());
        assert!(conn.send(b"query").is_err());
    }

    #[test]
    fn test_close_drops_sockets() {
        let network = FakeNetwork::new();
        let delegate = Rc::new(RecordingDelegate::default());
        let conn = connection(&delegate, SendPolicy::AllFamilies, false);
        conn.init(&FakeSocketFactory::new(&network)).unwrap();

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        network.deliver(IpVersion::V4, b"late");
        assert!(delegate.packets.borrow().is_empty());
        assert!(delegate.errors.borrow().is_empty());
    }
}
