//! A `mio` based host for the client.
//!
//! [EventLoop] owns the poller and a [TimerQueue]. Its [MioSocketFactory]
//! builds real multicast sockets with `socket2` and registers them with the
//! poller, so that readiness events turn into the callbacks the connection
//! asked for.

#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::{
    connection::{DatagramSocket, IpVersion, ReadableCallback, SocketFactory},
    error::{Error, Result},
    scheduler::TimerQueue,
};
use if_addrs::{IfAddr, Interface};
use mio::{net::UdpSocket as MioUdpSocket, Events, Interest, Poll, Registry, Token, Waker};
use socket2::Socket;
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io,
    net::{IpAddr, SocketAddr, UdpSocket},
    rc::Rc,
    sync::Arc,
    time::Duration,
};

/// Token reserved for the [Waker] of the poller.
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

type SharedCallback = Rc<RefCell<ReadableCallback>>;

/// The part of the loop that sockets keep a handle to.
struct Reactor {
    registry: Registry,
    handlers: RefCell<HashMap<Token, SharedCallback>>,
    next_token: Cell<usize>,
}

impl Reactor {
    fn next_token(&self) -> Token {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        Token(token)
    }

    fn is_registered(&self, token: Token) -> bool {
        self.handlers.borrow().contains_key(&token)
    }
}

/// Runs socket callbacks and timers on the current thread.
pub struct EventLoop {
    poll: RefCell<Poll>,
    events: RefCell<Events>,
    reactor: Rc<Reactor>,
    timers: Rc<TimerQueue>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().map_err(|e| e_fmt!("failed to create mio Poll: {e}"))?;
        Self::with_poll(poll)
    }

    /// Builds the loop around an existing poller, e.g. one whose [Waker] was
    /// handed to another thread.
    pub fn with_poll(poll: Poll) -> Result<Self> {
        let registry = poll
            .registry()
            .try_clone()
            .map_err(|e| e_fmt!("failed to clone mio registry: {e}"))?;

        Ok(Self {
            poll: RefCell::new(poll),
            events: RefCell::new(Events::with_capacity(1024)),
            reactor: Rc::new(Reactor {
                registry,
                handlers: RefCell::new(HashMap::new()),
                next_token: Cell::new(0),
            }),
            timers: Rc::new(TimerQueue::new()),
        })
    }

    /// Creates a waker for `poll` that interrupts [EventLoop::run_once] from any thread.
    pub fn waker(poll: &Poll) -> Result<Arc<Waker>> {
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)
            .map_err(|e| e_fmt!("failed to create mio Waker: {e}"))?;
        Ok(Arc::new(waker))
    }

    /// The scheduler to give to [MdnsClient](crate::MdnsClient).
    pub fn timers(&self) -> Rc<TimerQueue> {
        self.timers.clone()
    }

    /// A factory of sockets polled by this loop.
    pub fn socket_factory(&self, multicast_loop: bool) -> MioSocketFactory {
        MioSocketFactory {
            reactor: self.reactor.clone(),
            multicast_loop,
        }
    }

    /// Waits for socket readiness or the next timer, at most `max_wait`,
    /// then runs the callbacks and due timers.
    pub fn run_once(&self, max_wait: Option<Duration>) -> Result<()> {
        let timeout = match (self.timers.time_to_next(), max_wait) {
            (Some(timer), Some(max)) => Some(timer.min(max)),
            (timer, max) => timer.or(max),
        };

        let tokens: Vec<Token> = {
            let mut events = self.events.borrow_mut();
            events.clear();
            if let Err(e) = self.poll.borrow_mut().poll(&mut events, timeout) {
                if e.kind() != io::ErrorKind::Interrupted {
                    return Err(e_fmt!("failed to poll sockets: {}", e));
                }
            }
            events.iter().map(|ev| ev.token()).collect()
        };

        for token in tokens {
            if token == WAKE_TOKEN {
                trace!("event loop woken up");
                continue;
            }
            self.dispatch(token);
        }

        self.timers.run_due();
        Ok(())
    }

    /// Calls the handler of `token` until it stops consuming. Readiness is
    /// edge-triggered, so the socket must be drained.
    fn dispatch(&self, token: Token) {
        let handler = self.reactor.handlers.borrow().get(&token).cloned();
        let Some(handler) = handler else {
            trace!("no handler for event key {:?}", token);
            return;
        };

        loop {
            let more = match handler.try_borrow_mut() {
                Ok(mut callback) => (*callback)(),
                Err(_) => false,
            };
            if !more || !self.reactor.is_registered(token) {
                break;
            }
        }
    }
}

/// Makes sockets bound to the mDNS port and polled by an [EventLoop].
pub struct MioSocketFactory {
    reactor: Rc<Reactor>,
    multicast_loop: bool,
}

impl SocketFactory for MioSocketFactory {
    fn create_socket(&self, version: IpVersion) -> Result<Box<dyn DatagramSocket>> {
        Ok(Box::new(MioDatagramSocket {
            version,
            reactor: self.reactor.clone(),
            multicast_loop: self.multicast_loop,
            sock: None,
            token: None,
        }))
    }
}

struct MioDatagramSocket {
    version: IpVersion,
    reactor: Rc<Reactor>,
    multicast_loop: bool,
    sock: Option<MioUdpSocket>,
    token: Option<Token>,
}

impl MioDatagramSocket {
    fn sock(&mut self) -> io::Result<&mut MioUdpSocket> {
        self.sock
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not bound"))
    }
}

impl DatagramSocket for MioDatagramSocket {
    fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        let sock = new_socket(addr, true)?;
        self.sock = Some(MioUdpSocket::from_std(UdpSocket::from(sock)));
        Ok(())
    }

    /// Joins `group` on every non-loopback interface of the socket's family.
    fn join_multicast(&mut self, group: IpAddr) -> Result<()> {
        let multicast_loop = self.multicast_loop;
        let version = self.version;
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| e_fmt!("join multicast group {} before bind", group))?;

        let mut joined = 0;
        for intf in my_ip_interfaces() {
            let result = match (&group, &intf.addr) {
                (IpAddr::V4(group), IfAddr::V4(ifv4)) => sock.join_multicast_v4(group, &ifv4.ip),
                (IpAddr::V6(group), IfAddr::V6(_)) => {
                    sock.join_multicast_v6(group, intf.index.unwrap_or(0))
                }
                _ => continue,
            };
            match result {
                Ok(()) => {
                    trace!("joined {} on interface {}", group, intf.name);
                    joined += 1;
                }
                // Several addresses of one interface share the membership.
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {}
                Err(e) => debug!("join multicast group {} on {}: {}", group, intf.name, e),
            }
        }

        if joined == 0 {
            return Err(e_fmt!("failed to join {} on any interface", group));
        }

        let result = match group {
            IpAddr::V4(_) => sock.set_multicast_loop_v4(multicast_loop),
            IpAddr::V6(_) => sock.set_multicast_loop_v6(multicast_loop),
        };
        result.map_err(|e| e_fmt!("failed to set multicast loop for {}: {}", version, e))
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.sock()?.recv_from(buf)
    }

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.sock()?.send_to(buf, addr)
    }

    fn watch_readable(&mut self, on_readable: ReadableCallback) -> Result<()> {
        let reactor = self.reactor.clone();
        let token = reactor.next_token();
        let version = self.version;
        let sock = self
            .sock
            .as_mut()
            .ok_or_else(|| e_fmt!("watch an unbound {} socket", version))?;

        reactor
            .registry
            .register(sock, token, Interest::READABLE)
            .map_err(|e| e_fmt!("add socket to poller: {e}"))?;
        reactor
            .handlers
            .borrow_mut()
            .insert(token, Rc::new(RefCell::new(on_readable)));
        self.token = Some(token);
        Ok(())
    }
}

impl Drop for MioDatagramSocket {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        self.reactor.handlers.borrow_mut().remove(&token);
        if let Some(sock) = self.sock.as_mut() {
            if let Err(e) = self.reactor.registry.deregister(sock) {
                debug!("failed to remove sock {:?} from poller: {}", token, e);
            }
        }
    }
}

/// Creates a new UDP socket to bind to `addr` with REUSEPORT option.
/// `non_block` indicates whether to set O_NONBLOCK for the socket.
fn new_socket(addr: SocketAddr, non_block: bool) -> Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => socket2::Domain::IPV4,
        SocketAddr::V6(_) => socket2::Domain::IPV6,
    };

    let fd = Socket::new(domain, socket2::Type::DGRAM, None)
        .map_err(|e| e_fmt!("create socket failed: {}", e))?;

    fd.set_reuse_address(true)
        .map_err(|e| e_fmt!("set ReuseAddr failed: {}", e))?;
    #[cfg(unix)] // this is currently restricted to Unix's in socket2
    fd.set_reuse_port(true)
        .map_err(|e| e_fmt!("set ReusePort failed: {}", e))?;

    if domain == socket2::Domain::IPV6 {
        fd.set_only_v6(true)
            .map_err(|e| e_fmt!("set IPV6_V6ONLY failed: {}", e))?;
    }

    if non_block {
        fd.set_nonblocking(true)
            .map_err(|e| e_fmt!("set O_NONBLOCK: {}", e))?;
    }

    fd.bind(&addr.into())
        .map_err(|e| e_fmt!("socket bind to {} failed: {}", &addr, e))?;

    trace!("new socket bind to {}", &addr);
    Ok(fd)
}

/// Returns valid network interfaces in the host system.
/// Loopback interfaces are excluded.
fn my_ip_interfaces() -> Vec<Interface> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|i| !i.is_loopback())
        .collect()
}
