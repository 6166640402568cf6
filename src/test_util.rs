//! In-memory sockets for unit tests.

use crate::{
    connection::{DatagramSocket, IpVersion, ReadableCallback, SocketFactory},
    error::{Error, Result},
};
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    rc::Rc,
};

type Watcher = (u64, Rc<RefCell<ReadableCallback>>);

#[derive(Default)]
struct NetworkState {
    fail_bind: RefCell<HashSet<IpVersion>>,
    fail_send: RefCell<HashSet<IpVersion>>,
    fail_recv: RefCell<HashSet<IpVersion>>,
    joined: RefCell<HashSet<IpVersion>>,
    sent: RefCell<HashMap<IpVersion, Vec<Vec<u8>>>>,
    inbox: RefCell<HashMap<IpVersion, VecDeque<Vec<u8>>>>,
    watchers: RefCell<HashMap<IpVersion, Watcher>>,
    sockets_created: Cell<u64>,
}

/// A fake link shared by the sockets of one test.
#[derive(Clone, Default)]
pub(crate) struct FakeNetwork {
    state: Rc<NetworkState>,
}

impl FakeNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_bind(&self, version: IpVersion) {
        self.state.fail_bind.borrow_mut().insert(version);
    }

    pub(crate) fn fail_send(&self, version: IpVersion) {
        self.state.fail_send.borrow_mut().insert(version);
    }

    pub(crate) fn fail_recv(&self, version: IpVersion) {
        self.state.fail_recv.borrow_mut().insert(version);
    }

    pub(crate) fn is_joined(&self, version: IpVersion) -> bool {
        self.state.joined.borrow().contains(&version)
    }

    pub(crate) fn sockets_created(&self) -> u64 {
        self.state.sockets_created.get()
    }

    /// Whether a live socket of `version` is being watched.
    pub(crate) fn is_open(&self, version: IpVersion) -> bool {
        self.state.watchers.borrow().contains_key(&version)
    }

    pub(crate) fn sent(&self, version: IpVersion) -> Vec<Vec<u8>> {
        self.state
            .sent
            .borrow()
            .get(&version)
            .cloned()
            .unwrap_or_default()
    }

    /// Queues `packet` on the socket of `version` and runs its readable
    /// callback until it stops consuming. Lost if no socket is watching.
    pub(crate) fn deliver(&self, version: IpVersion, packet: &[u8]) {
        let watcher = self.state.watchers.borrow().get(&version).cloned();
        let Some((id, callback)) = watcher else {
            return;
        };

        self.state
            .inbox
            .borrow_mut()
            .entry(version)
            .or_default()
            .push_back(packet.to_vec());

        loop {
            let more = (*callback.borrow_mut())();
            let same_socket = self
                .state
                .watchers
                .borrow()
                .get(&version)
                .map_or(false, |(current, _)| *current == id);
            if !more || !same_socket {
                break;
            }
        }
        self.state.inbox.borrow_mut().remove(&version);
    }
}

pub(crate) struct FakeSocketFactory {
    network: FakeNetwork,
}

impl FakeSocketFactory {
    pub(crate) fn new(network: &FakeNetwork) -> Self {
        Self {
            network: network.clone(),
        }
    }
}

impl SocketFactory for FakeSocketFactory {
    fn create_socket(&self, version: IpVersion) -> Result<Box<dyn DatagramSocket>> {
        let id = self.network.state.sockets_created.get() + 1;
        self.network.state.sockets_created.set(id);
        Ok(Box::new(FakeSocket {
            id,
            version,
            network: self.network.clone(),
        }))
    }
}

struct FakeSocket {
    id: u64,
    version: IpVersion,
    network: FakeNetwork,
}

impl DatagramSocket for FakeSocket {
    fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        if self.network.state.fail_bind.borrow().contains(&self.version) {
            return Err(Error::Msg(format!("socket bind to {} failed", addr)));
        }
        Ok(())
    }

    fn join_multicast(&mut self, _group: IpAddr) -> Result<()> {
        self.network.state.joined.borrow_mut().insert(self.version);
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.network.state.fail_recv.borrow().contains(&self.version) {
            return Err(io::Error::new(io::ErrorKind::Other, "fake read failure"));
        }
        let packet = self
            .network
            .state
            .inbox
            .borrow_mut()
            .get_mut(&self.version)
            .and_then(|queue| queue.pop_front());
        let Some(packet) = packet else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let sz = packet.len().min(buf.len());
        buf[..sz].copy_from_slice(&packet[..sz]);
        let source = match self.version {
            IpVersion::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 5353),
            IpVersion::V6 => SocketAddr::new(
                IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x20)),
                5353,
            ),
        };
        Ok((sz, source))
    }

    fn send_to(&mut self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        if self.network.state.fail_send.borrow().contains(&self.version) {
            return Err(io::Error::new(io::ErrorKind::Other, "fake send failure"));
        }
        self.network
            .state
            .sent
            .borrow_mut()
            .entry(self.version)
            .or_default()
            .push(buf.to_vec());
        Ok(buf.len())
    }

    fn watch_readable(&mut self, on_readable: ReadableCallback) -> Result<()> {
        self.network
            .state
            .watchers
            .borrow_mut()
            .insert(self.version, (self.id, Rc::new(RefCell::new(on_readable))));
        Ok(())
    }
}

impl Drop for FakeSocket {
    fn drop(&mut self) {
        let mut watchers = self.network.state.watchers.borrow_mut();
        if watchers.get(&self.version).map_or(false, |(id, _)| *id == self.id) {
            watchers.remove(&self.version);
            self.network.state.joined.borrow_mut().remove(&self.version);
        }
    }
}
