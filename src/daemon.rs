//! A thread running the client, for callers outside of its scheduler.
//!
//! [MdnsDaemon] is a cloneable handle that sends commands to a dedicated
//! thread. The thread owns an [EventLoop] and a [MdnsClient]; events come
//! back through `flume` channels, so a caller can `.recv()` in sync code or
//! `.recv_async().await` in async code.

#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::{
    client::MdnsClient,
    config::MdnsConfig,
    dns_parser::{canonical_name, check_name, RRType},
    error::{Error, Result},
    event_loop::EventLoop,
    listener::{
        ListenerDelegate, MdnsListener, MdnsTransaction, TransactionMode, TransactionResult,
        UpdateType,
    },
    record_rdata::ParsedRecord,
};
use flume::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use mio::{Poll, Waker};
use std::{collections::HashMap, fmt, rc::Rc, sync::Arc, thread};

/// Status code for the daemon.
#[derive(Debug, PartialEq, Clone, Eq)]
#[non_exhaustive]
pub enum DaemonStatus {
    /// The daemon is running as normal.
    Running,

    /// The daemon has been shutdown.
    Shutdown,
}

/// Events of a listener started by [MdnsDaemon::listen].
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ListenerEvent {
    Added(ParsedRecord),
    Changed(ParsedRecord),
    Removed(ParsedRecord),

    /// The name has no record of this type.
    Nsec(String, RRType),

    /// The connection failed; the listener is dead.
    Failed(Error),

    /// The listener was stopped, replaced or the daemon shut down.
    Stopped(String, RRType),
}

/// Results of a query started by [MdnsDaemon::query]. The channel is
/// closed after a final event, or with no event once the query is stopped.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum QueryEvent {
    Record(ParsedRecord),
    Done,
    NoResults,
    Nsec,
    Failed(Error),
}

/// A daemon thread for the mDNS client.
///
/// This struct provides a handle and an API to the daemon. It is cloneable.
#[derive(Clone)]
pub struct MdnsDaemon {
    /// Sender handle of the channel to the daemon.
    sender: Sender<Command>,

    /// Wakes the daemon's poller after a command is sent.
    waker: Arc<Waker>,
}

impl MdnsDaemon {
    /// Creates a new daemon with the default config and spawns its thread.
    pub fn new() -> Result<Self> {
        Self::with_config(MdnsConfig::default())
    }

    pub fn with_config(config: MdnsConfig) -> Result<Self> {
        let poller = Poll::new().map_err(|e| e_fmt!("failed to create mio Poll: {e}"))?;
        let waker = EventLoop::waker(&poller)?;

        let (sender, receiver) = bounded(100);

        thread::Builder::new()
            .name("mDNS_client".to_string())
            .spawn(move || Self::daemon_thread(config, poller, receiver))
            .map_err(|e| e_fmt!("thread builder failed to spawn: {}", e))?;

        Ok(Self { sender, waker })
    }

    /// Sends `cmd` to the daemon via its channel and wakes up its poller.
    fn send_cmd(&self, cmd: Command) -> Result<()> {
        let cmd_name = cmd.to_string();

        self.sender.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => Error::Again,
            e => e_fmt!("flume::channel::send failed: {}", e),
        })?;

        self.waker
            .wake()
            .map_err(|e| e_fmt!("failed to wake up the daemon for {}: {}", cmd_name, e))
    }

    /// Starts listening for records of `name` and `rr_type`.
    ///
    /// Listening again on the same name and type replaces the previous
    /// listener, which gets [ListenerEvent::Stopped].
    pub fn listen(&self, name: &str, rr_type: RRType) -> Result<Receiver<ListenerEvent>> {
        check_name(name)?;
        let (resp_s, resp_r) = bounded(100);
        self.send_cmd(Command::Listen(name.to_string(), rr_type, resp_s))?;
        Ok(resp_r)
    }

    /// Stops the listener of `name` and `rr_type`.
    ///
    /// When an error is returned, the caller should retry only when
    /// the error is `Error::Again`, otherwise should log and move on.
    pub fn stop_listen(&self, name: &str, rr_type: RRType) -> Result<()> {
        self.send_cmd(Command::StopListen(name.to_string(), rr_type))
    }

    /// Starts a transaction and returns a channel of its results.
    ///
    /// A multi-result query without a timeout runs until [Self::stop_query]
    /// or until the returned receiver is dropped.
    pub fn query(
        &self,
        name: &str,
        rr_type: RRType,
        mode: TransactionMode,
    ) -> Result<Receiver<QueryEvent>> {
        check_name(name)?;
        let (resp_s, resp_r) = bounded(100);
        self.send_cmd(Command::Query(name.to_string(), rr_type, mode, resp_s))?;
        Ok(resp_r)
    }

    /// Stops every running query of `name` and `rr_type`. Their channels
    /// close without a final event.
    ///
    /// When an error is returned, the caller should retry only when
    /// the error is `Error::Again`, otherwise should log and move on.
    pub fn stop_query(&self, name: &str, rr_type: RRType) -> Result<()> {
        self.send_cmd(Command::StopQuery(name.to_string(), rr_type))
    }

    /// Returns the status of the daemon.
    ///
    /// When an error is returned, the caller should retry only when
    /// the error is `Error::Again`, otherwise should consider the daemon
    /// stopped working and move on.
    pub fn status(&self) -> Result<Receiver<DaemonStatus>> {
        let (resp_s, resp_r) = bounded(1);

        if self.sender.is_disconnected() {
            resp_s
                .send(DaemonStatus::Shutdown)
                .map_err(|e| e_fmt!("failed to send daemon status to the client: {}", e))?;
        } else {
            self.send_cmd(Command::GetStatus(resp_s))?;
        }

        Ok(resp_r)
    }

    /// Shuts down the daemon thread and returns a channel to receive the status.
    ///
    /// When an error is returned, the caller should retry only when
    /// the error is `Error::Again`, otherwise should log and move on.
    pub fn shutdown(&self) -> Result<Receiver<DaemonStatus>> {
        let (resp_s, resp_r) = bounded(1);
        self.send_cmd(Command::Exit(resp_s))?;
        Ok(resp_r)
    }

    fn daemon_thread(config: MdnsConfig, poller: Poll, receiver: Receiver<Command>) {
        let event_loop = match EventLoop::with_poll(poller) {
            Ok(event_loop) => event_loop,
            Err(e) => {
                debug!("failed to create the event loop: {}", e);
                return;
            }
        };

        let factory = Rc::new(event_loop.socket_factory(config.multicast_loop()));
        let client = MdnsClient::with_config(config, event_loop.timers(), factory);

        if let Some(cmd) = Self::run(&event_loop, ClientState::new(client), receiver) {
            match cmd {
                Command::Exit(resp_s) => {
                    if let Err(e) = resp_s.send(DaemonStatus::Shutdown) {
                        debug!("exit: failed to send response of shutdown: {}", e);
                    }
                }
                _ => {
                    debug!("Unexpected command: {:?}", cmd);
                }
            }
        }
    }

    /// The main loop of the daemon thread.
    ///
    /// In each round, it will:
    /// 1. poll the sockets until readiness, the next timer or a command.
    /// 2. run socket callbacks and due timers.
    /// 3. try_recv on its channel and execute commands.
    /// 4. drop the queries that completed or lost their receiver.
    fn run(
        event_loop: &EventLoop,
        mut client: ClientState,
        receiver: Receiver<Command>,
    ) -> Option<Command> {
        loop {
            if let Err(e) = event_loop.run_once(None) {
                debug!("{}", e);
            }

            loop {
                match receiver.try_recv() {
                    Ok(Command::Exit(resp_s)) => {
                        client.stop_all();
                        return Some(Command::Exit(resp_s));
                    }
                    Ok(command) => client.exec_command(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("all daemon handles dropped, exit");
                        client.stop_all();
                        return None;
                    }
                }
            }

            client.prune_queries();
        }
    }
}

/// A transaction started by a `Query` command.
struct RunningQuery {
    /// Canonical name and type.
    key: (String, RRType),
    transaction: MdnsTransaction,
    sender: Sender<QueryEvent>,
}

/// The state owned by the daemon thread.
struct ClientState {
    client: MdnsClient,
    listeners: HashMap<(String, RRType), (MdnsListener, Sender<ListenerEvent>)>,
    queries: Vec<RunningQuery>,
}

impl ClientState {
    fn new(client: MdnsClient) -> Self {
        Self {
            client,
            listeners: HashMap::new(),
            queries: Vec::new(),
        }
    }

    fn exec_command(&mut self, command: Command) {
        trace!("exec {}", command);
        match command {
            Command::Listen(name, rr_type, sender) => {
                let delegate = sender.clone();
                let mut listener = self.client.create_listener(rr_type, &name, delegate);
                if let Err(e) = listener.start() {
                    send_event(&sender, ListenerEvent::Failed(e));
                    return;
                }

                let key = (canonical_name(&name), rr_type);
                if let Some((old, old_sender)) = self.listeners.insert(key, (listener, sender)) {
                    drop(old);
                    send_event(&old_sender, ListenerEvent::Stopped(name, rr_type));
                }
            }

            Command::StopListen(name, rr_type) => {
                let key = (canonical_name(&name), rr_type);
                match self.listeners.remove(&key) {
                    Some((listener, sender)) => {
                        drop(listener);
                        send_event(&sender, ListenerEvent::Stopped(name, rr_type));
                    }
                    None => debug!("StopListen: no listener for {} {}", rr_type, name),
                }
            }

            Command::Query(name, rr_type, mode, sender) => {
                let results = sender.clone();
                let mut transaction =
                    self.client
                        .create_transaction(rr_type, &name, mode, move |result| {
                            send_event(&results, QueryEvent::from(result));
                        });
                if let Err(e) = transaction.start() {
                    send_event(&sender, QueryEvent::Failed(e));
                    return;
                }
                if transaction.is_active() {
                    self.queries.push(RunningQuery {
                        key: (canonical_name(&name), rr_type),
                        transaction,
                        sender,
                    });
                }
            }

            Command::StopQuery(name, rr_type) => {
                let key = (canonical_name(&name), rr_type);
                let before = self.queries.len();
                self.queries.retain(|query| query.key != key);
                if self.queries.len() == before {
                    debug!("StopQuery: no query for {} {}", rr_type, name);
                }
            }

            Command::GetStatus(resp_s) => {
                if let Err(e) = resp_s.send(DaemonStatus::Running) {
                    debug!("Failed to send status: {}", e);
                }
            }

            Command::Exit(_) => {}
        }
    }

    /// Drops the queries that completed, and those nobody receives from.
    fn prune_queries(&mut self) {
        self.queries.retain(|query| {
            if query.sender.is_disconnected() {
                trace!("drop query {} {}: receiver gone", query.key.1, query.key.0);
                return false;
            }
            query.transaction.is_active()
        });
    }

    fn stop_all(&mut self) {
        self.queries.clear();
        for ((_, rr_type), (listener, sender)) in self.listeners.drain() {
            let name = listener.name().to_string();
            drop(listener);
            send_event(&sender, ListenerEvent::Stopped(name, rr_type));
        }
    }
}

impl ListenerDelegate for Sender<ListenerEvent> {
    fn on_record_update(&mut self, update: UpdateType, record: &ParsedRecord) {
        let record = record.clone();
        let event = match update {
            UpdateType::Added => ListenerEvent::Added(record),
            UpdateType::Changed => ListenerEvent::Changed(record),
            UpdateType::Removed => ListenerEvent::Removed(record),
        };
        send_event(self, event);
    }

    fn on_nsec_record(&mut self, name: &str, rr_type: RRType) {
        send_event(self, ListenerEvent::Nsec(name.to_string(), rr_type));
    }

    fn on_connection_error(&mut self, error: &Error) {
        send_event(self, ListenerEvent::Failed(error.clone()));
    }
}

impl From<TransactionResult<'_>> for QueryEvent {
    fn from(result: TransactionResult<'_>) -> Self {
        match result {
            TransactionResult::Record(record) => Self::Record(record.clone()),
            TransactionResult::Done => Self::Done,
            TransactionResult::NoResults => Self::NoResults,
            TransactionResult::Nsec => Self::Nsec,
            TransactionResult::Failed(e) => Self::Failed(e.clone()),
        }
    }
}

fn send_event<T: fmt::Debug>(sender: &Sender<T>, event: T) {
    if let Err(e) = sender.try_send(event) {
        debug!("failed to send event: {}", e);
    }
}

/// Commands supported by the daemon
#[derive(Debug)]
enum Command {
    /// Listen for records (name, type, channel::sender)
    Listen(String, RRType, Sender<ListenerEvent>),

    StopListen(String, RRType),

    /// Run a transaction (name, type, mode, channel::sender)
    Query(String, RRType, TransactionMode, Sender<QueryEvent>),

    StopQuery(String, RRType),

    /// Get the current status of the daemon.
    GetStatus(Sender<DaemonStatus>),

    Exit(Sender<DaemonStatus>),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen(_, _, _) => write!(f, "Command Listen"),
            Self::StopListen(_, _) => write!(f, "Command StopListen"),
            Self::Query(_, _, _, _) => write!(f, "Command Query"),
            Self::StopQuery(_, _) => write!(f, "Command StopQuery"),
            Self::GetStatus(_) => write!(f, "Command GetStatus"),
            Self::Exit(_) => write!(f, "Command Exit"),
        }
    }
}
