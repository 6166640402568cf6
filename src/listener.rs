//! Listeners and transactions, the two ways to consume records.
//!
//! A [MdnsListener] is a long lived subscription to one (name, type) key.
//! A [MdnsTransaction] is a bounded query built on top of a listener: it
//! serves cached records, queries the network and completes on the first
//! result, on timeout, or when its owner drops it.

#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::{
    client::ClientInner,
    dns_parser::{check_name, RRType},
    error::{Error, Result},
    mdns_core::Core,
    record_rdata::{ParsedRecord, RecordRdata},
    scheduler::TaskId,
};
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

/// How a cached record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Added,
    Changed,
    Removed,
}

/// Receives the updates of one [MdnsListener].
///
/// The delegate may create or drop listeners and transactions of the same
/// client, including the one it belongs to, from inside any of these calls.
pub trait ListenerDelegate {
    /// A record of the listened (name, type) was added, changed or removed.
    fn on_record_update(&mut self, update: UpdateType, record: &ParsedRecord);

    /// An NSEC record confirmed that `name` has no record of `rr_type`.
    fn on_nsec_record(&mut self, name: &str, rr_type: RRType);

    /// The connection failed. No further calls follow.
    fn on_connection_error(&mut self, _error: &Error) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Started,
    Destroyed,
}

pub(crate) struct ListenerInner {
    name: String,
    rr_type: RRType,
    state: Cell<ListenerState>,
    delegate: RefCell<Box<dyn ListenerDelegate>>,
    client: Rc<ClientInner>,
    core: RefCell<Option<Rc<Core>>>,
}

impl ListenerInner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rr_type(&self) -> RRType {
        self.rr_type
    }

    pub(crate) fn is_started(&self) -> bool {
        self.state.get() == ListenerState::Started
    }

    pub(crate) fn alert_delegate(&self, update: UpdateType, record: &ParsedRecord) {
        match self.delegate.try_borrow_mut() {
            Ok(mut delegate) => delegate.on_record_update(update, record),
            Err(_) => debug!("listener {} {} is busy, skip update", self.rr_type, self.name),
        }
    }

    pub(crate) fn alert_nsec(&self) {
        match self.delegate.try_borrow_mut() {
            Ok(mut delegate) => delegate.on_nsec_record(&self.name, self.rr_type),
            Err(_) => debug!("listener {} {} is busy, skip nsec", self.rr_type, self.name),
        }
    }

    pub(crate) fn alert_connection_error(&self, error: &Error) {
        if let Ok(mut delegate) = self.delegate.try_borrow_mut() {
            delegate.on_connection_error(error);
        }
    }

    /// Deregisters from the core and gives back the listen reference.
    fn stop(&self) {
        let was_started = self.state.replace(ListenerState::Destroyed) == ListenerState::Started;
        let core = self.core.borrow_mut().take();
        if let Some(core) = core {
            core.remove_listener(self);
        }
        if was_started {
            trace!("listener {} {} stopped", self.rr_type, self.name);
            self.client.sub_listen_ref();
        }
    }
}

/// A subscription to every update of one (name, type) key.
///
/// Dropping the listener deregisters it at once: its delegate is never
/// called afterwards.
pub struct MdnsListener {
    inner: Rc<ListenerInner>,
}

impl MdnsListener {
    pub(crate) fn new(
        client: Rc<ClientInner>,
        rr_type: RRType,
        name: &str,
        delegate: Box<dyn ListenerDelegate>,
    ) -> Self {
        Self {
            inner: Rc::new(ListenerInner {
                name: name.to_string(),
                rr_type,
                state: Cell::new(ListenerState::Created),
                delegate: RefCell::new(delegate),
                client,
                core: RefCell::new(None),
            }),
        }
    }

    /// Registers with the core, creating it if needed. A listener starts at
    /// most once.
    pub fn start(&mut self) -> Result<()> {
        if self.inner.state.get() != ListenerState::Created {
            return Err(e_fmt!(
                "listener {} {} cannot start in state {:?}",
                self.inner.rr_type,
                self.inner.name,
                self.inner.state.get()
            ));
        }
        check_name(&self.inner.name)?;

        let core = self.inner.client.add_listen_ref()?;
        core.add_listener(&self.inner);
        *self.inner.core.borrow_mut() = Some(core);
        self.inner.state.set(ListenerState::Started);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn rr_type(&self) -> RRType {
        self.inner.rr_type
    }

    pub fn state(&self) -> ListenerState {
        self.inner.state.get()
    }
}

impl Drop for MdnsListener {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

/// Where a transaction looks for records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    /// Only records already cached. Never touches the network.
    CacheOnly,

    /// Query the network and wait for responses.
    Network,

    /// Serve the cache first, then the network if still unfinished.
    CacheAndNetwork,
}

/// How many results a transaction reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// Completes on the first record, NSEC or timeout.
    Single,

    /// Reports every record until dropped or timed out.
    Multi,
}

/// The behaviour of a [MdnsTransaction].
///
/// ```
/// use mdns_client::{QuerySource, ResultMode, TransactionMode};
/// use std::time::Duration;
///
/// let mode = TransactionMode::single(QuerySource::CacheAndNetwork)
///     .with_timeout(Duration::from_secs(1));
/// assert_eq!(mode.results, ResultMode::Single);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionMode {
    pub source: QuerySource,
    pub results: ResultMode,

    /// `None` means the client default for `Single` and no timeout for `Multi`.
    pub timeout: Option<Duration>,
}

impl TransactionMode {
    pub fn single(source: QuerySource) -> Self {
        Self {
            source,
            results: ResultMode::Single,
            timeout: None,
        }
    }

    pub fn multi(source: QuerySource) -> Self {
        Self {
            source,
            results: ResultMode::Multi,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn uses_cache(&self) -> bool {
        self.source != QuerySource::Network
    }

    fn uses_network(&self) -> bool {
        self.source != QuerySource::CacheOnly
    }
}

impl Default for TransactionMode {
    fn default() -> Self {
        Self::single(QuerySource::CacheAndNetwork)
    }
}

/// What a transaction callback receives.
#[derive(Debug, PartialEq)]
pub enum TransactionResult<'a> {
    /// A record was found, in the cache or on the network.
    Record(&'a ParsedRecord),

    /// A multi-result transaction is over.
    Done,

    /// A single-result transaction found nothing.
    NoResults,

    /// The name is known to have no record of the queried type.
    Nsec,

    /// The connection failed.
    Failed(&'a Error),
}

impl TransactionResult<'_> {
    /// Whether this result completes the transaction in `mode`.
    fn is_final(&self, mode: ResultMode) -> bool {
        match mode {
            ResultMode::Single => true,
            ResultMode::Multi => matches!(self, Self::Done | Self::Failed(_)),
        }
    }
}

type TransactionCallback = Box<dyn FnMut(TransactionResult<'_>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    Active,

    /// Completed with a final result.
    Done,

    /// Dropped before completion.
    Destroyed,
}

struct TransactionInner {
    weak_self: Weak<TransactionInner>,
    name: String,
    rr_type: RRType,
    mode: TransactionMode,
    state: Cell<TransactionState>,
    callback: RefCell<Option<TransactionCallback>>,
    listener: RefCell<Option<MdnsListener>>,
    timeout_task: Cell<Option<TaskId>>,
    client: Rc<ClientInner>,
}

/// Forwards the updates of the embedded listener to its transaction.
struct TransactionProxy(Weak<TransactionInner>);

impl ListenerDelegate for TransactionProxy {
    fn on_record_update(&mut self, update: UpdateType, record: &ParsedRecord) {
        if update == UpdateType::Removed {
            return;
        }
        if let Some(transaction) = self.0.upgrade() {
            transaction.trigger_callback(TransactionResult::Record(record));
        }
    }

    fn on_nsec_record(&mut self, _name: &str, _rr_type: RRType) {
        if let Some(transaction) = self.0.upgrade() {
            transaction.trigger_callback(TransactionResult::Nsec);
        }
    }

    fn on_connection_error(&mut self, error: &Error) {
        if let Some(transaction) = self.0.upgrade() {
            transaction.trigger_callback(TransactionResult::Failed(error));
        }
    }
}

impl TransactionInner {
    fn is_active(&self) -> bool {
        self.state.get() == TransactionState::Active
    }

    fn start(&self) -> Result<()> {
        if self.state.get() != TransactionState::Created {
            return Err(e_fmt!(
                "transaction {} {} cannot start in state {:?}",
                self.rr_type,
                self.name,
                self.state.get()
            ));
        }
        check_name(&self.name)?;
        self.state.set(TransactionState::Active);

        if self.mode.uses_cache() {
            self.serve_records_from_cache();
            if !self.is_active() {
                return Ok(());
            }
        }

        if self.mode.uses_network() {
            if let Err(e) = self.query_and_listen() {
                debug!("transaction {} {} failed to start: {}", self.rr_type, self.name, e);
                self.reset(TransactionState::Destroyed);
                return Err(e);
            }
            return Ok(());
        }

        self.signal_transaction_over();
        Ok(())
    }

    /// Reports the cached records, or the cached NSEC that denies the type.
    fn serve_records_from_cache(&self) {
        let Some(core) = self.client.core() else {
            return;
        };

        let records = core.query_cache(self.rr_type, &self.name);
        let mut denied = false;
        if records.is_empty() {
            denied = core
                .query_cache(RRType::NSEC, &self.name)
                .first()
                .map_or(false, |record| match record.rdata() {
                    RecordRdata::Nsec(nsec) => !nsec.get_bit(self.rr_type as usize),
                    _ => false,
                });
        }
        drop(core);

        for record in records.iter() {
            self.trigger_callback(TransactionResult::Record(record));
            if !self.is_active() {
                return;
            }
        }
        if denied {
            self.trigger_callback(TransactionResult::Nsec);
        }
    }

    fn query_and_listen(&self) -> Result<()> {
        let proxy = TransactionProxy(self.weak_self.clone());
        let mut listener =
            MdnsListener::new(self.client.clone(), self.rr_type, &self.name, Box::new(proxy));
        listener.start()?;

        let core = listener
            .inner
            .core
            .borrow()
            .clone()
            .ok_or_else(|| e_fmt!("listener started without a core"))?;
        *self.listener.borrow_mut() = Some(listener);
        core.send_query(self.rr_type, &self.name)?;

        let timeout = match self.mode.results {
            ResultMode::Single => Some(
                self.mode
                    .timeout
                    .unwrap_or_else(|| self.client.config().transaction_timeout()),
            ),
            ResultMode::Multi => self.mode.timeout,
        };
        if let Some(timeout) = timeout {
            let weak = self.weak_self.clone();
            let task = self.client.scheduler().post_delayed(
                timeout,
                Box::new(move || {
                    if let Some(transaction) = weak.upgrade() {
                        transaction.timeout_task.set(None);
                        transaction.signal_transaction_over();
                    }
                }),
            );
            self.timeout_task.set(Some(task));
        }
        Ok(())
    }

    fn signal_transaction_over(&self) {
        match self.mode.results {
            ResultMode::Single => self.trigger_callback(TransactionResult::NoResults),
            ResultMode::Multi => self.trigger_callback(TransactionResult::Done),
        }
    }

    /// Delivers `result`. A final result resets the transaction before the
    /// callback runs, so the callback sees an inactive transaction.
    fn trigger_callback(&self, result: TransactionResult<'_>) {
        if !self.is_active() {
            return;
        }

        let Some(mut callback) = self.callback.borrow_mut().take() else {
            return;
        };
        if result.is_final(self.mode.results) {
            self.reset(TransactionState::Done);
            callback(result);
            return;
        }

        callback(result);
        if self.is_active() {
            *self.callback.borrow_mut() = Some(callback);
        }
    }

    /// Drops the callback, the listener and the timeout. No callback fires.
    fn reset(&self, state: TransactionState) {
        self.state.set(state);
        self.callback.borrow_mut().take();
        if let Some(task) = self.timeout_task.take() {
            self.client.scheduler().cancel(task);
        }
        let listener = self.listener.borrow_mut().take();
        drop(listener);
    }
}

/// A bounded query for one (name, type) key.
///
/// The callback fires at most once with a final result. Dropping the
/// transaction before that cancels it silently.
pub struct MdnsTransaction {
    inner: Rc<TransactionInner>,
}

impl MdnsTransaction {
    pub(crate) fn new(
        client: Rc<ClientInner>,
        rr_type: RRType,
        name: &str,
        mode: TransactionMode,
        callback: TransactionCallback,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak_self| TransactionInner {
            weak_self: weak_self.clone(),
            name: name.to_string(),
            rr_type,
            mode,
            state: Cell::new(TransactionState::Created),
            callback: RefCell::new(Some(callback)),
            listener: RefCell::new(None),
            timeout_task: Cell::new(None),
            client,
        });
        Self { inner }
    }

    /// Serves the cache and queries the network per the mode. The callback
    /// may run before this returns.
    pub fn start(&mut self) -> Result<()> {
        let inner = self.inner.clone();
        inner.start()
    }

    /// True between [MdnsTransaction::start] and completion.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state.get()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn rr_type(&self) -> RRType {
        self.inner.rr_type
    }

    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }
}

impl Drop for MdnsTransaction {
    fn drop(&mut self) {
        if matches!(
            self.inner.state.get(),
            TransactionState::Created | TransactionState::Active
        ) {
            self.inner.reset(TransactionState::Destroyed);
        }
    }
}
