//! The client facade.
//!
//! [MdnsClient] hands out listeners and transactions and counts how many of
//! them are started. The [Core](crate::mdns_core::Core) with its sockets and
//! cache only exists while that count is above zero: it is created on the
//! first start and torn down one scheduling turn after the last stop.

#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::{
    config::MdnsConfig,
    connection::SocketFactory,
    dns_parser::RRType,
    error::{Error, Result},
    listener::{
        ListenerDelegate, MdnsListener, MdnsTransaction, TransactionMode, TransactionResult,
    },
    mdns_core::Core,
    scheduler::{Scheduler, TaskId},
};
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

pub(crate) struct ClientInner {
    weak_self: Weak<ClientInner>,
    config: MdnsConfig,
    scheduler: Rc<dyn Scheduler>,
    socket_factory: Rc<dyn SocketFactory>,
    core: RefCell<Option<Rc<Core>>>,

    /// Number of started listeners, including those inside transactions.
    listen_refs: Cell<usize>,
    teardown_task: Cell<Option<TaskId>>,

    /// Set once the connection failed. Sticky for the life of the client.
    failure: RefCell<Option<Error>>,
}

impl ClientInner {
    pub(crate) fn config(&self) -> &MdnsConfig {
        &self.config
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn core(&self) -> Option<Rc<Core>> {
        self.core.borrow().clone()
    }

    /// Takes a reference on the core, creating and initializing it if there
    /// is none. A pending teardown is cancelled.
    pub(crate) fn add_listen_ref(&self) -> Result<Rc<Core>> {
        if let Some(failure) = self.failure.borrow().as_ref() {
            return Err(failure.clone());
        }

        if let Some(task) = self.teardown_task.take() {
            trace!("cancel core teardown");
            self.scheduler.cancel(task);
        }

        let existing = self.core();
        let core = match existing {
            Some(core) => core,
            None => {
                let core = Core::new(self.weak_self.clone(), self.scheduler.clone(), &self.config);
                if let Err(e) = core.init(self.socket_factory.as_ref()) {
                    debug!("failed to init mDNS core: {}", e);
                    return Err(e);
                }
                trace!("mDNS core created");
                *self.core.borrow_mut() = Some(core.clone());
                core
            }
        };

        self.listen_refs.set(self.listen_refs.get() + 1);
        Ok(core)
    }

    /// Gives back one reference. The last one schedules the core teardown
    /// for the next turn.
    pub(crate) fn sub_listen_ref(&self) {
        let refs = self.listen_refs.get().saturating_sub(1);
        self.listen_refs.set(refs);
        if refs > 0 || self.teardown_task.get().is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let task = self.scheduler.post_delayed(
            Duration::ZERO,
            Box::new(move || {
                if let Some(client) = weak.upgrade() {
                    client.teardown_task.set(None);
                    if client.listen_refs.get() == 0 {
                        client.shutdown_core();
                    }
                }
            }),
        );
        self.teardown_task.set(Some(task));
    }

    /// Called by the core when its connection failed.
    pub(crate) fn on_core_failure(&self, error: Error) {
        *self.failure.borrow_mut() = Some(error);
        if let Some(task) = self.teardown_task.take() {
            self.scheduler.cancel(task);
        }
        self.shutdown_core();
    }

    fn shutdown_core(&self) {
        let core = self.core.borrow_mut().take();
        if core.is_some() {
            trace!("mDNS core torn down");
        }
        drop(core);
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.teardown_task.take() {
            self.scheduler.cancel(task);
        }
    }
}

/// An mDNS client running on one [Scheduler].
///
/// Cloning gives another handle to the same client.
#[derive(Clone)]
pub struct MdnsClient {
    inner: Rc<ClientInner>,
}

impl MdnsClient {
    /// Creates a client with the default [MdnsConfig].
    pub fn new(scheduler: Rc<dyn Scheduler>, socket_factory: Rc<dyn SocketFactory>) -> Self {
        Self::with_config(MdnsConfig::default(), scheduler, socket_factory)
    }

    pub fn with_config(
        config: MdnsConfig,
        scheduler: Rc<dyn Scheduler>,
        socket_factory: Rc<dyn SocketFactory>,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak_self| ClientInner {
            weak_self: weak_self.clone(),
            config,
            scheduler,
            socket_factory,
            core: RefCell::new(None),
            listen_refs: Cell::new(0),
            teardown_task: Cell::new(None),
            failure: RefCell::new(None),
        });
        Self { inner }
    }

    /// Creates a listener for `name`. It does nothing until started.
    pub fn create_listener(
        &self,
        rr_type: RRType,
        name: &str,
        delegate: impl ListenerDelegate + 'static,
    ) -> MdnsListener {
        MdnsListener::new(self.inner.clone(), rr_type, name, Box::new(delegate))
    }

    /// Creates a transaction for `name`. It does nothing until started.
    pub fn create_transaction(
        &self,
        rr_type: RRType,
        name: &str,
        mode: TransactionMode,
        callback: impl FnMut(TransactionResult<'_>) + 'static,
    ) -> MdnsTransaction {
        MdnsTransaction::new(self.inner.clone(), rr_type, name, mode, Box::new(callback))
    }

    /// Whether the sockets are open.
    pub fn is_listening(&self) -> bool {
        self.inner.core.borrow().is_some()
    }

    /// The connection failure, if any. Once failed, a client stays failed.
    pub fn failure(&self) -> Option<Error> {
        self.inner.failure.borrow().clone()
    }

    pub fn config(&self) -> &MdnsConfig {
        &self.inner.config
    }
}
