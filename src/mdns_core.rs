//! The engine shared by all listeners and transactions of one client.
//!
//! [Core] owns the record cache and the multicast connection. Every packet
//! from the connection is parsed here, merged into the cache, and the
//! resulting updates are fanned out to the listeners registered on the
//! affected (name, type) keys.

#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::{
    client::ClientInner,
    config::MdnsConfig,
    connection::{Connection, ConnectionDelegate, SocketFactory},
    dns_cache::{CacheUpdate, MdnsCache},
    dns_parser::{
        canonical_name, DnsHeader, DnsOutgoing, DnsRecordParser, RRType, CLASS_IN, CLASS_MASK,
        FLAGS_QR_QUERY, MSG_HEADER_LEN,
    },
    error::{Error, Result},
    listener::{ListenerInner, UpdateType},
    record_rdata::{NsecRdata, ParsedRecord, RecordRdata},
    scheduler::{Scheduler, TaskId},
};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    net::SocketAddr,
    rc::{Rc, Weak},
    time::Duration,
};

/// Listeners are keyed by canonical name and record type.
type ListenerKey = (String, RRType);

/// A notification collected while a packet is processed, dispatched once the
/// whole packet is merged into the cache.
enum Notification {
    Update(UpdateType, ParsedRecord),
    Nsec(ListenerKey),
}

pub(crate) struct Core {
    weak_self: Weak<Core>,
    scheduler: Rc<dyn Scheduler>,
    cache: RefCell<MdnsCache>,
    connection: Connection,
    listeners: RefCell<BTreeMap<ListenerKey, Vec<Weak<ListenerInner>>>>,

    /// The pending cleanup task and the expiry it was armed for.
    cleanup_task: Cell<Option<(TaskId, u64)>>,

    failed: Cell<bool>,
    client: Weak<ClientInner>,
}

impl Core {
    pub(crate) fn new(
        client: Weak<ClientInner>,
        scheduler: Rc<dyn Scheduler>,
        config: &MdnsConfig,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self: &Weak<Core>| {
            let delegate: Weak<dyn ConnectionDelegate> = weak_self.clone();
            Self {
                weak_self: weak_self.clone(),
                scheduler,
                cache: RefCell::new(MdnsCache::new()),
                connection: Connection::new(
                    delegate,
                    config.ip_versions().to_vec(),
                    config.send_policy(),
                    config.require_all_families(),
                ),
                listeners: RefCell::new(BTreeMap::new()),
                cleanup_task: Cell::new(None),
                failed: Cell::new(false),
                client,
            }
        })
    }

    /// Opens the multicast sockets.
    pub(crate) fn init(&self, factory: &dyn SocketFactory) -> Result<()> {
        self.connection.init(factory)
    }

    /// Sends a one-question query for `name`.
    pub(crate) fn send_query(&self, rr_type: RRType, name: &str) -> Result<()> {
        if self.failed.get() {
            return Err(Error::Transport("connection already failed".to_string()));
        }

        let mut out = DnsOutgoing::new(FLAGS_QR_QUERY);
        out.add_question(name, rr_type)?;
        let packet = out.to_data_on_wire()?;
        trace!("send query {} {}: {} bytes", rr_type, name, packet.len());
        self.connection.send(&packet)
    }

    pub(crate) fn add_listener(&self, listener: &Rc<ListenerInner>) {
        let key = (canonical_name(listener.name()), listener.rr_type());
        self.listeners
            .borrow_mut()
            .entry(key)
            .or_default()
            .push(Rc::downgrade(listener));
    }

    /// Drops `listener` from its key, and the key once it has no listener.
    pub(crate) fn remove_listener(&self, listener: &ListenerInner) {
        let key = (canonical_name(listener.name()), listener.rr_type());
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(&key) else {
            return;
        };

        list.retain(|weak| !std::ptr::eq(weak.as_ptr(), listener) && weak.strong_count() > 0);
        if list.is_empty() {
            listeners.remove(&key);
        }
    }

    /// Live cached records of `name`; every type if `rr_type` is `ANY`.
    pub(crate) fn query_cache(&self, rr_type: RRType, name: &str) -> Vec<ParsedRecord> {
        let now = self.scheduler.now_millis();
        let cache = self.cache.borrow();
        let records = if rr_type == RRType::ANY {
            cache.find_records(name, rr_type, now).into_iter().cloned().collect()
        } else {
            cache.lookup(name, rr_type, now).cloned().into_iter().collect()
        };
        records
    }

    fn handle_response(&self, packet: &[u8]) {
        let header = match DnsHeader::parse(packet) {
            Ok(header) => header,
            Err(e) => {
                debug!("drop packet: {}", e);
                return;
            }
        };
        if !header.is_response() {
            return;
        }

        trace!(
            "handle_response: {} answers {} authorities {} additionals",
            header.num_answers,
            header.num_authorities,
            header.num_additionals
        );

        let mut parser = DnsRecordParser::new(packet, MSG_HEADER_LEN);
        for _ in 0..header.num_questions {
            if !parser.skip_question() {
                debug!("drop packet: malformed question");
                return;
            }
        }

        let now = self.scheduler.now_millis();
        let mut notifications = Vec::new();
        for _ in 0..header.num_records() {
            let Some(resource) = parser.read_record() else {
                debug!("abandon packet at offset {}", parser.offset());
                break;
            };
            if resource.class & CLASS_MASK != CLASS_IN {
                continue;
            }
            let Some(record) = ParsedRecord::from_resource(&resource, &parser, now) else {
                continue;
            };

            if let RecordRdata::Nsec(nsec) = record.rdata() {
                if record.ttl() > 0 {
                    self.apply_nsec(record.name(), nsec, &mut notifications);
                }
            }

            let update = self.cache.borrow_mut().upsert(record.clone());
            trace!("{:?} {} {}", update, record.rr_type(), record.name());
            let update = match update {
                CacheUpdate::Added => UpdateType::Added,
                CacheUpdate::Changed => UpdateType::Changed,
                CacheUpdate::Removed => UpdateType::Removed,
                CacheUpdate::Unchanged => continue,
            };
            notifications.push(Notification::Update(update, record));
        }

        self.schedule_cleanup();
        for notification in notifications {
            self.dispatch(notification);
        }
    }

    /// Drops the cached records of `name` whose types the NSEC denies, and
    /// queues the absence for the listeners waiting on such types.
    fn apply_nsec(
        &self,
        name: &str,
        nsec: &NsecRdata,
        notifications: &mut Vec<Notification>,
    ) {
        let now = self.scheduler.now_millis();
        let denied: Vec<RRType> = self
            .cache
            .borrow()
            .find_records(name, RRType::ANY, now)
            .into_iter()
            .map(|record| record.rr_type())
            .filter(|ty| *ty != RRType::NSEC && !nsec.get_bit(*ty as usize))
            .collect();

        for ty in denied {
            if let Some(removed) = self.cache.borrow_mut().remove(name, ty) {
                notifications.push(Notification::Update(UpdateType::Removed, removed));
            }
        }

        let canonical = canonical_name(name);
        let listeners = self.listeners.borrow();
        for (key, _) in listeners.iter().filter(|((n, _), _)| *n == canonical) {
            let ty = key.1;
            if ty != RRType::ANY && ty != RRType::NSEC && !nsec.get_bit(ty as usize) {
                notifications.push(Notification::Nsec(key.clone()));
            }
        }
    }

    /// Calls the listeners of one notification. No borrow is held while a
    /// delegate runs, and a listener stopped by an earlier delegate is skipped.
    fn dispatch(&self, notification: Notification) {
        let key = match &notification {
            Notification::Update(_, record) => (canonical_name(record.name()), record.rr_type()),
            Notification::Nsec(key) => key.clone(),
        };

        for listener in self.listeners_of(&key) {
            if !listener.is_started() || self.failed.get() {
                continue;
            }
            match &notification {
                Notification::Update(update, record) => listener.alert_delegate(*update, record),
                Notification::Nsec(_) => listener.alert_nsec(),
            }
        }
    }

    fn listeners_of(&self, key: &ListenerKey) -> Vec<Rc<ListenerInner>> {
        self.listeners
            .borrow()
            .get(key)
            .map(|list| list.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Arms the cleanup task for the earliest expiry in the cache, unless it
    /// is already armed for it.
    fn schedule_cleanup(&self) {
        let next = self.cache.borrow().earliest_expiry();
        let current = self.cleanup_task.get();
        if current.map(|(_, deadline)| deadline) == next {
            return;
        }

        if let Some((task, _)) = current {
            self.scheduler.cancel(task);
        }
        self.cleanup_task.set(None);

        let Some(deadline) = next else {
            return;
        };
        let delay = deadline.saturating_sub(self.scheduler.now_millis());
        let weak = self.weak_self.clone();
        let task = self.scheduler.post_delayed(
            Duration::from_millis(delay),
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.do_cleanup();
                }
            }),
        );
        self.cleanup_task.set(Some((task, deadline)));
    }

    fn do_cleanup(&self) {
        self.cleanup_task.set(None);
        if self.failed.get() {
            return;
        }

        let now = self.scheduler.now_millis();
        let mut evicted = Vec::new();
        self.cache
            .borrow_mut()
            .cleanup(now, |record| evicted.push(record.clone()));
        self.schedule_cleanup();

        for record in evicted {
            self.dispatch(Notification::Update(UpdateType::Removed, record));
        }
    }

    fn cancel_cleanup(&self) {
        if let Some((task, _)) = self.cleanup_task.take() {
            self.scheduler.cancel(task);
        }
    }
}

impl ConnectionDelegate for Core {
    fn handle_packet(&self, packet: &[u8], source: SocketAddr) {
        if self.failed.get() {
            return;
        }
        trace!("packet of {} bytes from {}", packet.len(), source);
        self.handle_response(packet);
    }

    fn on_connection_error(&self, error: Error) {
        if self.failed.replace(true) {
            return;
        }
        debug!("mDNS core failed: {}", error);
        self.cancel_cleanup();

        if let Some(client) = self.client.upgrade() {
            client.on_core_failure(error.clone());
        }

        let listeners: Vec<Rc<ListenerInner>> = self
            .listeners
            .borrow()
            .values()
            .flat_map(|list| list.iter().filter_map(Weak::upgrade))
            .collect();
        for listener in listeners {
            if listener.is_started() {
                listener.alert_connection_error(&error);
            }
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.cancel_cleanup();
    }
}
