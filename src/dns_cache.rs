//! A cache for DNS records.
//!
//! Holds the latest record per (name, type) and classifies every update so
//! that the core knows which listeners to alert.

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::{
    dns_parser::{canonical_name, RRType},
    record_rdata::ParsedRecord,
};
use std::collections::{BTreeMap, HashMap};

/// Outcome of [MdnsCache::upsert].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// No record was cached for the key.
    Added,

    /// A record with different rdata was replaced.
    Changed,

    /// Same rdata as the cached record. Its TTL was refreshed.
    Unchanged,

    /// A goodbye (TTL 0) dropped the cached record.
    Removed,
}

/// A cache for all types of DNS records, at most one per (name, type).
pub(crate) struct MdnsCache {
    /// Records indexed by canonical name, then by type.
    records: HashMap<String, BTreeMap<RRType, ParsedRecord>>,

    /// Earliest expiration among all records, UNIX time in millis.
    next_expiration: Option<u64>,
}

impl MdnsCache {
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_expiration: None,
        }
    }

    /// Inserts `record`, replacing any record for the same (name, type).
    ///
    /// A record with TTL 0 is a goodbye: it removes the cached record and is
    /// never stored itself.
    pub(crate) fn upsert(&mut self, record: ParsedRecord) -> CacheUpdate {
        let key = canonical_name(record.name());
        let rr_type = record.rr_type();

        let update = if record.ttl() == 0 {
            let removed = self.remove(&key, rr_type).is_some();
            if removed {
                CacheUpdate::Removed
            } else {
                CacheUpdate::Unchanged
            }
        } else {
            let by_type = self.records.entry(key).or_default();
            match by_type.insert(rr_type, record) {
                None => CacheUpdate::Added,
                Some(old) => {
                    let new = &by_type[&rr_type];
                    if old.rdata().is_equal(new.rdata()) {
                        CacheUpdate::Unchanged
                    } else {
                        CacheUpdate::Changed
                    }
                }
            }
        };

        self.recompute_next_expiration();
        update
    }

    /// Returns the live record for (name, type), if any.
    pub(crate) fn lookup(&self, name: &str, rr_type: RRType, now: u64) -> Option<&ParsedRecord> {
        self.records
            .get(&canonical_name(name))?
            .get(&rr_type)
            .filter(|record| !record.is_expired(now))
    }

    /// Returns the live records of `name`, all types if `rr_type` is `ANY`.
    /// Ordered by type.
    pub(crate) fn find_records(
        &self,
        name: &str,
        rr_type: RRType,
        now: u64,
    ) -> Vec<&ParsedRecord> {
        let Some(by_type) = self.records.get(&canonical_name(name)) else {
            return Vec::new();
        };

        by_type
            .values()
            .filter(|record| rr_type == RRType::ANY || record.rr_type() == rr_type)
            .filter(|record| !record.is_expired(now))
            .collect()
    }

    /// Drops the record for (name, type) and returns it.
    pub(crate) fn remove(&mut self, name: &str, rr_type: RRType) -> Option<ParsedRecord> {
        let key = canonical_name(name);
        let by_type = self.records.get_mut(&key)?;
        let removed = by_type.remove(&rr_type);
        if by_type.is_empty() {
            self.records.remove(&key);
        }
        if removed.is_some() {
            self.recompute_next_expiration();
        }
        removed
    }

    /// Number of cached records across all names and types.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    /// UNIX time in millis when the next record expires.
    pub(crate) fn earliest_expiry(&self) -> Option<u64> {
        self.next_expiration
    }

    /// Evicts every record expired at `now`, calling `on_evicted` once for each.
    pub(crate) fn cleanup(&mut self, now: u64, mut on_evicted: impl FnMut(&ParsedRecord)) {
        if self.next_expiration.map_or(true, |next| next > now) {
            return;
        }

        self.records.retain(|_, by_type| {
            by_type.retain(|_, record| {
                if record.is_expired(now) {
                    trace!("evict expired {} {}", record.rr_type(), record.name());
                    on_evicted(record);
                    false
                } else {
                    true
                }
            });
            !by_type.is_empty()
        });

        self.recompute_next_expiration();
    }

    fn recompute_next_expiration(&mut self) {
        self.next_expiration = self
            .records
            .values()
            .flat_map(|by_type| by_type.values())
            .map(|record| record.expiration())
            .min();
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheUpdate, MdnsCache};
    use crate::{
        dns_parser::RRType,
        record_rdata::{NsecRdata, ParsedRecord, RecordRdata},
    };
    use std::net::{Ipv4Addr, Ipv6Addr};
    use test_log::test;

    const T0: u64 = 1_000_000;

    fn a_record(name: &str, ip: [u8; 4], ttl: u32, now: u64) -> ParsedRecord {
        ParsedRecord::new(name, ttl, RecordRdata::A(Ipv4Addr::from(ip)), now)
    }

    #[test]
    fn test_upsert_classification() {
        let mut cache = MdnsCache::new();
        let name = "ghs.l.google.com";

        let update = cache.upsert(a_record(name, [74, 125, 95, 121], 53, T0));
        assert_eq!(update, CacheUpdate::Added);

        let update = cache.upsert(a_record(name, [74, 125, 95, 121], 53, T0 + 1000));
        assert_eq!(update, CacheUpdate::Unchanged);

        let update = cache.upsert(a_record(name, [74, 125, 95, 122], 53, T0 + 2000));
        assert_eq!(update, CacheUpdate::Changed);

        let update = cache.upsert(a_record(name, [74, 125, 95, 122], 0, T0 + 3000));
        assert_eq!(update, CacheUpdate::Removed);
        assert!(cache.lookup(name, RRType::A, T0 + 3000).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_goodbye_without_entry() {
        let mut cache = MdnsCache::new();
        let update = cache.upsert(a_record("nothing.local", [10, 0, 0, 1], 0, T0));
        assert_eq!(update, CacheUpdate::Unchanged);
        assert_eq!(cache.len(), 0);
        assert!(cache.earliest_expiry().is_none());
    }

    #[test]
    fn test_unchanged_refreshes_ttl() {
        let mut cache = MdnsCache::new();
        cache.upsert(a_record("host.local", [10, 0, 0, 1], 5, T0));
        cache.upsert(a_record("host.local", [10, 0, 0, 1], 5, T0 + 4000));
        assert!(cache.lookup("host.local", RRType::A, T0 + 6000).is_some());
        assert_eq!(cache.earliest_expiry(), Some(T0 + 9000));
    }

    #[test]
    fn test_one_entry_per_name_and_type() {
        let mut cache = MdnsCache::new();
        let name = "host.local";
        cache.upsert(a_record(name, [10, 0, 0, 1], 120, T0));
        cache.upsert(a_record("HOST.local.", [10, 0, 0, 2], 120, T0));
        cache.upsert(ParsedRecord::new(
            name,
            120,
            RecordRdata::Aaaa(Ipv6Addr::LOCALHOST),
            T0,
        ));

        assert_eq!(cache.len(), 2);
        let a = cache.lookup(name, RRType::A, T0).unwrap();
        assert_eq!(a.rdata(), &RecordRdata::A(Ipv4Addr::new(10, 0, 0, 2)));

        let all = cache.find_records(name, RRType::ANY, T0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].rr_type(), RRType::A);
        assert_eq!(all[1].rr_type(), RRType::AAAA);
        assert_eq!(cache.find_records(name, RRType::AAAA, T0).len(), 1);
        assert!(cache.find_records(name, RRType::SRV, T0).is_empty());
    }

    #[test]
    fn test_expiration() {
        let mut cache = MdnsCache::new();
        let name = "printer.local";
        cache.upsert(a_record(name, [192, 168, 1, 5], 5, T0));
        cache.upsert(ParsedRecord::new(
            name,
            60,
            RecordRdata::Nsec(NsecRdata::from_types(name, &[RRType::A])),
            T0,
        ));
        assert_eq!(cache.earliest_expiry(), Some(T0 + 5000));

        assert!(cache.lookup(name, RRType::A, T0 + 4000).is_some());
        assert!(cache.lookup(name, RRType::A, T0 + 6000).is_none());

        let mut evicted = Vec::new();
        cache.cleanup(T0 + 4000, |record| evicted.push(record.clone()));
        assert!(evicted.is_empty());

        cache.cleanup(T0 + 5000, |record| evicted.push(record.clone()));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].rr_type(), RRType::A);
        assert_eq!(cache.earliest_expiry(), Some(T0 + 60_000));

        cache.cleanup(T0 + 6000, |record| evicted.push(record.clone()));
        assert_eq!(evicted.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut cache = MdnsCache::new();
        cache.upsert(a_record("host.local", [10, 0, 0, 1], 120, T0));
        assert!(cache.remove("host.local", RRType::AAAA).is_none());
        assert!(cache.remove("host.local", RRType::A).is_some());
        assert!(cache.earliest_expiry().is_none());
    }
}
