//! Listener conflict index.
//!
//! # Responsibilities
//! - Remember which listener owns which (transport, port, prefix) coverage
//! - Reject a new binding whose coverage overlaps an existing one
//!
//! # Design Decisions
//! - Records are bucketed by (transport, port, family) in a `BTreeMap`, and
//!   within a bucket keyed by their precomputed network address
//! - CIDR ranges either nest or are disjoint, so an overlap is either a
//!   shorter prefix containing the new network (probe each shorter mask)
//!   or a longer prefix inside it (one range scan)
//! - Scope ids only separate records when both sides carry one
//! - Coarse `RwLock`: writes happen once per listener during open

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::net::address::{BoundAddress, Family, Transport};

/// Identity of a listener: owning server and declaration position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ListenerId {
    pub server: String,
    pub position: usize,
}

impl ListenerId {
    pub fn new(server: impl Into<String>, position: usize) -> Self {
        Self {
            server: server.into(),
            position,
        }
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server {} listen[{}]", self.server, self.position)
    }
}

/// What a listener claims once its socket is about to open. Listeners that
/// do not bind a network address (control sockets, files) carry `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAddressRecord {
    pub address: Option<BoundAddress>,
    pub owner: ListenerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BucketKey {
    transport: Transport,
    port: u16,
    family: Family,
}

impl BucketKey {
    fn of(address: &BoundAddress) -> Self {
        Self {
            transport: address.transport(),
            port: address.port(),
            family: address.family(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    address: BoundAddress,
    owner: ListenerId,
}

/// network address → records starting there (several only when scope ids
/// keep them apart).
type Bucket = BTreeMap<u128, Vec<Entry>>;

/// Index of every bound listener address in the process.
#[derive(Debug, Default)]
pub struct ConflictIndex {
    buckets: RwLock<BTreeMap<BucketKey, Bucket>>,
}

impl ConflictIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner of any record overlapping `address`.
    pub fn find(&self, address: &BoundAddress) -> Option<ListenerId> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        find_in(&buckets, address).map(|entry| entry.owner.clone())
    }

    /// Insert `record` unless its coverage overlaps an existing one.
    ///
    /// Returns `false` on conflict, leaving the index untouched. Records
    /// without an address always succeed and are not indexed.
    pub fn record(&self, record: &BoundAddressRecord) -> bool {
        self.try_record(record).is_ok()
    }

    /// Like [`record`](Self::record), returning the owner of the
    /// overlapping record on conflict.
    pub fn try_record(&self, record: &BoundAddressRecord) -> Result<(), ListenerId> {
        let Some(address) = record.address else {
            return Ok(());
        };

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = find_in(&buckets, &address) {
            return Err(existing.owner.clone());
        }

        buckets
            .entry(BucketKey::of(&address))
            .or_default()
            .entry(address.network())
            .or_default()
            .push(Entry {
                address,
                owner: record.owner.clone(),
            });
        Ok(())
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.values().flat_map(|b| b.values()).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed records in index order.
    pub fn records(&self) -> Vec<BoundAddressRecord> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets
            .values()
            .flat_map(|b| b.values())
            .flatten()
            .map(|entry| BoundAddressRecord {
                address: Some(entry.address),
                owner: entry.owner.clone(),
            })
            .collect()
    }

    /// Drop every record owned by `owner`, returning how many went.
    pub fn remove(&self, owner: &ListenerId) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for bucket in buckets.values_mut() {
            for entries in bucket.values_mut() {
                let before = entries.len();
                entries.retain(|entry| entry.owner != *owner);
                removed += before - entries.len();
            }
            bucket.retain(|_, entries| !entries.is_empty());
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn scopes_compatible(a: &BoundAddress, b: &BoundAddress) -> bool {
    match (a.scope_id(), b.scope_id()) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

fn find_in<'a>(buckets: &'a BTreeMap<BucketKey, Bucket>, address: &BoundAddress) -> Option<&'a Entry> {
    let bucket = buckets.get(&BucketKey::of(address))?;

    // Records with an equal or shorter prefix that contain this network.
    for prefix in 0..=address.prefix() {
        let hit = bucket
            .get(&address.network_at(prefix))
            .into_iter()
            .flatten()
            .find(|entry| entry.address.prefix() == prefix && scopes_compatible(&entry.address, address));
        if hit.is_some() {
            return hit;
        }
    }

    // Records with a longer prefix inside this network.
    bucket
        .range(address.network()..=address.broadcast())
        .flat_map(|(_, entries)| entries)
        .find(|entry| entry.address.prefix() > address.prefix() && scopes_compatible(&entry.address, address))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(spec: &str, transport: Transport, port: u16, server: &str) -> BoundAddressRecord {
        BoundAddressRecord {
            address: Some(BoundAddress::parse(transport, spec, port).unwrap()),
            owner: ListenerId::new(server, 0),
        }
    }

    #[test]
    fn test_wildcard_blocks_specific() {
        let index = ConflictIndex::new();
        assert!(index.record(&record("0.0.0.0/0", Transport::Udp, 1812, "a")));
        assert_eq!(
            index.try_record(&record("10.0.0.5/32", Transport::Udp, 1812, "b")),
            Err(ListenerId::new("a", 0))
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_specific_blocks_wildcard() {
        let index = ConflictIndex::new();
        assert!(index.record(&record("10.0.0.5", Transport::Udp, 1812, "a")));
        let wildcard = record("*", Transport::Udp, 1812, "b");
        assert_eq!(index.find(wildcard.address.as_ref().unwrap()), Some(ListenerId::new("a", 0)));
        assert!(!index.record(&wildcard));
    }

    #[test]
    fn test_remove_frees_address() {
        let index = ConflictIndex::new();
        assert!(index.record(&record("10.0.0.5", Transport::Udp, 1812, "a")));
        assert!(index.record(&record("10.0.0.6", Transport::Udp, 1812, "b")));

        assert_eq!(index.remove(&ListenerId::new("a", 0)), 1);
        assert_eq!(index.remove(&ListenerId::new("a", 0)), 0);
        assert_eq!(index.len(), 1);
        assert!(index.record(&record("*", Transport::Udp, 1813, "c")));
        assert!(!index.record(&record("10.0.0.4/30", Transport::Udp, 1812, "c")));
        assert!(index.record(&record("10.0.0.5", Transport::Udp, 1812, "d")));
    }

    #[test]
    fn test_different_transport_coexists() {
        let index = ConflictIndex::new();
        assert!(index.record(&record("10.0.0.0/24", Transport::Udp, 1812, "a")));
        assert!(index.record(&record("10.0.0.0/24", Transport::Tcp, 1812, "b")));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_disjoint_networks_coexist() {
        let index = ConflictIndex::new();
        assert!(index.record(&record("10.0.0.0/24", Transport::Udp, 1812, "a")));
        assert!(index.record(&record("10.0.1.0/24", Transport::Udp, 1812, "b")));
        assert!(index.record(&record("10.0.0.0/24", Transport::Udp, 1813, "c")));
        assert!(!index.record(&record("10.0.0.0/16", Transport::Udp, 1812, "d")));
        assert!(!index.record(&record("10.0.1.77", Transport::Udp, 1812, "e")));
    }

    #[test]
    fn test_scoped_records() {
        let index = ConflictIndex::new();
        let base = BoundAddress::parse(Transport::Udp, "fe80::1", 1812).unwrap();
        let a = BoundAddressRecord { address: Some(base.with_scope(2)), owner: ListenerId::new("a", 0) };
        let b = BoundAddressRecord { address: Some(base.with_scope(3)), owner: ListenerId::new("b", 0) };
        let c = BoundAddressRecord { address: Some(base), owner: ListenerId::new("c", 0) };

        assert!(index.record(&a));
        assert!(index.record(&b));
        assert!(!index.record(&c));
    }

    #[test]
    fn test_addressless_records_not_indexed() {
        let index = ConflictIndex::new();
        let local = BoundAddressRecord { address: None, owner: ListenerId::new("control", 0) };
        assert!(index.record(&local));
        assert!(index.record(&local));
        assert!(index.is_empty());
    }

    #[test]
    fn test_clear() {
        let index = ConflictIndex::new();
        assert!(index.record(&record("*", Transport::Udp, 1812, "a")));
        index.clear();
        assert!(index.is_empty());
        assert!(index.record(&record("*", Transport::Udp, 1812, "b")));
        assert_eq!(index.records()[0].owner.server, "b");
    }
}
