//! The connection pool (§4.3): tracks idle and in-use connections by
//! [`Address`](crate::address::Address), caps per-address and total idle
//! connections, and runs a background cleanup task.

mod io;

pub(crate) use io::BoxedIo;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use tokio::sync::Notify;

use crate::{
    address::{Address, Route},
    config::PoolConfig,
    h2::connection::H2Connection,
    trace::{debug, trace},
};

/// What a pooled connection actually is, once a protocol has been
/// negotiated (§3 data model: "protocol state machine").
pub(crate) enum ConnectionKind {
    /// At most one exchange at a time (§3 invariant (b)). `None` while an
    /// exchange is currently checked out.
    Http1(Mutex<Option<BoxedIo>>),
    Http2(Arc<H2Connection>),
}

/// A pooled connection: socket/session state plus the bookkeeping the pool
/// and coordinator need (§3 data model: "Connection").
pub struct PoolEntry {
    pub(crate) route: Route,
    pub(crate) created_at: Instant,
    idle_since: Mutex<Option<Instant>>,
    pub(crate) no_new_exchanges: AtomicBool,
    alloc_count: AtomicUsize,
    pub(crate) max_exchanges: AtomicUsize,
    pub(crate) kind: ConnectionKind,
}

impl PoolEntry {
    pub(crate) fn new(route: Route, kind: ConnectionKind, max_exchanges: usize) -> Arc<Self> {
        Arc::new(PoolEntry {
            route,
            created_at: Instant::now(),
            idle_since: Mutex::new(None),
            no_new_exchanges: AtomicBool::new(false),
            alloc_count: AtomicUsize::new(0),
            max_exchanges: AtomicUsize::new(max_exchanges),
            kind,
        })
    }

    /// True if this entry may still accept a new exchange (§3 invariant
    /// (c), (d)).
    pub(crate) fn can_allocate(&self) -> bool {
        if self.no_new_exchanges.load(Ordering::SeqCst) {
            return false;
        }
        match &self.kind {
            ConnectionKind::Http1(slot) => slot.lock().unwrap().is_some(),
            ConnectionKind::Http2(h2) => {
                h2.is_open() && h2.live_streams() < self.max_exchanges.load(Ordering::SeqCst)
            }
        }
    }

    pub(crate) fn mark_allocated(&self) {
        self.alloc_count.fetch_add(1, Ordering::SeqCst);
        *self.idle_since.lock().unwrap() = None;
    }

    /// Returns this entry to the idle set if it can still serve future
    /// exchanges (HTTP/2 connections with live streams are never "idle" in
    /// the sense of being evictable, but they do stay in the pool's map).
    pub(crate) fn mark_released(&self) {
        if matches!(&self.kind, ConnectionKind::Http1(_)) || self.live_streams() == 0 {
            *self.idle_since.lock().unwrap() = Some(Instant::now());
        }
    }

    pub(crate) fn live_streams(&self) -> usize {
        match &self.kind {
            ConnectionKind::Http1(slot) => usize::from(slot.lock().unwrap().is_none()),
            ConnectionKind::Http2(h2) => h2.live_streams(),
        }
    }

    fn is_idle(&self) -> bool {
        self.idle_since.lock().unwrap().is_some()
    }

    fn idle_duration(&self) -> Option<Duration> {
        self.idle_since.lock().unwrap().map(|since| since.elapsed())
    }

    /// Idempotent: safe to call more than once.
    pub(crate) fn close(&self) {
        if self.no_new_exchanges.swap(true, Ordering::SeqCst) {
            return;
        }
        if let ConnectionKind::Http2(h2) = &self.kind {
            h2.shutdown();
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.no_new_exchanges.load(Ordering::SeqCst) {
            return false;
        }
        match &self.kind {
            ConnectionKind::Http1(slot) => slot.lock().unwrap().is_some(),
            ConnectionKind::Http2(h2) => h2.is_open(),
        }
    }
}

struct Bucket {
    entries: Vec<Arc<PoolEntry>>,
}

/// Tracks every live connection, keyed by [`Address`] (§3, §4.3).
pub struct ConnectionPool {
    config: PoolConfig,
    buckets: Mutex<HashMap<AddressKey, Bucket>>,
    notify: Arc<Notify>,
}

/// `Address` isn't `Hash`-friendly across `Arc<dyn ...>` trait object
/// fields in a way that's cheap to use as a map key directly here, so the
/// pool keys on the host/port/scheme triple, and disambiguates within a
/// bucket by `Address`'s own `PartialEq` (covers the TLS/protocol fields
/// the triple doesn't).
#[derive(Clone, PartialEq, Eq, Hash)]
struct AddressKey {
    host: Arc<str>,
    port: u16,
    https: bool,
}

fn key_for(address: &Address) -> AddressKey {
    AddressKey {
        host: Arc::from(address.host()),
        port: address.port(),
        https: address.is_https(),
    }
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool {
            config,
            buckets: Mutex::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
        });
        pool.clone().spawn_cleanup_task();
        pool
    }

    /// Find an idle or shareable (HTTP/2) connection for `address`,
    /// ignoring the `Route`'s specific peer IP — route-agnostic reuse is
    /// tried before route planning (§4.2 point 1).
    pub(crate) fn acquire_for_address(&self, address: &Address) -> Option<Arc<PoolEntry>> {
        let buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get(&key_for(address))?;
        bucket
            .entries
            .iter()
            .find(|e| e.route.address() == address && e.can_allocate())
            .cloned()
    }

    /// Find a connection already open for exactly this `Route`.
    pub(crate) fn acquire_for_route(&self, route: &Route) -> Option<Arc<PoolEntry>> {
        let buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get(&key_for(route.address()))?;
        bucket
            .entries
            .iter()
            .find(|e| e.route.address() == route.address() && e.route.peer() == route.peer() && e.can_allocate())
            .cloned()
    }

    /// HTTP/2 connection coalescing (§4.2 point 6): an existing connection
    /// whose address could cover `address` (same scheme/port/TLS config),
    /// for the caller to further verify against the certificate's SANs.
    pub(crate) fn candidate_for_coalescing(&self, address: &Address) -> Option<Arc<PoolEntry>> {
        let buckets = self.buckets.lock().unwrap();
        buckets.values().flat_map(|b| b.entries.iter()).find(|e| {
            matches!(&e.kind, ConnectionKind::Http2(h2) if h2.is_open())
                && e.route.address().coalesces_with(address)
        }).cloned()
    }

    pub(crate) fn insert(&self, entry: Arc<PoolEntry>) {
        let key = key_for(entry.route.address());
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(key).or_insert_with(|| Bucket { entries: Vec::new() }).entries.push(entry);
        self.notify.notify_one();
    }

    pub(crate) fn release(&self, entry: &Arc<PoolEntry>) {
        entry.mark_released();
        self.notify.notify_one();
        self.enforce_caps();
    }

    fn enforce_caps(&self) {
        let mut buckets = self.buckets.lock().unwrap();
        for bucket in buckets.values_mut() {
            let idle: Vec<_> = bucket
                .entries
                .iter()
                .filter(|e| e.is_idle())
                .cloned()
                .collect();
            if idle.len() > self.config.max_idle_per_address {
                let excess = idle.len() - self.config.max_idle_per_address;
                let mut sorted = idle;
                sorted.sort_by_key(|e| std::cmp::Reverse(e.idle_duration().unwrap_or_default()));
                for e in sorted.into_iter().take(excess) {
                    e.close();
                }
            }
        }
        self.total_idle_cap(&mut buckets);
        buckets.retain(|_, b| {
            b.entries.retain(|e| !(e.no_new_exchanges.load(Ordering::SeqCst) && e.live_streams() == 0));
            !b.entries.is_empty()
        });
    }

    fn total_idle_cap(&self, buckets: &mut HashMap<AddressKey, Bucket>) {
        let mut all_idle: Vec<Arc<PoolEntry>> = buckets
            .values()
            .flat_map(|b| b.entries.iter().filter(|e| e.is_idle()).cloned())
            .collect();
        if all_idle.len() <= self.config.max_idle_total {
            return;
        }
        all_idle.sort_by_key(|e| std::cmp::Reverse(e.idle_duration().unwrap_or_default()));
        let excess = all_idle.len() - self.config.max_idle_total;
        for e in all_idle.into_iter().take(excess) {
            e.close();
        }
    }

    fn evict_expired(&self) {
        let mut buckets = self.buckets.lock().unwrap();
        for bucket in buckets.values_mut() {
            for entry in &bucket.entries {
                if let Some(idle) = entry.idle_duration() {
                    if idle >= self.config.keep_alive {
                        entry.close();
                    }
                }
            }
        }
        buckets.retain(|_, b| {
            b.entries.retain(|e| !(e.no_new_exchanges.load(Ordering::SeqCst) && e.live_streams() == 0));
            !b.entries.is_empty()
        });
    }

    fn next_deadline(&self) -> Duration {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .values()
            .flat_map(|b| b.entries.iter())
            .filter_map(|e| e.idle_duration())
            .map(|idle| self.config.keep_alive.saturating_sub(idle))
            .min()
            .unwrap_or(self.config.keep_alive)
            .max(Duration::from_millis(50))
    }

    fn spawn_cleanup_task(self: Arc<Self>) {
        let notify = self.notify.clone();
        tokio::spawn(async move {
            loop {
                let deadline = self.next_deadline();
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        trace!("pool cleanup tick");
                        self.evict_expired();
                    }
                    _ = notify.notified() => {
                        self.enforce_caps();
                    }
                }
            }
        });
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .values()
            .flat_map(|b| b.entries.iter())
            .filter(|e| e.is_idle())
            .count()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool").field("idle", &self.idle_count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dns::StaticDns, proxy::NoProxySelector};

    fn route() -> Route {
        let addr = Address::new(
            "a.test",
            443,
            true,
            Arc::new(StaticDns::default()),
            None,
            Arc::new([crate::address::Protocol::Http1_1]),
            Arc::new(NoProxySelector),
            None,
        );
        Route::new(addr, None, "127.0.0.1".parse().unwrap())
    }

    fn http1_entry() -> Arc<PoolEntry> {
        PoolEntry::new(route(), ConnectionKind::Http1(Mutex::new(Some(io::BoxedIo::null()))), 1)
    }

    #[test]
    fn idle_cap_per_address_evicts_oldest() {
        let pool = ConnectionPool::new(PoolConfig { max_idle_per_address: 1, max_idle_total: 10, keep_alive: Duration::from_secs(60) });
        let e1 = http1_entry();
        let e2 = http1_entry();
        pool.insert(e1.clone());
        pool.insert(e2.clone());
        e1.mark_released();
        std::thread::sleep(Duration::from_millis(5));
        e2.mark_released();
        pool.enforce_caps();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn closed_entry_cannot_allocate() {
        let e = http1_entry();
        e.mark_released();
        assert!(e.can_allocate());
        e.close();
        assert!(!e.can_allocate());
    }
}
