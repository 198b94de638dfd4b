//! Cluster routing table.
//!
//! The client's cached view of cluster topology: ordered member lists
//! per role, a round-robin cursor per role, and a freshness deadline.
//! Staleness is judged on elapsed monotonic time since construction,
//! never on wall-clock time.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::super::config::{AccessMode, ServerAddress};

/// Role-partitioned routing table with per-role round-robin selection.
///
/// Replaced wholesale on every successful rediscovery; between
/// replacements only targeted removals mutate it.
#[derive(Debug)]
pub struct RoutingTable {
    routers: Vec<ServerAddress>,
    readers: Vec<ServerAddress>,
    writers: Vec<ServerAddress>,
    router_cursor: AtomicUsize,
    reader_cursor: AtomicUsize,
    writer_cursor: AtomicUsize,
    created_at: Instant,
    ttl: Duration,
}

impl RoutingTable {
    pub fn new(
        routers: Vec<ServerAddress>,
        readers: Vec<ServerAddress>,
        writers: Vec<ServerAddress>,
        ttl: Duration,
    ) -> Self {
        Self {
            routers,
            readers,
            writers,
            router_cursor: AtomicUsize::new(0),
            reader_cursor: AtomicUsize::new(0),
            writer_cursor: AtomicUsize::new(0),
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Initial table: seed routers only, no readers or writers, zero
    /// TTL. Stale by construction, so the first acquisition triggers
    /// rediscovery.
    pub fn seeded(routers: Vec<ServerAddress>) -> Self {
        Self::new(routers, Vec::new(), Vec::new(), Duration::ZERO)
    }

    fn next_in(list: &[ServerAddress], cursor: &AtomicUsize) -> Option<ServerAddress> {
        if list.is_empty() {
            return None;
        }
        // Taken modulo the current length: a cursor advanced past a
        // list that has since shrunk can never index out of bounds.
        let index = cursor.fetch_add(1, Ordering::Relaxed) % list.len();
        Some(list[index].clone())
    }

    /// Next router in round-robin order, `None` when the role is empty.
    pub fn next_router(&self) -> Option<ServerAddress> {
        Self::next_in(&self.routers, &self.router_cursor)
    }

    /// Next reader in round-robin order, `None` when the role is empty.
    pub fn next_reader(&self) -> Option<ServerAddress> {
        Self::next_in(&self.readers, &self.reader_cursor)
    }

    /// Next writer in round-robin order, `None` when the role is empty.
    pub fn next_writer(&self) -> Option<ServerAddress> {
        Self::next_in(&self.writers, &self.writer_cursor)
    }

    /// Whether the table must be rediscovered before serving `mode`.
    ///
    /// A table with zero routers is always stale regardless of TTL:
    /// without routers no further rediscovery would be reachable.
    pub fn is_stale(&self, mode: AccessMode) -> bool {
        if self.routers.is_empty() {
            return true;
        }
        match mode {
            AccessMode::Read if self.readers.is_empty() => return true,
            AccessMode::Write if self.writers.is_empty() => return true,
            _ => {}
        }
        self.is_expired()
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }

    /// Remove a member from every role. A single connectivity failure
    /// demotes a server from all duties at once.
    pub fn remove(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// Remove a member from the writer role only, leaving it eligible
    /// as a router or reader.
    pub fn remove_writer(&mut self, address: &ServerAddress) {
        self.writers.retain(|a| a != address);
    }

    /// Append router candidates not already known.
    pub fn add_routers<'a, I: IntoIterator<Item = &'a ServerAddress>>(&mut self, addresses: I) {
        for address in addresses {
            if !self.routers.contains(address) {
                self.routers.push(address.clone());
            }
        }
    }

    /// Union of all role lists, used to reconcile the connection
    /// pool's address set. Deduplicated, so reconciliation stays
    /// idempotent for members holding several roles.
    pub fn all(&self) -> HashSet<ServerAddress> {
        self.routers
            .iter()
            .chain(self.readers.iter())
            .chain(self.writers.iter())
            .cloned()
            .collect()
    }

    /// Empty every role list. Used on disposal instead of dropping the
    /// table so racing acquisitions find an empty table rather than a
    /// dangling reference.
    pub fn clear(&mut self) {
        self.routers.clear();
        self.readers.clear();
        self.writers.clear();
    }

    pub fn routers(&self) -> &[ServerAddress] {
        &self.routers
    }

    pub fn readers(&self) -> &[ServerAddress] {
        &self.readers
    }

    pub fn writers(&self) -> &[ServerAddress] {
        &self.writers
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(list: &[ServerAddress]) -> String {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
        write!(
            f,
            "routers: [{}], readers: [{}], writers: [{}], ttl: {:?}",
            join(&self.routers),
            join(&self.readers),
            join(&self.writers),
            self.ttl
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::connection::testing::addr;

    fn table_with(
        routers: &[&str],
        readers: &[&str],
        writers: &[&str],
        ttl: Duration,
    ) -> RoutingTable {
        RoutingTable::new(
            routers.iter().map(|h| addr(h)).collect(),
            readers.iter().map(|h| addr(h)).collect(),
            writers.iter().map(|h| addr(h)).collect(),
            ttl,
        )
    }

    #[test]
    fn test_round_robin_is_fair_and_periodic() {
        let table = table_with(
            &[],
            &["r1", "r2", "r3"],
            &[],
            Duration::from_secs(300),
        );

        // Two full periods: every reader visited once per period, in
        // the same order.
        let first: Vec<_> = (0..3).filter_map(|_| table.next_reader()).collect();
        let second: Vec<_> = (0..3).filter_map(|_| table.next_reader()).collect();

        assert_eq!(first, second);
        let unique: HashSet<_> = first.iter().cloned().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_next_on_empty_role_is_none() {
        let table = RoutingTable::seeded(vec![addr("router1")]);
        assert!(table.next_reader().is_none());
        assert!(table.next_writer().is_none());
        assert_eq!(table.next_router(), Some(addr("router1")));
    }

    #[test]
    fn test_cursor_stays_in_bounds_after_shrink() {
        let mut table = table_with(
            &[],
            &["r1", "r2", "r3"],
            &[],
            Duration::from_secs(300),
        );

        // Advance the cursor deep into the list, then shrink it.
        for _ in 0..5 {
            table.next_reader();
        }
        table.remove(&addr("r3"));
        table.remove(&addr("r2"));

        for _ in 0..4 {
            assert_eq!(table.next_reader(), Some(addr("r1")));
        }
    }

    #[test]
    fn test_seeded_table_is_stale() {
        let table = RoutingTable::seeded(vec![addr("router1")]);
        assert!(table.is_stale(AccessMode::Read));
        assert!(table.is_stale(AccessMode::Write));
    }

    #[test]
    fn test_stale_without_routers_regardless_of_ttl() {
        let mut table = table_with(
            &["router1"],
            &["r1"],
            &["w1"],
            Duration::from_secs(3600),
        );
        assert!(!table.is_stale(AccessMode::Read));
        assert!(!table.is_stale(AccessMode::Write));

        table.remove(&addr("router1"));
        assert!(table.is_stale(AccessMode::Read));
        assert!(table.is_stale(AccessMode::Write));
    }

    #[test]
    fn test_staleness_is_per_intent() {
        let table = table_with(&["router1"], &["r1"], &[], Duration::from_secs(3600));
        assert!(!table.is_stale(AccessMode::Read));
        assert!(table.is_stale(AccessMode::Write));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let table = table_with(&["router1"], &["r1"], &["w1"], Duration::ZERO);
        assert!(table.is_stale(AccessMode::Read));
    }

    #[test]
    fn test_remove_hits_every_role() {
        let mut table = table_with(
            &["core1", "core2"],
            &["core1", "core3"],
            &["core1"],
            Duration::from_secs(300),
        );

        table.remove(&addr("core1"));

        assert_eq!(table.routers(), &[addr("core2")]);
        assert_eq!(table.readers(), &[addr("core3")]);
        assert!(table.writers().is_empty());
    }

    #[test]
    fn test_remove_writer_leaves_other_roles() {
        let mut table = table_with(
            &["core1"],
            &["core1"],
            &["core1", "core2"],
            Duration::from_secs(300),
        );

        table.remove_writer(&addr("core1"));

        assert_eq!(table.writers(), &[addr("core2")]);
        assert_eq!(table.routers(), &[addr("core1")]);
        assert_eq!(table.readers(), &[addr("core1")]);
    }

    #[test]
    fn test_add_routers_deduplicates() {
        let mut table = RoutingTable::seeded(vec![addr("router1")]);
        table.add_routers(&[addr("router1"), addr("router2"), addr("router2")]);
        assert_eq!(table.routers(), &[addr("router1"), addr("router2")]);
    }

    #[test]
    fn test_all_is_deduplicated_union() {
        let table = table_with(
            &["core1", "core2"],
            &["core1", "core3"],
            &["core1"],
            Duration::from_secs(300),
        );

        let all = table.all();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&addr("core1")));
        assert!(all.contains(&addr("core2")));
        assert!(all.contains(&addr("core3")));
    }

    #[test]
    fn test_clear_empties_every_role() {
        let mut table = table_with(&["core1"], &["core2"], &["core3"], Duration::from_secs(300));
        table.clear();
        assert!(table.routers().is_empty());
        assert!(table.next_reader().is_none());
        assert!(table.is_stale(AccessMode::Read));
    }
}
