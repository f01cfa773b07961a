use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::hash::AddressHash;

const DEFAULT_TUNNEL_CAPACITY: usize = 256;

/// A tunnel associates a set of paths with a particular interface so they
/// can be restored across reconnects. Synthesis of the association from
/// live traffic is experimental upstream and not implemented here; this
/// table only provides bounded storage and expiry for entries a caller
/// supplies directly.
#[derive(Debug, Clone)]
pub struct TunnelEntry {
    pub interface_binding: Vec<u8>,
    pub serialised_paths: Vec<u8>,
    pub expires: Instant,
}

pub struct TunnelTable {
    capacity: usize,
    order: VecDeque<AddressHash>,
    entries: HashMap<AddressHash, TunnelEntry>,
}

impl TunnelTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), entries: HashMap::new() }
    }

    pub fn insert(
        &mut self,
        tunnel_id: AddressHash,
        interface_binding: Vec<u8>,
        serialised_paths: Vec<u8>,
        ttl: Duration,
    ) {
        if !self.entries.contains_key(&tunnel_id) {
            self.order.push_back(tunnel_id);
        }

        self.entries.insert(
            tunnel_id,
            TunnelEntry { interface_binding, serialised_paths, expires: Instant::now() + ttl },
        );

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, tunnel_id: &AddressHash) -> Option<&TunnelEntry> {
        self.entries.get(tunnel_id)
    }

    pub fn remove(&mut self, tunnel_id: &AddressHash) -> Option<TunnelEntry> {
        self.order.retain(|id| id != tunnel_id);
        self.entries.remove(tunnel_id)
    }

    /// Purges expired tunnels; called from the transport's periodic table
    /// cull job alongside the other bounded tables.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<AddressHash> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.order.retain(|entry| entry != &id);
            self.entries.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TunnelTable {
    fn default() -> Self {
        Self::new(DEFAULT_TUNNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut table = TunnelTable::new(2);
        table.insert(AddressHash::new([1u8; 16]), vec![], vec![], Duration::from_secs(60));
        table.insert(AddressHash::new([2u8; 16]), vec![], vec![], Duration::from_secs(60));
        table.insert(AddressHash::new([3u8; 16]), vec![], vec![], Duration::from_secs(60));

        assert_eq!(table.len(), 2);
        assert!(table.get(&AddressHash::new([1u8; 16])).is_none());
        assert!(table.get(&AddressHash::new([3u8; 16])).is_some());
    }

    #[test]
    fn purge_expired_removes_only_stale_entries() {
        let mut table = TunnelTable::new(4);
        table.insert(AddressHash::new([1u8; 16]), vec![], vec![], Duration::from_secs(0));
        table.insert(AddressHash::new([2u8; 16]), vec![], vec![], Duration::from_secs(60));

        table.purge_expired();

        assert_eq!(table.len(), 1);
        assert!(table.get(&AddressHash::new([2u8; 16])).is_some());
    }
}
