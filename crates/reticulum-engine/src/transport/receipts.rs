use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::hash::{AddressHash, Hash};
use crate::packet::{DestinationType, Packet, PacketContext, PacketType};

use super::wire::is_resource_context;

/// Receipts are only kept for live, in-flight data and never grow unbounded;
/// overflow culls the oldest entry and reports it as expired.
pub const MAX_RECEIPTS: usize = 512;
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Sent,
    Delivered,
    Expired,
}

#[derive(Debug, Clone)]
pub struct PacketReceipt {
    pub hash: Hash,
    pub truncated_hash: AddressHash,
    pub destination: AddressHash,
    pub sent_at: Instant,
    pub timeout_at: Instant,
    pub status: ReceiptStatus,
}

impl PacketReceipt {
    fn new(hash: Hash, destination: AddressHash, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            truncated_hash: AddressHash::new_from_hash(&hash),
            hash,
            destination,
            sent_at: now,
            timeout_at: now + timeout,
            status: ReceiptStatus::Sent,
        }
    }

    pub fn rtt(&self) -> Duration {
        Instant::now().saturating_duration_since(self.sent_at)
    }
}

/// Mirrors the exact creation rule a transport applies before tracking a
/// receipt for an outbound packet: only DATA packets addressed to a
/// non-PLAIN destination, and never for link-maintenance or resource-transfer
/// contexts, which carry their own delivery/retry semantics.
pub fn is_trackable_data_packet(packet: &Packet) -> bool {
    packet.header.packet_type == PacketType::Data
        && packet.header.destination_type != DestinationType::Plain
        && !is_link_context(packet.context)
        && !is_resource_context(packet.context)
}

fn is_link_context(context: PacketContext) -> bool {
    (context as u8) >= PacketContext::KeepAlive as u8
}

/// Bounded ring of in-flight packet receipts, capped at `MAX_RECEIPTS`. Same
/// insertion-ordered ring + map shape as `LruCache`/`DiscoveryCache`, with
/// entries additionally carrying a timeout walked by the transport's
/// periodic jobs.
pub struct ReceiptRing {
    capacity: usize,
    order: VecDeque<Hash>,
    entries: HashMap<Hash, PacketReceipt>,
}

impl ReceiptRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), entries: HashMap::new() }
    }

    /// Tracks a newly sent packet. Returns the evicted receipt, with its
    /// status already set to `Expired`, if the ring was at capacity.
    pub fn track(
        &mut self,
        hash: Hash,
        destination: AddressHash,
        timeout: Duration,
    ) -> Option<PacketReceipt> {
        if self.entries.contains_key(&hash) {
            return None;
        }

        self.order.push_back(hash);
        self.entries.insert(hash, PacketReceipt::new(hash, destination, timeout));

        if self.order.len() > self.capacity {
            self.order.pop_front().and_then(|oldest| {
                let mut evicted = self.entries.remove(&oldest)?;
                evicted.status = ReceiptStatus::Expired;
                Some(evicted)
            })
        } else {
            None
        }
    }

    pub fn mark_delivered(&mut self, hash: &Hash) -> Option<PacketReceipt> {
        self.order.retain(|entry| entry != hash);
        let mut receipt = self.entries.remove(hash)?;
        receipt.status = ReceiptStatus::Delivered;
        Some(receipt)
    }

    /// Matches a proof packet's destination field against the truncated hash
    /// of each tracked receipt, the same correlation an explicit proof uses
    /// on the wire.
    pub fn mark_delivered_by_truncated_hash(
        &mut self,
        truncated_hash: &AddressHash,
    ) -> Option<PacketReceipt> {
        let hash = self.entries.iter().find_map(|(hash, receipt)| {
            (receipt.truncated_hash == *truncated_hash).then_some(*hash)
        })?;
        self.mark_delivered(&hash)
    }

    /// Walks the ring for timed-out receipts, removing and returning them
    /// with status `Expired`. Called from the transport's periodic job loop.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<PacketReceipt> {
        let timed_out: Vec<Hash> = self
            .entries
            .iter()
            .filter(|(_, receipt)| now >= receipt.timeout_at)
            .map(|(hash, _)| *hash)
            .collect();

        let mut expired = Vec::with_capacity(timed_out.len());
        for hash in timed_out {
            self.order.retain(|entry| entry != &hash);
            if let Some(mut receipt) = self.entries.remove(&hash) {
                receipt.status = ReceiptStatus::Expired;
                expired.push(receipt);
            }
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReceiptRing {
    fn default() -> Self {
        Self::new(MAX_RECEIPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::address_hash;

    fn hash_from(byte: u8) -> Hash {
        Hash::new([byte; crate::hash::HASH_SIZE])
    }

    #[test]
    fn evicts_oldest_beyond_capacity_with_expired_status() {
        let mut ring = ReceiptRing::new(2);
        let dest = AddressHash::new_from_slice(&address_hash(b"dest"));

        assert!(ring.track(hash_from(1), dest, DEFAULT_RECEIPT_TIMEOUT).is_none());
        assert!(ring.track(hash_from(2), dest, DEFAULT_RECEIPT_TIMEOUT).is_none());
        let evicted =
            ring.track(hash_from(3), dest, DEFAULT_RECEIPT_TIMEOUT).expect("oldest evicted");

        assert_eq!(evicted.hash, hash_from(1));
        assert_eq!(evicted.status, ReceiptStatus::Expired);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn mark_delivered_removes_entry_and_sets_status() {
        let mut ring = ReceiptRing::new(4);
        let dest = AddressHash::new_from_slice(&address_hash(b"dest"));
        ring.track(hash_from(9), dest, DEFAULT_RECEIPT_TIMEOUT);

        let receipt = ring.mark_delivered(&hash_from(9)).expect("receipt present");
        assert_eq!(receipt.status, ReceiptStatus::Delivered);
        assert!(ring.is_empty());
    }

    #[test]
    fn mark_delivered_by_truncated_hash_matches_proof_destination() {
        let mut ring = ReceiptRing::new(4);
        let dest = AddressHash::new_from_slice(&address_hash(b"dest"));
        let hash = hash_from(7);
        ring.track(hash, dest, DEFAULT_RECEIPT_TIMEOUT);

        let truncated = AddressHash::new_from_hash(&hash);
        let receipt =
            ring.mark_delivered_by_truncated_hash(&truncated).expect("receipt matched by hash");
        assert_eq!(receipt.status, ReceiptStatus::Delivered);
        assert!(ring.is_empty());
    }

    #[test]
    fn poll_timeouts_evicts_only_expired_entries() {
        let mut ring = ReceiptRing::new(4);
        let dest = AddressHash::new_from_slice(&address_hash(b"dest"));
        ring.track(hash_from(1), dest, Duration::from_secs(0));
        ring.track(hash_from(2), dest, Duration::from_secs(60));

        let expired = ring.poll_timeouts(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].hash, hash_from(1));
        assert_eq!(ring.len(), 1);
    }
}
