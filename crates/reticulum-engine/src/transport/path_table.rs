use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rmp::encode::write_array_len;

use crate::destination::RAND_HASH_LENGTH;
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::packet::{DestinationType, Header, HeaderType, Packet, PacketType, PropagationType};

use super::PATHFINDER_M;

/// How many distinct `random_hash` values a destination's path entry
/// remembers for replay detection. Not a named upstream constant; chosen to
/// comfortably outlive a few announce cycles without growing unbounded.
const RANDOM_HASH_RING_SIZE: usize = 16;

/// Expiry tiers mirroring the three destination_expiry branches taken when a
/// path is adopted, keyed on the interface the announce arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathExpiryTier {
    /// Announce arrived over an interface classified as an access point.
    AccessPoint,
    /// Announce arrived over an interface classified as roaming.
    Roaming,
    /// Default tier used when the interface carries no access/roaming
    /// classification.
    Full,
}

impl PathExpiryTier {
    fn lifetime(self) -> Duration {
        match self {
            PathExpiryTier::AccessPoint => AP_PATH_TIME,
            PathExpiryTier::Roaming => ROAMING_PATH_TIME,
            PathExpiryTier::Full => PATHFINDER_E,
        }
    }
}

// Upstream's interface driver carries an access-point/roaming classification
// that this crate doesn't model yet (no equivalent of Transport.cpp's
// interface mode exists in `iface.rs`), so `handle_announce` always resolves
// to `PathExpiryTier::Full` today. The tiers are kept real and callable
// through `handle_announce_with_tier` for when that classification lands.
const AP_PATH_TIME: Duration = Duration::from_secs(60 * 60 * 24);
const ROAMING_PATH_TIME: Duration = Duration::from_secs(60 * 60 * 6);
const PATHFINDER_E: Duration = Duration::from_secs(60 * 60 * 24 * 7);

fn emission_timestamp(rand_hash: &[u8; RAND_HASH_LENGTH]) -> u64 {
    let mut buf = [0u8; 8];
    buf[3..8].copy_from_slice(&rand_hash[RAND_HASH_LENGTH / 2..]);
    u64::from_be_bytes(buf)
}

pub struct PathEntry {
    pub timestamp: Instant,
    pub received_from: AddressHash,
    pub hops: u8,
    pub iface: AddressHash,
    pub packet_hash: Hash,
    pub expires: Instant,
    random_hashes: VecDeque<[u8; RAND_HASH_LENGTH]>,
}

impl PathEntry {
    fn remember(&mut self, rand_hash: [u8; RAND_HASH_LENGTH]) {
        self.random_hashes.push_back(rand_hash);
        if self.random_hashes.len() > RANDOM_HASH_RING_SIZE {
            self.random_hashes.pop_front();
        }
    }

    fn has_seen(&self, rand_hash: &[u8; RAND_HASH_LENGTH]) -> bool {
        self.random_hashes.contains(rand_hash)
    }

    fn newer_than_all_seen(&self, rand_hash: &[u8; RAND_HASH_LENGTH]) -> bool {
        let candidate = emission_timestamp(rand_hash);
        self.random_hashes.iter().all(|seen| candidate > emission_timestamp(seen))
    }
}

pub struct PathTable {
    map: HashMap<AddressHash, PathEntry>,
}

impl PathTable {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, RnsError> {
        if !self.map.is_empty() {
            return Err(RnsError::InvalidArgument);
        }

        let mut out = Vec::new();
        write_array_len(&mut out, 0).map_err(|_| RnsError::InvalidArgument)?;
        Ok(out)
    }

    pub fn get(&self, destination: &AddressHash) -> Option<&PathEntry> {
        self.map.get(destination)
    }

    pub fn next_hop_full(&self, destination: &AddressHash) -> Option<(AddressHash, AddressHash)> {
        self.map.get(destination).map(|entry| (entry.received_from, entry.iface))
    }

    pub fn next_hop_iface(&self, destination: &AddressHash) -> Option<AddressHash> {
        self.map.get(destination).map(|entry| entry.iface)
    }

    pub fn next_hop(&self, destination: &AddressHash) -> Option<AddressHash> {
        self.map.get(destination).map(|entry| entry.received_from)
    }

    pub fn handle_announce(
        &mut self,
        announce: &Packet,
        transport_id: Option<AddressHash>,
        iface: AddressHash,
        rand_hash: [u8; RAND_HASH_LENGTH],
    ) {
        self.handle_announce_with_tier(announce, transport_id, iface, rand_hash, PathExpiryTier::Full)
    }

    pub fn handle_announce_with_tier(
        &mut self,
        announce: &Packet,
        transport_id: Option<AddressHash>,
        iface: AddressHash,
        rand_hash: [u8; RAND_HASH_LENGTH],
        tier: PathExpiryTier,
    ) {
        let hops = announce.header.hops + 1;

        if hops as usize >= PATHFINDER_M + 1 {
            log::trace!(
                "tp: dropping announce for {}, hop count {} reaches the PATHFINDER_M ceiling",
                announce.destination,
                hops,
            );
            return;
        }

        let now = Instant::now();

        if let Some(existing_entry) = self.map.get_mut(&announce.destination) {
            if hops <= existing_entry.hops {
                if existing_entry.has_seen(&rand_hash) {
                    return;
                }
            } else {
                let expired = now >= existing_entry.expires;
                let newer = existing_entry.newer_than_all_seen(&rand_hash);
                if !expired && !newer {
                    return;
                }
            }

            let received_from = transport_id.unwrap_or(announce.destination);
            existing_entry.timestamp = now;
            existing_entry.received_from = received_from;
            existing_entry.hops = hops;
            existing_entry.iface = iface;
            existing_entry.packet_hash = announce.hash();
            existing_entry.expires = now + tier.lifetime();
            existing_entry.remember(rand_hash);

            log::info!(
                "{} is now reachable over {} hops through {} on iface {}",
                announce.destination,
                hops,
                received_from,
                iface,
            );
            return;
        }

        let received_from = transport_id.unwrap_or(announce.destination);
        let mut new_entry = PathEntry {
            timestamp: now,
            received_from,
            hops,
            iface,
            packet_hash: announce.hash(),
            expires: now + tier.lifetime(),
            random_hashes: VecDeque::with_capacity(1),
        };
        new_entry.remember(rand_hash);

        self.map.insert(announce.destination, new_entry);

        log::info!(
            "{} is now reachable over {} hops through {} on iface {}",
            announce.destination,
            hops,
            received_from,
            iface,
        );
    }

    /// Drops every path entry whose interface-tiered lifetime has elapsed.
    /// Meant to be called from the same periodic cull tick that ages out the
    /// packet cache, link table and tunnel table.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.expires > now);
    }

    pub fn handle_inbound_packet(
        &self,
        original_packet: &Packet,
        lookup: Option<AddressHash>,
    ) -> (Packet, Option<AddressHash>) {
        let lookup = lookup.unwrap_or(original_packet.destination);

        let entry = match self.map.get(&lookup) {
            Some(entry) => entry,
            None => return (*original_packet, None),
        };

        (
            Packet {
                header: Header {
                    ifac_flag: original_packet.header.ifac_flag,
                    header_type: HeaderType::Type2,
                    context_flag: original_packet.header.context_flag,
                    propagation_type: PropagationType::Transport,
                    destination_type: original_packet.header.destination_type,
                    packet_type: original_packet.header.packet_type,
                    hops: original_packet.header.hops + 1,
                },
                ifac: None,
                destination: original_packet.destination,
                transport: Some(entry.received_from),
                context: original_packet.context,
                data: original_packet.data,
            },
            Some(entry.iface),
        )
    }

    pub fn refresh(&mut self, destination: &AddressHash) {
        if let Some(entry) = self.map.get_mut(destination) {
            entry.timestamp = Instant::now();
        }
    }

    pub fn handle_packet(&mut self, original_packet: &Packet) -> (Packet, Option<AddressHash>) {
        if original_packet.header.header_type == HeaderType::Type2 {
            return (*original_packet, None);
        }

        if original_packet.header.packet_type == PacketType::Announce {
            return (*original_packet, None);
        }

        if original_packet.header.destination_type == DestinationType::Plain
            || original_packet.header.destination_type == DestinationType::Group
        {
            return (*original_packet, None);
        }

        let entry = match self.map.get(&original_packet.destination) {
            Some(entry) => entry,
            None => return (*original_packet, None),
        };

        if entry.hops <= 1 {
            return (*original_packet, Some(entry.iface));
        }

        (
            Packet {
                header: Header {
                    ifac_flag: original_packet.header.ifac_flag,
                    header_type: HeaderType::Type2,
                    context_flag: original_packet.header.context_flag,
                    propagation_type: PropagationType::Transport,
                    destination_type: original_packet.header.destination_type,
                    packet_type: original_packet.header.packet_type,
                    hops: original_packet.header.hops,
                },
                ifac: original_packet.ifac,
                destination: original_packet.destination,
                transport: Some(entry.received_from),
                context: original_packet.context,
                data: original_packet.data,
            },
            Some(entry.iface),
        )
    }
}

impl Default for PathTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StaticBuffer;
    use crate::packet::{ContextFlag, DestinationType, IfacFlag, PacketType, PropagationType};

    #[test]
    fn handle_packet_direct_hop_preserves_type1_and_ifac_flag() {
        let destination = AddressHash::new_from_hash(&Hash::new_from_slice(b"destination"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let mut table = PathTable::new();
        table.map.insert(
            destination,
            PathEntry {
                timestamp: Instant::now(),
                received_from: destination,
                hops: 1,
                iface,
                packet_hash: Hash::new_from_slice(b"packet"),
                expires: Instant::now() + Duration::from_secs(60),
                random_hashes: VecDeque::new(),
            },
        );

        let packet = Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: ContextFlag::Unset,
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: PacketType::Data,
                hops: 0,
            },
            ifac: None,
            destination,
            transport: None,
            context: crate::packet::PacketContext::None,
            data: StaticBuffer::new(),
        };

        let (forwarded, next_iface) = table.handle_packet(&packet);
        assert_eq!(next_iface, Some(iface));
        assert_eq!(forwarded.header.ifac_flag, IfacFlag::Open);
        assert_eq!(forwarded.header.header_type, HeaderType::Type1);
        assert_eq!(forwarded.transport, None);
    }

    #[test]
    fn handle_packet_multihop_promotes_to_type2_transport() {
        let destination = AddressHash::new_from_hash(&Hash::new_from_slice(b"destination"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let next_hop = AddressHash::new_from_hash(&Hash::new_from_slice(b"next_hop"));
        let mut table = PathTable::new();
        table.map.insert(
            destination,
            PathEntry {
                timestamp: Instant::now(),
                received_from: next_hop,
                hops: 2,
                iface,
                packet_hash: Hash::new_from_slice(b"packet"),
                expires: Instant::now() + Duration::from_secs(60),
                random_hashes: VecDeque::new(),
            },
        );

        let packet = Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: ContextFlag::Unset,
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: PacketType::Data,
                hops: 0,
            },
            ifac: None,
            destination,
            transport: None,
            context: crate::packet::PacketContext::None,
            data: StaticBuffer::new(),
        };

        let (forwarded, next_iface) = table.handle_packet(&packet);
        assert_eq!(next_iface, Some(iface));
        assert_eq!(forwarded.header.ifac_flag, IfacFlag::Open);
        assert_eq!(forwarded.header.header_type, HeaderType::Type2);
        assert_eq!(forwarded.header.propagation_type, PropagationType::Transport);
        assert_eq!(forwarded.transport, Some(next_hop));
    }

    fn rand_hash_at(marker: u8, emitted_secs: u64) -> [u8; RAND_HASH_LENGTH] {
        let mut rand_hash = [0u8; RAND_HASH_LENGTH];
        rand_hash[0] = marker;
        let emitted_be = emitted_secs.to_be_bytes();
        rand_hash[RAND_HASH_LENGTH / 2..].copy_from_slice(&emitted_be[3..8]);
        rand_hash
    }

    fn announce_packet(destination: AddressHash, hops: u8) -> Packet {
        Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: ContextFlag::Unset,
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: PacketType::Announce,
                hops,
            },
            ifac: None,
            destination,
            transport: None,
            context: crate::packet::PacketContext::None,
            data: StaticBuffer::new(),
        }
    }

    #[test]
    fn handle_announce_rejects_replayed_random_hash_at_same_hop_count() {
        let destination = AddressHash::new_from_hash(&Hash::new_from_slice(b"destination"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let mut table = PathTable::new();

        let packet = announce_packet(destination, 0);
        let first_hash = rand_hash_at(1, 1_000);
        table.handle_announce(&packet, None, iface, first_hash);
        assert_eq!(table.get(&destination).unwrap().hops, 1);

        // Same hop count, same random_hash: a replay, must not refresh the entry.
        table.handle_announce(&packet, None, iface, first_hash);
        let entry = table.get(&destination).unwrap();
        assert_eq!(entry.hops, 1);

        // Same hop count, new random_hash: distinct announce, must be adopted.
        let second_hash = rand_hash_at(2, 1_001);
        table.handle_announce(&packet, None, iface, second_hash);
        assert!(table.get(&destination).unwrap().has_seen(&second_hash));
    }

    #[test]
    fn handle_announce_rejects_higher_hops_unless_expired_or_newer() {
        let destination = AddressHash::new_from_hash(&Hash::new_from_slice(b"destination"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let mut table = PathTable::new();

        let direct = announce_packet(destination, 0);
        table.handle_announce(&direct, None, iface, rand_hash_at(1, 1_000));
        assert_eq!(table.get(&destination).unwrap().hops, 1);

        // A worse (higher-hop) route with an older emission timestamp is rejected
        // while the existing path has not expired.
        let indirect = announce_packet(destination, 3);
        table.handle_announce(&indirect, None, iface, rand_hash_at(2, 500));
        assert_eq!(table.get(&destination).unwrap().hops, 1);

        // A worse route whose emission timestamp is strictly newer than every
        // timestamp seen so far is adopted even though it is more hops away.
        table.handle_announce(&indirect, None, iface, rand_hash_at(3, 2_000));
        assert_eq!(table.get(&destination).unwrap().hops, 4);
    }

    #[test]
    fn handle_announce_adopts_higher_hops_once_existing_entry_expired() {
        let destination = AddressHash::new_from_hash(&Hash::new_from_slice(b"destination"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let mut table = PathTable::new();

        let direct = announce_packet(destination, 0);
        table.handle_announce(&direct, None, iface, rand_hash_at(1, 1_000));
        table.map.get_mut(&destination).unwrap().expires = Instant::now() - Duration::from_secs(1);

        let indirect = announce_packet(destination, 3);
        table.handle_announce(&indirect, None, iface, rand_hash_at(2, 1));
        assert_eq!(table.get(&destination).unwrap().hops, 4);
    }

    #[test]
    fn handle_announce_drops_announces_past_the_pathfinder_m_ceiling() {
        let destination = AddressHash::new_from_hash(&Hash::new_from_slice(b"destination"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let mut table = PathTable::new();

        let packet = announce_packet(destination, PATHFINDER_M as u8);
        table.handle_announce(&packet, None, iface, rand_hash_at(1, 1_000));

        assert!(table.get(&destination).is_none());
    }

    #[test]
    fn purge_expired_drops_stale_entries_only() {
        let fresh = AddressHash::new_from_hash(&Hash::new_from_slice(b"fresh"));
        let stale = AddressHash::new_from_hash(&Hash::new_from_slice(b"stale"));
        let iface = AddressHash::new_from_hash(&Hash::new_from_slice(b"iface"));
        let mut table = PathTable::new();

        table.handle_announce(&announce_packet(fresh, 0), None, iface, rand_hash_at(1, 1_000));
        table.handle_announce(&announce_packet(stale, 0), None, iface, rand_hash_at(2, 1_000));
        table.map.get_mut(&stale).unwrap().expires = Instant::now() - Duration::from_secs(1);

        table.purge_expired();

        assert!(table.get(&fresh).is_some());
        assert!(table.get(&stale).is_none());
    }
}
