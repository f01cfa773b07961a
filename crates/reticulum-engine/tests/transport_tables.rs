#[test]
fn announce_cache_evicts_oldest() {
    let mut cache = reticulum::transport::announce_table::AnnounceCache::new(2);
    cache.insert(
        reticulum::hash::AddressHash::new([0u8; 16]),
        reticulum::transport::announce_table::AnnounceEntry::dummy(),
    );
    cache.insert(
        reticulum::hash::AddressHash::new([1u8; 16]),
        reticulum::transport::announce_table::AnnounceEntry::dummy(),
    );
    cache.insert(
        reticulum::hash::AddressHash::new([2u8; 16]),
        reticulum::transport::announce_table::AnnounceEntry::dummy(),
    );
    assert_eq!(cache.len(), 2);
}

#[test]
fn receipt_ring_only_tracks_plain_data_packets() {
    use reticulum::packet::{
        ContextFlag, DestinationType, Header, HeaderType, IfacFlag, Packet, PacketContext,
        PacketType, PropagationType,
    };
    use reticulum::transport::receipts::is_trackable_data_packet;

    let base_header = Header {
        ifac_flag: IfacFlag::Open,
        header_type: HeaderType::Type1,
        context_flag: ContextFlag::Unset,
        propagation_type: PropagationType::Broadcast,
        destination_type: DestinationType::Single,
        packet_type: PacketType::Data,
        hops: 0,
    };

    let data_packet = Packet { header: base_header, ..Default::default() };
    assert!(is_trackable_data_packet(&data_packet));

    let mut plain_packet = data_packet.clone();
    plain_packet.header.destination_type = DestinationType::Plain;
    assert!(!is_trackable_data_packet(&plain_packet));

    let mut keepalive_packet = data_packet.clone();
    keepalive_packet.context = PacketContext::KeepAlive;
    assert!(!is_trackable_data_packet(&keepalive_packet));

    let mut resource_packet = data_packet.clone();
    resource_packet.context = PacketContext::Resource;
    assert!(!is_trackable_data_packet(&resource_packet));

    let mut announce_packet = data_packet;
    announce_packet.header.packet_type = PacketType::Announce;
    assert!(!is_trackable_data_packet(&announce_packet));
}

#[test]
fn receipt_ring_caps_at_capacity_and_expires_on_timeout() {
    use std::time::{Duration, Instant};

    use reticulum::hash::{AddressHash, Hash};
    use reticulum::transport::receipts::{ReceiptRing, ReceiptStatus};

    let mut ring = ReceiptRing::new(2);
    let dest = AddressHash::new([7u8; 16]);

    assert!(ring.track(Hash::new([1u8; 32]), dest, Duration::from_secs(30)).is_none());
    assert!(ring.track(Hash::new([2u8; 32]), dest, Duration::from_secs(30)).is_none());
    let evicted = ring
        .track(Hash::new([3u8; 32]), dest, Duration::from_secs(30))
        .expect("ring at capacity evicts oldest");
    assert_eq!(evicted.status, ReceiptStatus::Expired);
    assert_eq!(ring.len(), 2);

    let mut short_lived = ReceiptRing::new(4);
    short_lived.track(Hash::new([9u8; 32]), dest, Duration::from_secs(0));
    let timed_out = short_lived.poll_timeouts(Instant::now());
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].status, ReceiptStatus::Expired);
}
