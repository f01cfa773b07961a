use super::path::send_to_next_hop;
use super::*;

pub(super) fn should_encrypt_packet(packet: &Packet) -> bool {
    packet.header.packet_type == PacketType::Data
        && packet.header.destination_type == DestinationType::Single
}

pub(super) fn is_resource_context(context: PacketContext) -> bool {
    matches!(
        context,
        PacketContext::Resource
            | PacketContext::ResourceAdvrtisement
            | PacketContext::ResourceRequest
            | PacketContext::ResourceHashUpdate
            | PacketContext::ResourceProof
            | PacketContext::ResourceInitiatorCancel
            | PacketContext::ResourceReceiverCancel
    )
}

pub(super) async fn handle_data<'a>(
    packet: &Packet,
    iface: AddressHash,
    mut handler: MutexGuard<'a, TransportHandler>,
) {
    if packet.header.destination_type == DestinationType::Link {
        let link = handler
            .in_links
            .get(&packet.destination)
            .cloned()
            .or_else(|| handler.out_links.get(&packet.destination).cloned());

        let Some(link) = link else {
            send_to_next_hop(packet, &handler, None).await;
            return;
        };

        if is_resource_context(packet.context) {
            let mut link_guard = link.lock().await;
            let replies = handler.resource_manager.handle_packet(packet, &mut link_guard);
            drop(link_guard);
            for reply in replies {
                handler.send_packet(reply).await;
            }
            return;
        }

        let result = link.lock().await.handle_packet(packet);

        match result {
            LinkHandleResult::Proof(proof) => handler.send_packet(proof).await,
            LinkHandleResult::KeepAlive => {
                let response = link.lock().await.keep_alive_packet(KEEP_ALIVE_RESPONSE);
                handler.send_packet(response).await;
            }
            LinkHandleResult::Activated | LinkHandleResult::None => {}
        }

        return;
    }

    let destination = handler.single_in_destinations.get(&packet.destination).cloned();

    let Some(destination) = destination else {
        send_to_next_hop(packet, &handler, None).await;
        return;
    };

    let decrypted = destination.lock().await.decrypt_with_ratchets(packet.data.as_slice());

    match decrypted {
        Ok((plaintext, ratchet_used)) => {
            let _ = handler.received_data_tx.send(ReceivedData {
                destination: packet.destination,
                data: PacketDataBuffer::new_from_slice(&plaintext),
                payload_mode: ReceivedPayloadMode::FullWire,
                ratchet_used,
                context: Some(packet.context),
                request_id: None,
                hops: Some(packet.header.hops),
                interface: Some(iface.as_slice().to_vec()),
            });
        }
        Err(err) => {
            log::warn!(
                "tp({}): failed to decrypt packet for {}: {:?}",
                handler.config.name,
                packet.destination,
                err
            );
        }
    }
}

pub(super) async fn handle_proof(packet: Packet, handler_arc: Arc<Mutex<TransportHandler>>) {
    let forwarded = { handler_arc.lock().await.link_table.handle_proof(&packet) };

    if let Some((propagated, iface)) = forwarded {
        let handler = handler_arc.lock().await;
        handler.send(TxMessage { tx_type: TxMessageType::Direct(iface), packet: propagated }).await;
        return;
    }

    let link = {
        let handler = handler_arc.lock().await;
        handler
            .out_links
            .get(&packet.destination)
            .cloned()
            .or_else(|| handler.in_links.get(&packet.destination).cloned())
    };

    let Some(link) = link else {
        handler_arc.lock().await.resolve_data_receipt(&packet);
        return;
    };

    let result = link.lock().await.handle_packet(&packet);

    match result {
        LinkHandleResult::Proof(proof) => {
            handler_arc.lock().await.send_packet(proof).await;
        }
        LinkHandleResult::KeepAlive => {
            let response = link.lock().await.keep_alive_packet(KEEP_ALIVE_RESPONSE);
            handler_arc.lock().await.send_packet(response).await;
        }
        LinkHandleResult::Activated | LinkHandleResult::None => {}
    }
}

/// Synchronous variant used only by test harnesses that drive a packet straight through
/// the handler without a running `manage_transport` task. Only recognizes link proofs
/// and reports them as delivery receipts; real inbound handling goes through
/// [`handle_data`] and [`handle_proof`].
pub(super) fn handle_inbound_packet_for_test(
    packet: &Packet,
    handler: &mut TransportHandler,
) -> Option<DeliveryReceipt> {
    if packet.header.packet_type == PacketType::Proof && packet.context == PacketContext::LinkProof {
        handler.link_table.handle_proof(packet);
        return Some(DeliveryReceipt::new(packet.hash().to_bytes()));
    }

    if packet.header.packet_type == PacketType::Proof {
        if let Some(receipt) =
            handler.receipts.mark_delivered_by_truncated_hash(&packet.destination)
        {
            return Some(DeliveryReceipt::with_status(receipt.hash.to_bytes(), receipt.status));
        }
    }

    None
}
