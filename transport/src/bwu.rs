//! Bandwidth-upgrade channel-swap protocol (§4.6). The physical upgrade
//! path (opening a new medium, picking a target) belongs to the external
//! `BwuManager`; this module implements the in-scope frame choreography
//! that hands an endpoint from its old channel to a new one without
//! dropping or reordering encrypted bytes.

use crate::channel::{CloseReason, EndpointChannel};
use pcp_codec::frame::{BandwidthUpgradeNegotiation, BwuEventType, ClientIntroduction, Disconnection};
use pcp_codec::Frame;
use pcp_core::EndpointId;

#[derive(Debug, thiserror::Error)]
pub enum BwuError {
    #[error("the upgrade channel failed during negotiation")]
    Io,
    #[error("the peer did not acknowledge the client introduction")]
    NoClientIntroductionAck,
}

/// Step 1 (§4.6): the initiator announces an upgrade path on the
/// existing, slower channel.
pub fn propose_upgrade(
    old_channel: &mut dyn EndpointChannel,
    upgrade_path_info: Vec<u8>,
    supports_client_introduction_ack: bool,
) -> Result<(), BwuError> {
    let frame = Frame::BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation {
        event_type: BwuEventType::UpgradePathAvailable,
        upgrade_path_info: Some(upgrade_path_info),
        client_introduction: None,
    });
    write_frame(old_channel, &frame)?;
    let _ = supports_client_introduction_ack;
    Ok(())
}

/// Step 2: the responder, having opened `new_channel` over the named
/// medium, introduces itself and optionally waits for an ack.
pub fn introduce_on_new_channel(
    new_channel: &mut dyn EndpointChannel,
    endpoint_id: EndpointId,
    supports_disabling_encryption: bool,
    wait_for_ack: bool,
) -> Result<(), BwuError> {
    let frame = Frame::BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation {
        event_type: BwuEventType::ClientIntroduction,
        upgrade_path_info: None,
        client_introduction: Some(ClientIntroduction {
            endpoint_id: *endpoint_id.as_bytes(),
            supports_disabling_encryption,
        }),
    });
    write_frame(new_channel, &frame)?;

    if wait_for_ack {
        let mut bytes = new_channel.read().map_err(|_| BwuError::Io)?;
        match Frame::decode(&mut bytes) {
            Ok(Frame::BandwidthUpgradeNegotiation(negotiation))
                if negotiation.event_type == BwuEventType::ClientIntroductionAck => {}
            _ => return Err(BwuError::NoClientIntroductionAck),
        }
    }
    Ok(())
}

/// Step 3: both sides pause the new channel (§4.3: UKEY2 is
/// sequence-numbered, so the new channel must not read ahead of the
/// drain below) and announce the old one is on its last write.
pub fn pause_new_and_announce_last_write(
    new_channel: &mut dyn EndpointChannel,
    old_channel: &mut dyn EndpointChannel,
) -> Result<(), BwuError> {
    new_channel.pause();
    let frame = Frame::BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation {
        event_type: BwuEventType::LastWriteToPriorChannel,
        upgrade_path_info: None,
        client_introduction: None,
    });
    write_frame(old_channel, &frame)
}

/// Step 4: on receiving the peer's `LAST_WRITE_TO_PRIOR_CHANNEL`, ack it,
/// send one unencrypted `Disconnection` (an encrypted one would advance
/// the cipher's sequence counter past what the peer expects), drain the
/// old channel, close it, and resume the new one.
pub fn finish_draining_old_channel(
    old_channel: &mut dyn EndpointChannel,
    new_channel: &mut dyn EndpointChannel,
) -> Result<(), BwuError> {
    let ack = Frame::BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation {
        event_type: BwuEventType::SafeToClosePriorChannel,
        upgrade_path_info: None,
        client_introduction: None,
    });
    write_frame(old_channel, &ack)?;

    let disconnection = Frame::Disconnection(Disconnection {
        request_safe_to_disconnect: true,
        ack_safe_to_disconnect: true,
    });
    write_frame(old_channel, &disconnection)?;

    while old_channel.read().is_ok() {
        // Drain whatever the peer already queued before closing.
    }
    old_channel.close(CloseReason::Upgraded);
    new_channel.resume();
    Ok(())
}

fn write_frame(channel: &mut dyn EndpointChannel, frame: &Frame) -> Result<(), BwuError> {
    channel.write(&frame.encode()).map_err(|_| BwuError::Io)
}
