//! `OfflineFrame`: the version-tagged, length-delimited control-frame
//! union (§4.1, §6.1).
//!
//! ```text
//! OfflineFrame := version:u8, v1:V1Frame
//! V1Frame      := type:tag, body:<one of the seven frame kinds below>
//! ```
//!
//! All multi-byte integers are big-endian, matching `s2n_codec`'s
//! `NetworkEndian` primitive encodings.

pub mod auto_reconnect;
pub mod bandwidth_upgrade_negotiation;
pub mod connection_request;
pub mod connection_response;
pub mod disconnection;
pub mod keep_alive;
pub mod payload_transfer;

pub use auto_reconnect::AutoReconnect;
pub use bandwidth_upgrade_negotiation::{BandwidthUpgradeNegotiation, BwuEventType, ClientIntroduction};
pub use connection_request::{ConnectionRequest, DeviceInfo, MediumMetadata};
pub use connection_response::{ConnectionResponse, Response};
pub use disconnection::Disconnection;
pub use keep_alive::KeepAlive;
pub use payload_transfer::PayloadTransfer;

use crate::error::{DecodeError, Result};
use s2n_codec::{DecoderBufferMut, Encoder, EncoderBuffer};

/// The only `version` byte this codec understands. A version mismatch is
/// treated the same as an unknown frame type (§4.1 "Decoding policy").
pub const V1: u8 = 1;

/// Generous upper bound for one control frame. Control frames are small,
/// fixed-shape records; this only needs to be large enough for the
/// longest `ConnectionRequest` (endpoint info up to 130 bytes plus a
/// device name).
const MAX_FRAME_SIZE: usize = 4096;

pub(crate) const TAG_CONNECTION_REQUEST: u8 = 1;
pub(crate) const TAG_CONNECTION_RESPONSE: u8 = 2;
pub(crate) const TAG_PAYLOAD_TRANSFER: u8 = 3;
pub(crate) const TAG_BANDWIDTH_UPGRADE_NEGOTIATION: u8 = 4;
pub(crate) const TAG_KEEP_ALIVE: u8 = 5;
pub(crate) const TAG_DISCONNECTION: u8 = 6;
pub(crate) const TAG_AUTO_RECONNECT: u8 = 7;

/// The top-level `V1Frame` union.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    PayloadTransfer(PayloadTransfer),
    BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation),
    KeepAlive(KeepAlive),
    Disconnection(Disconnection),
    AutoReconnect(AutoReconnect),
}

impl Frame {
    fn tag(&self) -> u8 {
        match self {
            Frame::ConnectionRequest(_) => TAG_CONNECTION_REQUEST,
            Frame::ConnectionResponse(_) => TAG_CONNECTION_RESPONSE,
            Frame::PayloadTransfer(_) => TAG_PAYLOAD_TRANSFER,
            Frame::BandwidthUpgradeNegotiation(_) => TAG_BANDWIDTH_UPGRADE_NEGOTIATION,
            Frame::KeepAlive(_) => TAG_KEEP_ALIVE,
            Frame::Disconnection(_) => TAG_DISCONNECTION,
            Frame::AutoReconnect(_) => TAG_AUTO_RECONNECT,
        }
    }

    fn encode_body<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Frame::ConnectionRequest(frame) => frame.encode(encoder),
            Frame::ConnectionResponse(frame) => frame.encode(encoder),
            Frame::PayloadTransfer(frame) => frame.encode(encoder),
            Frame::BandwidthUpgradeNegotiation(frame) => frame.encode(encoder),
            Frame::KeepAlive(frame) => frame.encode(encoder),
            Frame::Disconnection(frame) => frame.encode(encoder),
            Frame::AutoReconnect(frame) => frame.encode(encoder),
        }
    }

    /// Encodes this frame as a complete `OfflineFrame`.
    pub fn encode(&self) -> Vec<u8> {
        let mut storage = vec![0u8; MAX_FRAME_SIZE];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&V1);
        encoder.encode(&self.tag());
        self.encode_body(&mut encoder);
        let len = encoder.len();
        storage.truncate(len);
        storage
    }

    /// Decodes one `OfflineFrame` from `bytes`. Unknown frame types or a
    /// version mismatch surface as [`DecodeError::InvalidProtocolBuffer`]
    /// per §4.1's decoding policy; higher layers close the channel with
    /// reason `IO_ERROR` in response.
    pub fn decode(bytes: &mut [u8]) -> Result<Self> {
        let buffer = DecoderBufferMut::new(bytes);
        let (version, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        if version != V1 {
            return Err(DecodeError::InvalidProtocolBuffer);
        }
        let (tag, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        match tag {
            TAG_CONNECTION_REQUEST => {
                ConnectionRequest::decode_body(buffer).map(Frame::ConnectionRequest)
            }
            TAG_CONNECTION_RESPONSE => {
                ConnectionResponse::decode_body(buffer).map(Frame::ConnectionResponse)
            }
            TAG_PAYLOAD_TRANSFER => {
                PayloadTransfer::decode_body(buffer).map(Frame::PayloadTransfer)
            }
            TAG_BANDWIDTH_UPGRADE_NEGOTIATION => {
                BandwidthUpgradeNegotiation::decode_body(buffer)
                    .map(Frame::BandwidthUpgradeNegotiation)
            }
            TAG_KEEP_ALIVE => KeepAlive::decode_body(buffer).map(Frame::KeepAlive),
            TAG_DISCONNECTION => Disconnection::decode_body(buffer).map(Frame::Disconnection),
            TAG_AUTO_RECONNECT => AutoReconnect::decode_body(buffer).map(Frame::AutoReconnect),
            _ => Err(DecodeError::InvalidProtocolBuffer),
        }
    }
}

/// Reads a length-prefixed (`u8` length) byte slice, the shape used for
/// every variable-length field in this codec (endpoint info, OS info,
/// device names, opaque medium blobs).
pub(crate) fn decode_len_prefixed<'a>(
    buffer: DecoderBufferMut<'a>,
) -> Result<(Vec<u8>, DecoderBufferMut<'a>)> {
    let (slice, buffer) = buffer
        .decode_slice_with_len_prefix::<u8>()
        .map_err(DecodeError::from)?;
    Ok((slice.into_less_safe_slice().to_vec(), buffer))
}

pub(crate) fn encode_len_prefixed<E: Encoder>(encoder: &mut E, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u8::MAX as usize);
    encoder.encode(&(bytes.len() as u8));
    encoder.write_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_round_trips() {
        let frame = Frame::KeepAlive(KeepAlive);
        let mut bytes = frame.encode();
        let decoded = Frame::decode(&mut bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn unknown_tag_is_invalid_protocol_buffer() {
        let mut bytes = vec![V1, 0xFF];
        let err = Frame::decode(&mut bytes).unwrap_err();
        assert_eq!(err, DecodeError::InvalidProtocolBuffer);
    }

    #[test]
    fn version_mismatch_is_invalid_protocol_buffer() {
        let mut bytes = vec![2, TAG_KEEP_ALIVE];
        let err = Frame::decode(&mut bytes).unwrap_err();
        assert_eq!(err, DecodeError::InvalidProtocolBuffer);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut bytes = vec![V1];
        assert!(Frame::decode(&mut bytes).is_err());
    }
}
