//! `BandwidthUpgradeNegotiation` (§4.1, §4.6): the channel-swap protocol
//! run when either side proposes migrating an endpoint to a faster
//! medium.

use crate::error::{DecodeError, Result};
use crate::frame::{decode_len_prefixed, encode_len_prefixed};
use s2n_codec::{DecoderBufferMut, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BwuEventType {
    UpgradePathAvailable,
    LastWriteToPriorChannel,
    SafeToClosePriorChannel,
    ClientIntroduction,
    ClientIntroductionAck,
    UpgradeFailure,
}

impl BwuEventType {
    fn as_u8(self) -> u8 {
        match self {
            Self::UpgradePathAvailable => 1,
            Self::LastWriteToPriorChannel => 2,
            Self::SafeToClosePriorChannel => 3,
            Self::ClientIntroduction => 4,
            Self::ClientIntroductionAck => 5,
            Self::UpgradeFailure => 6,
        }
    }

    fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::UpgradePathAvailable,
            2 => Self::LastWriteToPriorChannel,
            3 => Self::SafeToClosePriorChannel,
            4 => Self::ClientIntroduction,
            5 => Self::ClientIntroductionAck,
            6 => Self::UpgradeFailure,
            _ => return Err(DecodeError::InvalidProtocolBuffer),
        })
    }
}

/// `CLIENT_INTRODUCTION { endpoint_id, supports_disabling_encryption }`
/// (§4.6 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIntroduction {
    pub endpoint_id: [u8; 4],
    pub supports_disabling_encryption: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthUpgradeNegotiation {
    pub event_type: BwuEventType,
    /// Opaque, medium-specific connection info for `UPGRADE_PATH_AVAILABLE`.
    pub upgrade_path_info: Option<Vec<u8>>,
    pub client_introduction: Option<ClientIntroduction>,
}

impl BandwidthUpgradeNegotiation {
    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.event_type.as_u8());
        match &self.upgrade_path_info {
            Some(info) => {
                encoder.encode(&1u8);
                encode_len_prefixed(encoder, info);
            }
            None => encoder.encode(&0u8),
        }
        match &self.client_introduction {
            Some(intro) => {
                encoder.encode(&1u8);
                encoder.write_slice(&intro.endpoint_id);
                encoder.encode(&(intro.supports_disabling_encryption as u8));
            }
            None => encoder.encode(&0u8),
        }
    }

    pub(crate) fn decode_body(buffer: DecoderBufferMut<'_>) -> Result<Self> {
        let (event_tag, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let event_type = BwuEventType::from_u8(event_tag)?;

        let (has_path_info, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (upgrade_path_info, buffer) = if has_path_info != 0 {
            let (info, buffer) = decode_len_prefixed(buffer)?;
            (Some(info), buffer)
        } else {
            (None, buffer)
        };

        let (has_intro, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (client_introduction, _buffer) = if has_intro != 0 {
            let (id_slice, buffer) = buffer.decode_slice(4).map_err(DecodeError::from)?;
            let mut endpoint_id = [0u8; 4];
            endpoint_id.copy_from_slice(id_slice.into_less_safe_slice());
            let (supports, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
            (
                Some(ClientIntroduction {
                    endpoint_id,
                    supports_disabling_encryption: supports != 0,
                }),
                buffer,
            )
        } else {
            (None, buffer)
        };

        Ok(Self {
            event_type,
            upgrade_path_info,
            client_introduction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn upgrade_path_available_round_trips() {
        let frame = Frame::BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation {
            event_type: BwuEventType::UpgradePathAvailable,
            upgrade_path_info: Some(b"wifi-lan:10.0.0.1:4242".to_vec()),
            client_introduction: None,
        });
        let mut bytes = frame.encode();
        assert_eq!(frame, Frame::decode(&mut bytes).unwrap());
    }

    #[test]
    fn client_introduction_round_trips() {
        let frame = Frame::BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiation {
            event_type: BwuEventType::ClientIntroduction,
            upgrade_path_info: None,
            client_introduction: Some(ClientIntroduction {
                endpoint_id: *b"ABCD",
                supports_disabling_encryption: true,
            }),
        });
        let mut bytes = frame.encode();
        assert_eq!(frame, Frame::decode(&mut bytes).unwrap());
    }
}
