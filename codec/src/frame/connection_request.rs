//! `ConnectionRequest` (§4.1): the frame an initiator writes once it has
//! opened a channel to a discovered endpoint, and a listener reads within
//! the 2-second read deadline (§4.5 "Incoming connection", §5).

use crate::error::{DecodeError, Result};
use crate::frame::{decode_len_prefixed, encode_len_prefixed};
use s2n_codec::{DecoderBufferMut, Encoder};

/// Medium-specific metadata carried alongside a connection request, used
/// to populate the local `ConnectionInfo` on the receiving side (§4.5
/// step 7: "copy remote medium metadata into local ConnectionInfo").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediumMetadata {
    pub supports_5ghz: bool,
    pub bssid: Option<[u8; 6]>,
    pub ap_frequency: i32,
    pub ip_address: Option<[u8; 4]>,
}

impl MediumMetadata {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&(self.supports_5ghz as u8));
        match self.bssid {
            Some(bssid) => {
                encoder.encode(&1u8);
                encoder.write_slice(&bssid);
            }
            None => encoder.encode(&0u8),
        }
        encoder.encode(&self.ap_frequency);
        match self.ip_address {
            Some(ip) => {
                encoder.encode(&1u8);
                encoder.write_slice(&ip);
            }
            None => encoder.encode(&0u8),
        }
    }

    fn decode(buffer: DecoderBufferMut<'_>) -> Result<(Self, DecoderBufferMut<'_>)> {
        let (supports_5ghz, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (has_bssid, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (bssid, buffer) = if has_bssid != 0 {
            let (slice, buffer) = buffer.decode_slice(6).map_err(DecodeError::from)?;
            let mut mac = [0u8; 6];
            mac.copy_from_slice(slice.into_less_safe_slice());
            (Some(mac), buffer)
        } else {
            (None, buffer)
        };
        let (ap_frequency, buffer) = buffer.decode::<i32>().map_err(DecodeError::from)?;
        let (has_ip, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (ip_address, buffer) = if has_ip != 0 {
            let (slice, buffer) = buffer.decode_slice(4).map_err(DecodeError::from)?;
            let mut ip = [0u8; 4];
            ip.copy_from_slice(slice.into_less_safe_slice());
            (Some(ip), buffer)
        } else {
            (None, buffer)
        };
        Ok((
            Self {
                supports_5ghz: supports_5ghz != 0,
                bssid,
                ap_frequency,
                ip_address,
            },
            buffer,
        ))
    }
}

/// The `connections_device | presence_device` sub-message. Absent for the
/// legacy layout (§4.5 step 5: "else fall back to the legacy layout").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceInfo {
    Connections { device_name: Vec<u8> },
    Presence { device_name: Vec<u8> },
}

impl DeviceInfo {
    fn tag(&self) -> u8 {
        match self {
            DeviceInfo::Connections { .. } => 1,
            DeviceInfo::Presence { .. } => 2,
        }
    }

    fn device_name(&self) -> &[u8] {
        match self {
            DeviceInfo::Connections { device_name } | DeviceInfo::Presence { device_name } => {
                device_name
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub endpoint_id: [u8; 4],
    pub endpoint_info: Vec<u8>,
    pub nonce: u32,
    pub medium_metadata: MediumMetadata,
    /// Mediums the initiator supports, as a [`pcp_core::medium::MediumSelector`]
    /// bitmask (see that type's internal bit layout).
    pub mediums: u8,
    pub keep_alive_interval_ms: u32,
    pub keep_alive_timeout_ms: u32,
    pub device: Option<DeviceInfo>,
}

impl ConnectionRequest {
    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.endpoint_id);
        encode_len_prefixed(encoder, &self.endpoint_info);
        encoder.encode(&self.nonce);
        self.medium_metadata.encode(encoder);
        encoder.encode(&self.mediums);
        encoder.encode(&self.keep_alive_interval_ms);
        encoder.encode(&self.keep_alive_timeout_ms);
        match &self.device {
            Some(device) => {
                encoder.encode(&device.tag());
                encode_len_prefixed(encoder, device.device_name());
            }
            None => encoder.encode(&0u8),
        }
    }

    pub(crate) fn decode_body(buffer: DecoderBufferMut<'_>) -> Result<Self> {
        let (id_slice, buffer) = buffer.decode_slice(4).map_err(DecodeError::from)?;
        let mut endpoint_id = [0u8; 4];
        endpoint_id.copy_from_slice(id_slice.into_less_safe_slice());

        let (endpoint_info, buffer) = decode_len_prefixed(buffer)?;
        let (nonce, buffer) = buffer.decode::<u32>().map_err(DecodeError::from)?;
        let (medium_metadata, buffer) = MediumMetadata::decode(buffer)?;
        let (mediums, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (keep_alive_interval_ms, buffer) = buffer.decode::<u32>().map_err(DecodeError::from)?;
        let (keep_alive_timeout_ms, buffer) = buffer.decode::<u32>().map_err(DecodeError::from)?;
        let (device_tag, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (device, _buffer) = match device_tag {
            0 => (None, buffer),
            1 => {
                let (name, buffer) = decode_len_prefixed(buffer)?;
                (
                    Some(DeviceInfo::Connections { device_name: name }),
                    buffer,
                )
            }
            2 => {
                let (name, buffer) = decode_len_prefixed(buffer)?;
                (Some(DeviceInfo::Presence { device_name: name }), buffer)
            }
            _ => return Err(DecodeError::InvalidProtocolBuffer),
        };

        Ok(Self {
            endpoint_id,
            endpoint_info,
            nonce,
            medium_metadata,
            mediums,
            keep_alive_interval_ms,
            keep_alive_timeout_ms,
            device,
        })
    }
}
