//! `AutoReconnect { event_type, endpoint_id }` (§4.1).

use crate::error::{DecodeError, Result};
use s2n_codec::{DecoderBufferMut, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoReconnect {
    pub event_type: u8,
    pub endpoint_id: [u8; 4],
}

impl AutoReconnect {
    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.event_type);
        encoder.write_slice(&self.endpoint_id);
    }

    pub(crate) fn decode_body(buffer: DecoderBufferMut<'_>) -> Result<Self> {
        let (event_type, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (id_slice, _buffer) = buffer.decode_slice(4).map_err(DecodeError::from)?;
        let mut endpoint_id = [0u8; 4];
        endpoint_id.copy_from_slice(id_slice.into_less_safe_slice());
        Ok(Self {
            event_type,
            endpoint_id,
        })
    }
}
