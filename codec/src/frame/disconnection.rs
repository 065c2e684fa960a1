//! `Disconnection { request_safe_to_disconnect, ack_safe_to_disconnect }`
//! (§4.1). Sent unencrypted as the very last frame of a bandwidth-upgrade
//! channel swap (§4.6 step 4) — the crypto sequence counter would
//! otherwise drift once the new channel takes over.

use crate::error::{DecodeError, Result};
use s2n_codec::{DecoderBufferMut, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnection {
    pub request_safe_to_disconnect: bool,
    pub ack_safe_to_disconnect: bool,
}

impl Disconnection {
    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&(self.request_safe_to_disconnect as u8));
        encoder.encode(&(self.ack_safe_to_disconnect as u8));
    }

    pub(crate) fn decode_body(buffer: DecoderBufferMut<'_>) -> Result<Self> {
        let (request, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (ack, _buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        Ok(Self {
            request_safe_to_disconnect: request != 0,
            ack_safe_to_disconnect: ack != 0,
        })
    }
}
