//! `PayloadTransfer` (§4.1): application payload framing. Out of scope
//! per spec.md §1 ("Payload transfer... the wire-format of application
//! payloads"); the core only round-trips the body opaquely, exactly as
//! specified in §2's component table.

use crate::error::Result;
use s2n_codec::{DecoderBufferMut, Encoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTransfer {
    pub raw_body: Vec<u8>,
}

impl PayloadTransfer {
    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.raw_body);
    }

    pub(crate) fn decode_body(buffer: DecoderBufferMut<'_>) -> Result<Self> {
        let raw_body = buffer.into_less_safe_slice().to_vec();
        Ok(Self { raw_body })
    }
}
