//! `KeepAlive {}` — an empty body, sent on the medium's configured
//! interval to keep the channel from timing out (§4.1).

use crate::error::Result;
use s2n_codec::{DecoderBufferMut, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepAlive;

impl KeepAlive {
    pub(crate) fn encode<E: Encoder>(&self, _encoder: &mut E) {}

    pub(crate) fn decode_body(_buffer: DecoderBufferMut<'_>) -> Result<Self> {
        Ok(KeepAlive)
    }
}
