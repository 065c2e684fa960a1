//! `ConnectionResponse` (§4.1): written by both sides once their client
//! has locally accepted or rejected.
//!
//! The legacy `status` field and the newer `response` field are written
//! in lock-step; the decoder accepts a frame that only set one of the two
//! (an `response` presence byte of `0` means "not written", in which case
//! the resolved value is inferred from `status == 0`).

use crate::error::{DecodeError, Result};
use crate::frame::{decode_len_prefixed, encode_len_prefixed};
use s2n_codec::{DecoderBufferMut, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionResponse {
    pub status: i32,
    pub response: Response,
    pub os_info: Vec<u8>,
    pub multiplex_socket_bitmask: u32,
    pub safe_to_disconnect_version: u8,
}

impl ConnectionResponse {
    pub fn accept(os_info: Vec<u8>) -> Self {
        Self {
            status: 0,
            response: Response::Accept,
            os_info,
            multiplex_socket_bitmask: 0,
            safe_to_disconnect_version: 0,
        }
    }

    pub fn reject(os_info: Vec<u8>) -> Self {
        Self {
            status: 1,
            response: Response::Reject,
            os_info,
            multiplex_socket_bitmask: 0,
            safe_to_disconnect_version: 0,
        }
    }

    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.status);
        // response is always written by this encoder; presence=1.
        encoder.encode(&1u8);
        encoder.encode(&match self.response {
            Response::Accept => 0u8,
            Response::Reject => 1u8,
        });
        encode_len_prefixed(encoder, &self.os_info);
        encoder.encode(&self.multiplex_socket_bitmask);
        encoder.encode(&self.safe_to_disconnect_version);
    }

    pub(crate) fn decode_body(buffer: DecoderBufferMut<'_>) -> Result<Self> {
        let (status, buffer) = buffer.decode::<i32>().map_err(DecodeError::from)?;
        let (response_present, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
        let (response, buffer) = if response_present != 0 {
            let (tag, buffer) = buffer.decode::<u8>().map_err(DecodeError::from)?;
            let response = match tag {
                0 => Response::Accept,
                1 => Response::Reject,
                _ => return Err(DecodeError::InvalidProtocolBuffer),
            };
            (response, buffer)
        } else {
            // unset `response` -> infer from the legacy `status` field.
            let response = if status == 0 {
                Response::Accept
            } else {
                Response::Reject
            };
            (response, buffer)
        };
        let (os_info, buffer) = decode_len_prefixed(buffer)?;
        let (multiplex_socket_bitmask, buffer) =
            buffer.decode::<u32>().map_err(DecodeError::from)?;
        let (safe_to_disconnect_version, _buffer) =
            buffer.decode::<u8>().map_err(DecodeError::from)?;

        Ok(Self {
            status,
            response,
            os_info,
            multiplex_socket_bitmask,
            safe_to_disconnect_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn accept_round_trips() {
        let frame = Frame::ConnectionResponse(ConnectionResponse::accept(b"os".to_vec()));
        let mut bytes = frame.encode();
        let decoded = Frame::decode(&mut bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn reject_round_trips() {
        let frame = Frame::ConnectionResponse(ConnectionResponse::reject(Vec::new()));
        let mut bytes = frame.encode();
        let decoded = Frame::decode(&mut bytes).unwrap();
        assert_eq!(frame, decoded);
    }
}
