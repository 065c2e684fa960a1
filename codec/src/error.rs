//! Decoding failures, mirroring the shape of `s2n_codec::DecoderError`'s
//! variants (§4.1 "Decoding policy", §7 "Protocol framing errors").

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("the frame was malformed or referenced an unknown frame type")]
    InvalidProtocolBuffer,
    #[error("the buffer ended before the frame was fully decoded")]
    UnexpectedEof,
    #[error("a length-prefixed field declared a length that exceeds the buffer")]
    LengthCapacityExceeded,
}

impl From<s2n_codec::DecoderError> for DecodeError {
    fn from(_: s2n_codec::DecoderError) -> Self {
        // s2n_codec collapses all of its own cursor-exhaustion and
        // capacity errors into one enum; every one of them means the
        // frame was malformed for our purposes.
        DecodeError::UnexpectedEof
    }
}

pub type Result<T> = core::result::Result<T, DecodeError>;
