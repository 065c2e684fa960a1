#![forbid(unsafe_code)]

//! `FrameCodec`: a pure `encode(Frame) -> bytes`, `decode(bytes) -> Frame
//! | InvalidProtocolBuffer` pair over the length-delimited, versioned
//! control-frame binary format (§4.1, §6.1).

pub mod error;
pub mod frame;

pub use error::DecodeError;
pub use frame::Frame;
