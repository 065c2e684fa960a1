//! Endpoint identity: the 4-character short id and the opaque endpoint-info
//! blob surfaced to remote peers in advertisements.

use crate::random;
use core::fmt;

/// Endpoint info must stay under this length to fit the advertisement blob
/// (§3, §6.2: "length-prefixed <=130 bytes").
pub const MAX_ENDPOINT_INFO_LEN: usize = 130;

const ID_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 4;

/// A 4-character opaque short id, randomly assigned by the local side for
/// its own endpoint. Stable within an advertising session; rotated on
/// high-visibility -> low-visibility transitions unless the client opts
/// into stable-endpoint-id mode.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId([u8; ID_LEN]);

impl EndpointId {
    /// Generates a new id from the given random source.
    pub fn generate(rng: &mut dyn random::Generator) -> Self {
        let mut bytes = [0u8; 1];
        let mut id = [0u8; ID_LEN];
        for slot in &mut id {
            rng.public_random_fill(&mut bytes);
            *slot = ID_ALPHABET[(bytes[0] as usize) % ID_ALPHABET.len()];
        }
        Self(id)
    }

    /// Builds an id from raw ASCII bytes, e.g. as parsed off the wire.
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // ID_ALPHABET is ASCII-only, so this is always valid UTF-8.
        core::str::from_utf8(&self.0).expect("endpoint id is always ASCII")
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.as_str())
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, client-supplied bytes surfaced to remote peers in advertisements.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EndpointInfo(Vec<u8>);

impl EndpointInfo {
    /// Returns `None` if `bytes` is at or beyond [`MAX_ENDPOINT_INFO_LEN`].
    pub fn new(bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() >= MAX_ENDPOINT_INFO_LEN {
            return None;
        }
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointInfo({} bytes)", self.0.len())
    }
}
