#![forbid(unsafe_code)]

//! Shared primitives consumed by `pcp-transport` and the `pcp` facade:
//! endpoint identity, medium selection, the connection topology strategy
//! tag, random and time sources, structured events, and the feature-flag
//! snapshot each client session captures at construction.

pub mod discovered;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod flags;
pub mod medium;
pub mod random;
pub mod strategy;
pub mod time;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use discovered::{DiscoveredEndpoint, DiscoveredEndpointKind, WebRtcState};
pub use endpoint::{EndpointId, EndpointInfo};
pub use error::PcpError;
pub use flags::FlagsSnapshot;
pub use medium::{Medium, MediumSelector};
pub use strategy::{Pcp, Strategy};
pub use time::Timestamp;
