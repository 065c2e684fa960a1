//! `MediumRegistry`: the external capability set the core consumes for
//! everything that touches a real radio or socket (§6.3). Concrete
//! mediums are out of scope; the handler only ever calls through this
//! trait.

use crate::channel::EndpointChannel;
use pcp_core::discovered::DiscoveredEndpointKind;
use pcp_core::{DiscoveredEndpoint, EndpointId, Medium, PcpError};
use std::sync::Arc;

/// One concrete candidate the handler may dial, built either from a
/// discovery result or synthesized (§4.5 "Outgoing connection" step 2).
pub struct ConnectTarget<'a> {
    pub endpoint_id: EndpointId,
    pub medium: Medium,
    pub discovered: Option<&'a DiscoveredEndpoint>,
}

/// A medium's "found" callback (§6.3 `start_discovery(service_id,
/// callbacks)`): invoked with the medium-specific locator (the part only
/// the concrete medium knows how to produce, e.g. a Bluetooth MAC) and
/// the raw advertisement blob it scanned off the air. The core owns
/// parsing and validating that blob (§4.5 "Discovery" steps 1-3); the
/// medium never needs to understand its contents.
pub type DiscoveryFoundCallback = Arc<dyn Fn(DiscoveredEndpointKind, Vec<u8>) + Send + Sync>;

pub trait MediumRegistry: Send {
    fn is_available(&self, medium: Medium) -> bool;

    fn start_advertising(&mut self, medium: Medium, service_id: &str, blob: &[u8]) -> Result<(), PcpError>;

    fn stop_advertising(&mut self, medium: Medium, service_id: &str);

    fn start_accepting(&mut self, medium: Medium, service_id: &str) -> Result<(), PcpError>;

    fn stop_accepting(&mut self, medium: Medium, service_id: &str);

    /// Starts scanning `medium` for `service_id`'s advertisement,
    /// reporting every sighting through `on_found` (§6.3). Endpoint-lost
    /// detection is the timeout-based alarm in `DiscoveredEndpointTable`,
    /// not a callback here, since a scan has no reliable "gone" signal of
    /// its own.
    fn start_discovery(
        &mut self,
        medium: Medium,
        service_id: &str,
        on_found: DiscoveryFoundCallback,
    ) -> Result<(), PcpError>;

    fn stop_discovery(&mut self, medium: Medium, service_id: &str);

    /// Opens a channel to `target`, blocking the calling worker (never S)
    /// until the attempt resolves (§4.5 "Outgoing connection" step 3).
    fn connect(&mut self, target: ConnectTarget<'_>) -> Result<Box<dyn EndpointChannel>, PcpError>;
}
