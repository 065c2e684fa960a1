//! Structured events emitted at each `PcpHandler` state transition. Kept
//! deliberately thin compared to `s2n-quic-core::event`'s generated
//! subscriber machinery: the core only ever emits through `tracing`'s
//! facade, exactly as the teacher crate does when no custom subscriber is
//! wired up.

use crate::{endpoint::EndpointId, medium::Medium};

/// A named, loggable state transition. Each variant corresponds to a
/// transition named in spec.md §5 "Ordering guarantees": discovered ->
/// pending -> encrypted-registered -> (accepted | rejected) ->
/// disconnected.
#[derive(Debug, Clone)]
pub enum Event {
    EndpointFound {
        endpoint_id: EndpointId,
        medium: Medium,
    },
    EndpointLost {
        endpoint_id: EndpointId,
        medium: Medium,
    },
    ConnectionInitiated {
        endpoint_id: EndpointId,
        medium: Medium,
        is_incoming: bool,
    },
    TieBreakResolved {
        endpoint_id: EndpointId,
        local_nonce: u32,
        remote_nonce: u32,
        outgoing_kept: bool,
    },
    HandshakeFailed {
        endpoint_id: EndpointId,
    },
    ConnectionAccepted {
        endpoint_id: EndpointId,
    },
    ConnectionRejected {
        endpoint_id: EndpointId,
    },
    BandwidthUpgradeStarted {
        endpoint_id: EndpointId,
        to_medium: Medium,
    },
    EndpointDisconnected {
        endpoint_id: EndpointId,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::EndpointFound { .. } => "endpoint_found",
            Event::EndpointLost { .. } => "endpoint_lost",
            Event::ConnectionInitiated { .. } => "connection_initiated",
            Event::TieBreakResolved { .. } => "tie_break_resolved",
            Event::HandshakeFailed { .. } => "handshake_failed",
            Event::ConnectionAccepted { .. } => "connection_accepted",
            Event::ConnectionRejected { .. } => "connection_rejected",
            Event::BandwidthUpgradeStarted { .. } => "bandwidth_upgrade_started",
            Event::EndpointDisconnected { .. } => "endpoint_disconnected",
        }
    }

    /// Emits the event through `tracing` at the severity appropriate to
    /// its meaning: failures at `warn`, everything else at `debug`.
    pub fn emit(&self) {
        match self {
            Event::HandshakeFailed { endpoint_id } => {
                tracing::warn!(event = self.name(), endpoint_id = %endpoint_id);
            }
            Event::ConnectionRejected { endpoint_id } => {
                tracing::info!(event = self.name(), endpoint_id = %endpoint_id);
            }
            _ => {
                tracing::debug!(event = ?self, name = self.name());
            }
        }
    }
}
