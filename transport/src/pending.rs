//! `PendingConnectionInfo` and the `PendingConnections` map (§3, §5
//! "pending_connections_ is accessed only from S").
//!
//! The source keeps a raw back-pointer from `PendingConnectionInfo` to its
//! client; per the §9 design note we instead store a stable integer
//! session handle, so the map never borrows across the client/handler
//! boundary.

use crate::channel::EndpointChannel;
use crate::crypto::{ChannelToken, ConnectionContext};
use pcp_core::{EndpointId, EndpointInfo, Medium, MediumSelector, PcpError};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

/// A stable handle into the caller's client-session registry, taking the
/// place of the source's raw back-pointer (§9 "Cyclic client<->handler
/// graph").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Negotiated connection parameters carried on the `ConnectionRequest`
/// frame and copied onto the pending info (§3 "connection_options").
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub keep_alive_interval_ms: u32,
    pub keep_alive_timeout_ms: u32,
    pub allowed_upgrade_mediums: MediumSelector,
    pub remote_bluetooth_mac: Option<[u8; 6]>,
}

/// Outcome callbacks a client supplies when it requests or accepts a
/// connection (§6.3 "ClientSession").
pub trait ConnectionListener: Send {
    fn on_connection_initiated(&mut self, endpoint_id: EndpointId, is_incoming: bool);
    /// Fired alongside `on_connection_accepted` once both sides' decisions
    /// are in (§4.5 "evaluate_connection_result"): the channel is
    /// encrypted and live, distinct from `on_connection_accepted`'s "the
    /// decision was mutual acceptance" signal.
    fn on_connection_established(&mut self, endpoint_id: EndpointId);
    fn on_connection_accepted(&mut self, endpoint_id: EndpointId);
    fn on_connection_rejected(&mut self, endpoint_id: EndpointId, reason: PcpError);
    fn on_bandwidth_changed(&mut self, endpoint_id: EndpointId, medium: Medium);
    fn on_disconnected(&mut self, endpoint_id: EndpointId);
}

/// Where a pending connection's handshake currently stands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthenticationStatus {
    AwaitingHandshake,
    Authenticated,
    Failed,
}

/// Wraps the caller's one-shot completion so invariant 2 (§8: "if
/// `result` is unset when the info is destroyed, it becomes set to
/// `kError` synchronously") holds without any explicit teardown call.
pub struct ResultSlot {
    sender: Option<oneshot::Sender<Result<(), PcpError>>>,
}

impl ResultSlot {
    pub fn new() -> (Self, oneshot::Receiver<Result<(), PcpError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Some(tx),
            },
            rx,
        )
    }

    pub fn set(&mut self, result: Result<(), PcpError>) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for ResultSlot {
    fn drop(&mut self) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(Err(PcpError::Error));
        }
    }
}

/// The hottest entity in the system (§3): owns the in-flight channel, the
/// post-handshake crypto context, and the caller's one-shot result.
pub struct PendingConnectionInfo {
    pub client: SessionHandle,
    pub endpoint_id: EndpointId,
    pub remote_endpoint_info: EndpointInfo,
    /// 32-bit tie-break nonce. Immutable after creation (§3 invariant 4).
    pub nonce: u32,
    /// True if this side received the `ConnectionRequest` (the literal,
    /// unmodified direction of the wire message).
    pub is_incoming: bool,
    /// Which handshake role to run. See the doc comment on
    /// [`crate::crypto::Role`] for why this is tracked separately from
    /// `is_incoming` (§9 open question on `RequestConnectionV3`).
    pub authenticate_as_initiator: bool,
    pub start_time: Instant,
    pub connection_options: ConnectionOptions,
    pub supported_mediums: MediumSelector,
    pub medium: Medium,
    /// Exclusive until handed to the channel manager at register time
    /// (§3 invariant 2, §5 "EndpointChannel ownership").
    pub channel: Option<Box<dyn EndpointChannel>>,
    pub channel_token: ChannelToken,
    pub ukey2_context: Option<Box<dyn ConnectionContext>>,
    pub authentication_status: AuthenticationStatus,
    pub authentication_token: Option<String>,
    pub local_decision: Option<bool>,
    pub remote_decision: Option<bool>,
    result: ResultSlot,
    pub listener: Box<dyn ConnectionListener>,
}

impl PendingConnectionInfo {
    pub fn complete(&mut self, result: Result<(), PcpError>) {
        self.result.set(result);
    }
}

impl std::fmt::Debug for PendingConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConnectionInfo")
            .field("endpoint_id", &self.endpoint_id)
            .field("is_incoming", &self.is_incoming)
            .field("medium", &self.medium)
            .field("authentication_status", &self.authentication_status)
            .finish()
    }
}

/// Builder bundling the fields a caller supplies up front; `channel`,
/// `channel_token` and `listener` still need to be set by the caller
/// before insertion, since they vary by call site (request vs. incoming).
pub struct NewPendingConnection {
    pub client: SessionHandle,
    pub endpoint_id: EndpointId,
    pub remote_endpoint_info: EndpointInfo,
    pub nonce: u32,
    pub is_incoming: bool,
    pub authenticate_as_initiator: bool,
    pub connection_options: ConnectionOptions,
    pub supported_mediums: MediumSelector,
    pub medium: Medium,
    pub channel: Box<dyn EndpointChannel>,
    pub channel_token: ChannelToken,
    pub listener: Box<dyn ConnectionListener>,
}

/// `pending_connections_`: accessed only from the serial executor (§5),
/// so this map takes `&mut self` throughout rather than an internal lock.
#[derive(Default)]
pub struct PendingConnections {
    by_endpoint: HashMap<EndpointId, PendingConnectionInfo>,
}

impl PendingConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new pending connection, returning its result receiver.
    /// Returns `None` without mutating state if one already exists for
    /// this `endpoint_id` (§3 invariant 1).
    pub fn insert(
        &mut self,
        new: NewPendingConnection,
    ) -> Option<oneshot::Receiver<Result<(), PcpError>>> {
        if self.by_endpoint.contains_key(&new.endpoint_id) {
            return None;
        }
        let (result, receiver) = ResultSlot::new();
        let info = PendingConnectionInfo {
            client: new.client,
            endpoint_id: new.endpoint_id,
            remote_endpoint_info: new.remote_endpoint_info,
            nonce: new.nonce,
            is_incoming: new.is_incoming,
            authenticate_as_initiator: new.authenticate_as_initiator,
            start_time: Instant::now(),
            connection_options: new.connection_options,
            supported_mediums: new.supported_mediums,
            medium: new.medium,
            channel: Some(new.channel),
            channel_token: new.channel_token,
            ukey2_context: None,
            authentication_status: AuthenticationStatus::AwaitingHandshake,
            authentication_token: None,
            local_decision: None,
            remote_decision: None,
            result,
            listener: new.listener,
        };
        self.by_endpoint.insert(new.endpoint_id, info);
        Some(receiver)
    }

    pub fn contains(&self, endpoint_id: EndpointId) -> bool {
        self.by_endpoint.contains_key(&endpoint_id)
    }

    pub fn get_mut(&mut self, endpoint_id: EndpointId) -> Option<&mut PendingConnectionInfo> {
        self.by_endpoint.get_mut(&endpoint_id)
    }

    /// Removes and returns the entry; if its result was never set, the
    /// returned info's `Drop` (via its `ResultSlot`) completes it with
    /// `kError` as soon as it goes out of scope.
    pub fn remove(&mut self, endpoint_id: EndpointId) -> Option<PendingConnectionInfo> {
        self.by_endpoint.remove(&endpoint_id)
    }

    /// Removes the entry and immediately completes its result, so the
    /// caller doesn't have to rely on drop timing for this common path.
    pub fn remove_with_result(
        &mut self,
        endpoint_id: EndpointId,
        result: Result<(), PcpError>,
    ) -> Option<PendingConnectionInfo> {
        let mut info = self.by_endpoint.remove(&endpoint_id)?;
        info.complete(result);
        Some(info)
    }

    pub fn len(&self) -> usize {
        self.by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    pub fn count_by_direction(&self) -> crate::strategy::ConnectionCounts {
        let mut counts = crate::strategy::ConnectionCounts::default();
        for info in self.by_endpoint.values() {
            if info.is_incoming {
                counts.incoming += 1;
            } else {
                counts.outgoing += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcp_core::testing as core_testing;

    struct NullListener;
    impl ConnectionListener for NullListener {
        fn on_connection_initiated(&mut self, _endpoint_id: EndpointId, _is_incoming: bool) {}
        fn on_connection_established(&mut self, _endpoint_id: EndpointId) {}
        fn on_connection_accepted(&mut self, _endpoint_id: EndpointId) {}
        fn on_connection_rejected(&mut self, _endpoint_id: EndpointId, _reason: PcpError) {}
        fn on_bandwidth_changed(&mut self, _endpoint_id: EndpointId, _medium: Medium) {}
        fn on_disconnected(&mut self, _endpoint_id: EndpointId) {}
    }

    struct NullChannel;
    impl EndpointChannel for NullChannel {
        fn read(&mut self) -> Result<Vec<u8>, crate::channel::ChannelError> {
            Err(crate::channel::ChannelError::Closed)
        }
        fn write(&mut self, _bytes: &[u8]) -> Result<(), crate::channel::ChannelError> {
            Ok(())
        }
        fn close(&mut self, _reason: crate::channel::CloseReason) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn attach_encryption(&mut self, _context: Box<dyn ConnectionContext>) {}
        fn medium(&self) -> Medium {
            Medium::WifiLan
        }
        fn name(&self) -> &str {
            "null"
        }
        fn last_read_time(&self) -> Option<pcp_core::Timestamp> {
            None
        }
        fn is_paused(&self) -> bool {
            false
        }
    }

    fn sample(endpoint_id: EndpointId) -> NewPendingConnection {
        NewPendingConnection {
            client: SessionHandle(1),
            endpoint_id,
            remote_endpoint_info: EndpointInfo::new(b"info".to_vec()).unwrap(),
            nonce: 42,
            is_incoming: false,
            authenticate_as_initiator: true,
            connection_options: ConnectionOptions {
                keep_alive_interval_ms: 5000,
                keep_alive_timeout_ms: 30000,
                allowed_upgrade_mediums: MediumSelector::all(),
                remote_bluetooth_mac: None,
            },
            supported_mediums: MediumSelector::all(),
            medium: Medium::WifiLan,
            channel: Box::new(NullChannel),
            channel_token: ChannelToken(1),
            listener: Box::new(NullListener),
        }
    }

    #[test]
    fn rejects_second_pending_for_same_endpoint() {
        let mut rng = core_testing::Generator::default();
        let id = EndpointId::generate(&mut rng);
        let mut pending = PendingConnections::new();
        assert!(pending.insert(sample(id)).is_some());
        assert!(pending.insert(sample(id)).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn dropped_without_result_completes_as_error() {
        let mut rng = core_testing::Generator::default();
        let id = EndpointId::generate(&mut rng);
        let mut pending = PendingConnections::new();
        let receiver = pending.insert(sample(id)).unwrap();
        let info = pending.remove(id).unwrap();
        drop(info);
        let result = receiver.await.unwrap();
        assert_eq!(result, Err(PcpError::Error));
    }

    #[tokio::test]
    async fn explicit_result_is_delivered() {
        let mut rng = core_testing::Generator::default();
        let id = EndpointId::generate(&mut rng);
        let mut pending = PendingConnections::new();
        let receiver = pending.insert(sample(id)).unwrap();
        pending.remove_with_result(id, Ok(()));
        let result = receiver.await.unwrap();
        assert_eq!(result, Ok(()));
    }
}
