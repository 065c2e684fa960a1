//! The pre-connection control plane state machine: discovery bookkeeping,
//! connection requests, tie-break resolution, handshake setup, and
//! accept/reject negotiation (§4, §5).
//!
//! The externally-facing pieces are [`handler::PcpHandlerHandle`] (the
//! front door every caller talks to) and the [`registry::MediumRegistry`]
//! / [`channel::EndpointChannel`] / [`crypto::Ukey2`] traits a concrete
//! medium and handshake implementation plug into.

pub mod bwu;
pub mod channel;
pub mod crypto;
pub mod discovered_table;
pub mod handler;
pub mod pending;
pub mod registry;
pub mod strategy;

pub use bwu::BwuError;
pub use channel::{ChannelError, CloseReason, EndpointChannel};
pub use crypto::{
    ChannelToken, ConnectionContext, EncryptionRunner, HandshakeOutcome, Role, Ukey2, Ukey2Result,
    Ukey2Success,
};
pub use discovered_table::{DiscoveredEndpointTable, TableEvent};
pub use handler::{
    AdvertisingOptions, Command, ConnectionRequestOptions, DiscoveryListener, DiscoveryOptions,
    HandlerEvent, InjectedEndpoint, PcpHandlerActor, PcpHandlerHandle,
};
pub use pending::{
    AuthenticationStatus, ConnectionListener, ConnectionOptions, NewPendingConnection,
    PendingConnections, SessionHandle,
};
pub use registry::{ConnectTarget, DiscoveryFoundCallback, MediumRegistry};
pub use strategy::{for_strategy, Cluster, ConnectionCounts, MediumStrategy, PointToPoint, Star};
