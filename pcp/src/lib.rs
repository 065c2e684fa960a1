#![forbid(unsafe_code)]

//! The client-facing facade: construct a [`PcpSession`], then drive
//! advertising, discovery, and connection negotiation through the handle
//! it hands back. Everything below this module is a thin assembly of
//! `pcp-core`'s primitives and `pcp-transport`'s actor; the facade's own
//! job is picking sane defaults and giving the combination one
//! constructor.

use pcp_core::random::{Generator, SystemGenerator};
use pcp_core::{EndpointId, EndpointInfo, FlagsSnapshot, Strategy};
use pcp_transport::crypto::Ukey2;
use pcp_transport::registry::MediumRegistry;
use pcp_transport::{strategy, PcpHandlerActor, PcpHandlerHandle, SessionHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use pcp_transport::{
    AdvertisingOptions, ChannelError, ChannelToken, CloseReason, Command, ConnectionContext,
    ConnectionListener, ConnectionOptions, ConnectionRequestOptions, ConnectTarget,
    DiscoveryListener, DiscoveryOptions, EndpointChannel, HandlerEvent, InjectedEndpoint,
};

/// Assembles the collaborators a [`PcpSession`] needs and spawns its actor.
///
/// The two collaborators with no in-crate default — `registry` (the
/// concrete mediums) and `ukey2_factory` (the handshake implementation) —
/// are mandatory; everything else falls back to the values a plain
/// client would want.
pub struct PcpSessionBuilder {
    strategy: Strategy,
    flags: FlagsSnapshot,
    local_endpoint_info: EndpointInfo,
    rng: Box<dyn Generator>,
    registry: Option<Box<dyn MediumRegistry>>,
    ukey2_factory: Option<Arc<dyn Fn() -> Box<dyn Ukey2> + Send + Sync>>,
}

impl Default for PcpSessionBuilder {
    fn default() -> Self {
        Self {
            strategy: Strategy::Cluster,
            flags: FlagsSnapshot::default(),
            local_endpoint_info: EndpointInfo::new(Vec::new()).unwrap(),
            rng: Box::new(SystemGenerator),
            registry: None,
            ukey2_factory: None,
        }
    }
}

impl PcpSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn flags(mut self, flags: FlagsSnapshot) -> Self {
        self.flags = flags;
        self
    }

    pub fn local_endpoint_info(mut self, info: EndpointInfo) -> Self {
        self.local_endpoint_info = info;
        self
    }

    pub fn rng(mut self, rng: Box<dyn Generator>) -> Self {
        self.rng = rng;
        self
    }

    pub fn registry(mut self, registry: Box<dyn MediumRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ukey2_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Ukey2> + Send + Sync + 'static,
    {
        self.ukey2_factory = Some(Arc::new(factory));
        self
    }

    /// Spawns the session's actor and returns the handle other tasks talk
    /// to. Panics if `registry` or `ukey2_factory` were never supplied —
    /// there is no meaningful default for either.
    pub fn build(mut self) -> PcpSession {
        let registry = self.registry.expect("PcpSessionBuilder requires a registry");
        let ukey2_factory = self
            .ukey2_factory
            .expect("PcpSessionBuilder requires a ukey2_factory");
        let local_endpoint_id = EndpointId::generate(self.rng.as_mut());
        let session = SessionHandle(next_session_id());
        tracing::debug!(?session, endpoint_id = %local_endpoint_id, strategy = ?self.strategy, "starting session");
        let (handle, join) = PcpHandlerActor::spawn(
            session,
            local_endpoint_id,
            self.local_endpoint_info,
            strategy::for_strategy(self.strategy),
            self.flags,
            registry,
            self.rng,
            ukey2_factory,
        );
        PcpSession {
            handle,
            local_endpoint_id,
            join,
        }
    }
}

fn next_session_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A running client session: the local identity it was assigned plus the
/// handle every public operation goes through.
pub struct PcpSession {
    handle: PcpHandlerHandle,
    local_endpoint_id: EndpointId,
    join: tokio::task::JoinHandle<()>,
}

impl PcpSession {
    /// The identity this session was constructed with. Stable for the
    /// session's whole lifetime even if advertising later rotates the
    /// live id — useful as a directory key that shouldn't move out from
    /// under a caller.
    pub fn local_endpoint_id(&self) -> EndpointId {
        self.local_endpoint_id
    }

    /// The identity currently advertised, which may have rotated away
    /// from [`Self::local_endpoint_id`] (`AdvertisingOptions::use_stable_endpoint_id`
    /// controls whether it does). Falls back to the construction-time id
    /// if the actor has already shut down.
    pub async fn current_endpoint_id(&self) -> EndpointId {
        self.handle.current_endpoint_id().await.unwrap_or(self.local_endpoint_id)
    }

    /// The cheaply-cloneable handle used to issue commands; clone this
    /// into whatever tasks need to talk to the session.
    pub fn handle(&self) -> PcpHandlerHandle {
        self.handle.clone()
    }

    /// Stops the session's actor task. Outstanding handles become inert:
    /// further calls resolve to `Err(PcpError::Error)` once the actor's
    /// event loop drains and exits.
    pub fn shutdown(self) {
        tracing::debug!(endpoint_id = %self.local_endpoint_id, "shutting down session");
        self.join.abort();
    }
}
