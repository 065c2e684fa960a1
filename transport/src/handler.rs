//! `PcpHandler` (§4.5): the core state machine. Every public operation is
//! a message sent to [`PcpHandlerActor::run`]'s single work queue — the
//! "serial executor S" of §5 — so `pending_connections_` and friends
//! never need their own lock; `discovered_endpoints_` is the lone
//! exception and lives behind `DiscoveredEndpointTable`'s own mutex
//! because medium callbacks deliver discovery events from arbitrary
//! threads.

use crate::bwu;
use crate::channel::{CloseReason, EndpointChannel};
use crate::crypto::{ChannelToken, ConnectionContext, EncryptionRunner, HandshakeOutcome, Ukey2};
use crate::discovered_table::{DiscoveredEndpointTable, TableEvent};
use crate::pending::{
    AuthenticationStatus, ConnectionListener, ConnectionOptions, NewPendingConnection,
    PendingConnections, SessionHandle,
};
use crate::registry::{ConnectTarget, DiscoveryFoundCallback, MediumRegistry};
use crate::strategy::MediumStrategy;
use pcp_codec::frame::{ConnectionRequest, ConnectionResponse, DeviceInfo, MediumMetadata};
use pcp_codec::Frame;
use pcp_core::{
    discovered::DiscoveredEndpointKind, medium, random::Generator, DiscoveredEndpoint, EndpointId,
    EndpointInfo, FlagsSnapshot, Medium, MediumSelector, Pcp, PcpError,
};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Default)]
pub struct AdvertisingOptions {
    pub allowed_mediums: MediumSelector,
    pub low_power: bool,
    pub is_out_of_band: bool,
    pub use_stable_endpoint_id: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub allowed_mediums: MediumSelector,
    pub low_power: bool,
    pub is_out_of_band: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRequestOptions {
    pub allowed_mediums: MediumSelector,
    pub remote_bluetooth_mac_address: Option<[u8; 6]>,
    pub local_device: Option<DeviceInfo>,
}

pub trait DiscoveryListener: Send {
    fn on_endpoint_found(&mut self, endpoint: &DiscoveredEndpoint);
    fn on_endpoint_lost(&mut self, endpoint_id: EndpointId);
}

#[derive(Debug, Clone)]
pub struct InjectedEndpoint {
    pub endpoint_id: EndpointId,
    pub endpoint_info: EndpointInfo,
    pub medium: Medium,
    pub bluetooth_mac: [u8; 6],
}

type StatusReply = oneshot::Sender<Result<(), PcpError>>;
type MediumsReply = oneshot::Sender<Result<MediumSelector, PcpError>>;
type ConnectReply = oneshot::Sender<Result<oneshot::Receiver<Result<(), PcpError>>, PcpError>>;

pub enum Command {
    StartAdvertising {
        service_id: String,
        options: AdvertisingOptions,
        info: EndpointInfo,
        reply: MediumsReply,
    },
    StopAdvertising {
        reply: oneshot::Sender<()>,
    },
    StartDiscovery {
        service_id: String,
        options: DiscoveryOptions,
        listener: Box<dyn DiscoveryListener>,
        reply: StatusReply,
    },
    StopDiscovery {
        reply: oneshot::Sender<()>,
    },
    StartListening {
        service_id: String,
        listener: Box<dyn ConnectionListener>,
        reply: MediumsReply,
    },
    StopListening {
        reply: oneshot::Sender<()>,
    },
    InjectEndpoint {
        service_id: String,
        endpoint: InjectedEndpoint,
        reply: StatusReply,
    },
    RequestConnection {
        endpoint_id: EndpointId,
        local_info: EndpointInfo,
        options: ConnectionRequestOptions,
        listener: Box<dyn ConnectionListener>,
        reply: ConnectReply,
    },
    AcceptConnection {
        endpoint_id: EndpointId,
        reply: StatusReply,
    },
    RejectConnection {
        endpoint_id: EndpointId,
        reply: StatusReply,
    },
    UpdateAdvertisingOptions {
        options: AdvertisingOptions,
        reply: StatusReply,
    },
    UpdateDiscoveryOptions {
        options: DiscoveryOptions,
        reply: StatusReply,
    },
    CurrentEndpointId {
        reply: oneshot::Sender<Result<EndpointId, PcpError>>,
    },
}

/// Everything that can mutate handler state: a public [`Command`], or one
/// of the two internal re-entries the design notes call out (§5
/// "their results re-enter S via queued tasks").
pub enum HandlerEvent {
    Command(Command),
    Handshake(HandshakeOutcome),
    Table(TableEvent),
    IncomingRequest {
        medium: Medium,
        channel: Box<dyn EndpointChannel>,
        request: ConnectionRequest,
    },
    DiscardEndpoint {
        endpoint_id: EndpointId,
    },
    RemoteDecision {
        endpoint_id: EndpointId,
        accept: bool,
    },
    /// A medium's discovery scan reported a sighting (§6.3's `on_found`
    /// half of `start_discovery(service_id, callbacks)`), forwarded here
    /// since the callback can run on an arbitrary medium thread.
    AdvertisementReceived {
        kind: DiscoveredEndpointKind,
        service_id: String,
        blob: Vec<u8>,
    },
}

/// Cheaply-cloned front door other tasks use to talk to the handler
/// actor; mirrors the caller side of §5's "post a task to S".
#[derive(Clone)]
pub struct PcpHandlerHandle {
    events: mpsc::UnboundedSender<HandlerEvent>,
}

macro_rules! call {
    ($self:ident, $variant:ident { $($field:ident),* $(,)? }) => {{
        let (reply, receiver) = oneshot::channel();
        let _ = $self.events.send(HandlerEvent::Command(Command::$variant { $($field,)* reply }));
        receiver.await.unwrap_or(Err(PcpError::Error))
    }};
}

impl PcpHandlerHandle {
    pub fn new(events: mpsc::UnboundedSender<HandlerEvent>) -> Self {
        Self { events }
    }

    pub fn post_incoming(&self, medium: Medium, channel: Box<dyn EndpointChannel>, request: ConnectionRequest) {
        let _ = self.events.send(HandlerEvent::IncomingRequest { medium, channel, request });
    }

    /// Injection point for a caller-supplied frame-pump: once it has read
    /// and decoded the peer's own `ConnectionResponse` off a registered
    /// endpoint's channel, it reports the decision here so
    /// `evaluate_connection_result` re-runs with both sides known (§4.5).
    pub fn post_remote_decision(&self, endpoint_id: EndpointId, accept: bool) {
        let _ = self.events.send(HandlerEvent::RemoteDecision { endpoint_id, accept });
    }

    pub async fn start_advertising(
        &self,
        service_id: String,
        options: AdvertisingOptions,
        info: EndpointInfo,
    ) -> Result<MediumSelector, PcpError> {
        let (reply, receiver) = oneshot::channel();
        let _ = self.events.send(HandlerEvent::Command(Command::StartAdvertising {
            service_id,
            options,
            info,
            reply,
        }));
        receiver.await.unwrap_or(Err(PcpError::Error))
    }

    pub async fn stop_advertising(&self) {
        let (reply, receiver) = oneshot::channel();
        let _ = self.events.send(HandlerEvent::Command(Command::StopAdvertising { reply }));
        let _ = receiver.await;
    }

    pub async fn start_listening(
        &self,
        service_id: String,
        listener: Box<dyn ConnectionListener>,
    ) -> Result<MediumSelector, PcpError> {
        let (reply, receiver) = oneshot::channel();
        let _ = self.events.send(HandlerEvent::Command(Command::StartListening {
            service_id,
            listener,
            reply,
        }));
        receiver.await.unwrap_or(Err(PcpError::Error))
    }

    pub async fn stop_listening(&self) {
        let (reply, receiver) = oneshot::channel();
        let _ = self.events.send(HandlerEvent::Command(Command::StopListening { reply }));
        let _ = receiver.await;
    }

    pub async fn start_discovery(
        &self,
        service_id: String,
        options: DiscoveryOptions,
        listener: Box<dyn DiscoveryListener>,
    ) -> Result<(), PcpError> {
        call!(self, StartDiscovery { service_id, options, listener })
    }

    pub async fn stop_discovery(&self) {
        let (reply, receiver) = oneshot::channel();
        let _ = self.events.send(HandlerEvent::Command(Command::StopDiscovery { reply }));
        let _ = receiver.await;
    }

    pub async fn inject_endpoint(&self, service_id: String, endpoint: InjectedEndpoint) -> Result<(), PcpError> {
        call!(self, InjectEndpoint { service_id, endpoint })
    }

    pub async fn request_connection(
        &self,
        endpoint_id: EndpointId,
        local_info: EndpointInfo,
        options: ConnectionRequestOptions,
        listener: Box<dyn ConnectionListener>,
    ) -> Result<oneshot::Receiver<Result<(), PcpError>>, PcpError> {
        let (reply, receiver) = oneshot::channel();
        let _ = self.events.send(HandlerEvent::Command(Command::RequestConnection {
            endpoint_id,
            local_info,
            options,
            listener,
            reply,
        }));
        receiver.await.unwrap_or(Err(PcpError::Error))
    }

    pub async fn accept_connection(&self, endpoint_id: EndpointId) -> Result<(), PcpError> {
        call!(self, AcceptConnection { endpoint_id })
    }

    pub async fn reject_connection(&self, endpoint_id: EndpointId) -> Result<(), PcpError> {
        call!(self, RejectConnection { endpoint_id })
    }

    pub async fn update_advertising_options(&self, options: AdvertisingOptions) -> Result<(), PcpError> {
        call!(self, UpdateAdvertisingOptions { options })
    }

    pub async fn update_discovery_options(&self, options: DiscoveryOptions) -> Result<(), PcpError> {
        call!(self, UpdateDiscoveryOptions { options })
    }

    /// The identity currently advertised, which may have rotated away
    /// from the id assigned at session construction (§4.5 "Advertising"
    /// step 3, `AdvertisingOptions::use_stable_endpoint_id`).
    pub async fn current_endpoint_id(&self) -> Result<EndpointId, PcpError> {
        call!(self, CurrentEndpointId {})
    }
}

/// Listener installed once for every connection nobody locally requested
/// (§6.3: incoming connections notify the listener registered by
/// `start_listening_for_incoming_connections`, not a per-call one).
struct SharedListener(Arc<Mutex<Box<dyn ConnectionListener>>>);

impl ConnectionListener for SharedListener {
    fn on_connection_initiated(&mut self, endpoint_id: EndpointId, is_incoming: bool) {
        self.0.lock().unwrap().on_connection_initiated(endpoint_id, is_incoming);
    }
    fn on_connection_established(&mut self, endpoint_id: EndpointId) {
        self.0.lock().unwrap().on_connection_established(endpoint_id);
    }
    fn on_connection_accepted(&mut self, endpoint_id: EndpointId) {
        self.0.lock().unwrap().on_connection_accepted(endpoint_id);
    }
    fn on_connection_rejected(&mut self, endpoint_id: EndpointId, reason: PcpError) {
        self.0.lock().unwrap().on_connection_rejected(endpoint_id, reason);
    }
    fn on_bandwidth_changed(&mut self, endpoint_id: EndpointId, medium: Medium) {
        self.0.lock().unwrap().on_bandwidth_changed(endpoint_id, medium);
    }
    fn on_disconnected(&mut self, endpoint_id: EndpointId) {
        self.0.lock().unwrap().on_disconnected(endpoint_id);
    }
}

/// Stand-in used only for the brief window between inserting a pending
/// connection and the handshake outcome replacing it with the real
/// listener (outgoing) or a [`SharedListener`] (incoming); never observes
/// a callback itself.
struct NoopListener;

impl ConnectionListener for NoopListener {
    fn on_connection_initiated(&mut self, _endpoint_id: EndpointId, _is_incoming: bool) {}
    fn on_connection_established(&mut self, _endpoint_id: EndpointId) {}
    fn on_connection_accepted(&mut self, _endpoint_id: EndpointId) {}
    fn on_connection_rejected(&mut self, _endpoint_id: EndpointId, _reason: PcpError) {}
    fn on_bandwidth_changed(&mut self, _endpoint_id: EndpointId, _medium: Medium) {}
    fn on_disconnected(&mut self, _endpoint_id: EndpointId) {}
}

struct RegisteredEndpoint {
    channel: Box<dyn EndpointChannel>,
    listener: Box<dyn ConnectionListener>,
    local_decision: Option<bool>,
    remote_decision: Option<bool>,
    ukey2_context: Option<Box<dyn ConnectionContext>>,
    is_incoming: bool,
    medium: Medium,
}

/// The actor itself. Owns every piece of mutable state named in §3 except
/// `discovered_endpoints_`, which `DiscoveredEndpointTable` guards with
/// its own mutex precisely so medium callbacks can post into it from
/// arbitrary threads without going through S.
pub struct PcpHandlerActor {
    session: SessionHandle,
    local_endpoint_id: EndpointId,
    local_endpoint_info: EndpointInfo,
    strategy: Box<dyn MediumStrategy>,
    flags: FlagsSnapshot,
    registry: Box<dyn MediumRegistry>,
    discovered: Arc<DiscoveredEndpointTable>,
    pending: PendingConnections,
    registered: HashMap<EndpointId, RegisteredEndpoint>,
    encryption: EncryptionRunner,
    rng: Box<dyn Generator>,
    ukey2_factory: Arc<dyn Fn() -> Box<dyn Ukey2> + Send + Sync>,

    advertising: Option<(String, AdvertisingOptions, HashSet<Medium>)>,
    /// When advertising last stopped, for the stable-endpoint-id cache
    /// window (§4.5 "Advertising" step 3): a restart within
    /// `flags.stable_endpoint_id_cache_timeout` keeps the same id instead
    /// of rotating.
    advertising_stopped_at: Option<std::time::Instant>,
    discovery: Option<(String, DiscoveryOptions, Box<dyn DiscoveryListener>)>,
    listening: Option<(String, HashSet<Medium>, Arc<Mutex<Box<dyn ConnectionListener>>>)>,

    self_events: mpsc::UnboundedSender<HandlerEvent>,
    events: mpsc::UnboundedReceiver<HandlerEvent>,
}

impl PcpHandlerActor {
    pub fn spawn(
        session: SessionHandle,
        local_endpoint_id: EndpointId,
        local_endpoint_info: EndpointInfo,
        strategy: Box<dyn MediumStrategy>,
        flags: FlagsSnapshot,
        registry: Box<dyn MediumRegistry>,
        rng: Box<dyn Generator>,
        ukey2_factory: Arc<dyn Fn() -> Box<dyn Ukey2> + Send + Sync>,
    ) -> (PcpHandlerHandle, tokio::task::JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handshake_tx, mut handshake_rx) = mpsc::unbounded_channel();
        let discovered = DiscoveredEndpointTable::new({
            let forward = events_tx.clone();
            let (table_tx, mut table_rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                while let Some(event) = table_rx.recv().await {
                    let _ = forward.send(HandlerEvent::Table(event));
                }
            });
            table_tx
        });

        let forward_handshake = events_tx.clone();
        tokio::spawn(async move {
            while let Some(outcome) = handshake_rx.recv().await {
                let _ = forward_handshake.send(HandlerEvent::Handshake(outcome));
            }
        });

        let actor = Self {
            session,
            local_endpoint_id,
            local_endpoint_info,
            strategy,
            flags,
            registry,
            discovered,
            pending: PendingConnections::new(),
            registered: HashMap::new(),
            encryption: EncryptionRunner::new(handshake_tx),
            rng,
            ukey2_factory,
            advertising: None,
            advertising_stopped_at: None,
            discovery: None,
            listening: None,
            self_events: events_tx.clone(),
            events: events_rx,
        };

        let handle = PcpHandlerHandle::new(events_tx);
        let join = tokio::spawn(actor.run());
        (handle, join)
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                HandlerEvent::Command(command) => self.handle_command(command),
                HandlerEvent::Handshake(outcome) => self.handle_handshake(outcome),
                HandlerEvent::Table(event) => self.handle_table_event(event),
                HandlerEvent::IncomingRequest { medium, channel, request } => {
                    self.handle_incoming(medium, channel, request)
                }
                HandlerEvent::DiscardEndpoint { endpoint_id } => {
                    self.discard_endpoint(endpoint_id);
                }
                HandlerEvent::RemoteDecision { endpoint_id, accept } => {
                    self.note_remote_decision(endpoint_id, accept);
                }
                HandlerEvent::AdvertisementReceived { kind, service_id, blob } => {
                    self.handle_advertisement(kind, service_id, blob);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartAdvertising { service_id, options, info, reply } => {
                let _ = reply.send(self.start_advertising(service_id, options, info));
            }
            Command::StopAdvertising { reply } => {
                self.stop_advertising();
                let _ = reply.send(());
            }
            Command::StartDiscovery { service_id, options, listener, reply } => {
                let _ = reply.send(self.start_discovery(service_id, options, listener));
            }
            Command::StopDiscovery { reply } => {
                self.stop_discovery();
                let _ = reply.send(());
            }
            Command::StartListening { service_id, listener, reply } => {
                let _ = reply.send(self.start_listening(service_id, listener));
            }
            Command::StopListening { reply } => {
                self.listening = None;
                let _ = reply.send(());
            }
            Command::InjectEndpoint { service_id, endpoint, reply } => {
                let _ = reply.send(self.inject_endpoint(service_id, endpoint));
            }
            Command::RequestConnection { endpoint_id, local_info, options, listener, reply } => {
                let _ = reply.send(self.request_connection(endpoint_id, local_info, options, listener));
            }
            Command::AcceptConnection { endpoint_id, reply } => {
                let _ = reply.send(self.set_local_decision(endpoint_id, true));
            }
            Command::RejectConnection { endpoint_id, reply } => {
                let _ = reply.send(self.set_local_decision(endpoint_id, false));
            }
            Command::UpdateAdvertisingOptions { options, reply } => {
                let _ = reply.send(self.update_advertising_options(options));
            }
            Command::UpdateDiscoveryOptions { options, reply } => {
                let _ = reply.send(self.update_discovery_options(options));
            }
            Command::CurrentEndpointId { reply } => {
                let _ = reply.send(Ok(self.local_endpoint_id));
            }
        }
    }

    // ---- Advertising (§4.5 "Advertising") ----

    fn start_advertising(
        &mut self,
        service_id: String,
        mut options: AdvertisingOptions,
        info: EndpointInfo,
    ) -> Result<MediumSelector, PcpError> {
        if options.is_out_of_band {
            let mut only_bluetooth = MediumSelector::EMPTY;
            only_bluetooth.insert(Medium::Bluetooth);
            options.allowed_mediums = only_bluetooth;
        } else if options.allowed_mediums.is_empty() {
            options.allowed_mediums = MediumSelector::all();
        }

        self.local_endpoint_info = info;
        self.rotate_endpoint_id_for_advertising(&options);
        let pcp = self.strategy.pcp();
        let blob = build_advertisement_blob(pcp, self.local_endpoint_id, &self.local_endpoint_info, &service_id);

        let mut started = HashSet::new();
        for medium in options.allowed_mediums.enumerate() {
            if !self.registry.is_available(medium) {
                continue;
            }
            if self.registry.start_advertising(medium, &service_id, &blob).is_ok()
                && self.registry.start_accepting(medium, &service_id).is_ok()
            {
                started.insert(medium);
            }
        }

        if started.is_empty() {
            return Err(PcpError::Error);
        }
        let result = started.iter().copied().collect();
        self.advertising = Some((service_id, options, started));
        Ok(result)
    }

    fn stop_advertising(&mut self) {
        if let Some((service_id, _, mediums)) = self.advertising.take() {
            for medium in mediums {
                self.registry.stop_advertising(medium, &service_id);
                self.registry.stop_accepting(medium, &service_id);
            }
        }
        self.advertising_stopped_at = Some(std::time::Instant::now());
    }

    /// Decides whether the next advertising round reuses
    /// `local_endpoint_id` or rotates to a fresh one (§4.5 "Advertising"
    /// step 3). An endpoint that asked for a stable id keeps it
    /// indefinitely; everyone else keeps it on the very first advertise
    /// (nothing to rotate away from yet) and across a restart that falls
    /// inside the cache window, and rotates only once a restart comes
    /// after that window has elapsed, so the advertised identity doesn't
    /// linger once discovery has long since forgotten it.
    fn rotate_endpoint_id_for_advertising(&mut self, options: &AdvertisingOptions) {
        if options.use_stable_endpoint_id {
            return;
        }
        let cache_expired = self
            .advertising_stopped_at
            .is_some_and(|stopped_at| stopped_at.elapsed() >= self.flags.stable_endpoint_id_cache_timeout);
        if cache_expired {
            self.local_endpoint_id = EndpointId::generate(self.rng.as_mut());
        }
    }

    // ---- Discovery (§4.5 "Discovery") ----

    fn start_discovery(
        &mut self,
        service_id: String,
        mut options: DiscoveryOptions,
        listener: Box<dyn DiscoveryListener>,
    ) -> Result<(), PcpError> {
        if options.allowed_mediums.is_empty() {
            options.allowed_mediums = MediumSelector::all();
        }
        let mut any_started = false;
        for medium in options.allowed_mediums.enumerate() {
            if !self.registry.is_available(medium) {
                continue;
            }
            let on_found = self.discovery_found_callback(service_id.clone());
            if self.registry.start_discovery(medium, &service_id, on_found).is_ok() {
                any_started = true;
                self.discovered.start_endpoint_lost_alarms(medium, self.flags.endpoint_lost_alarm_timeout);
            }
        }
        if !any_started {
            return Err(PcpError::Error);
        }
        self.discovery = Some((service_id, options, listener));
        Ok(())
    }

    fn stop_discovery(&mut self) {
        if let Some((service_id, options, _)) = self.discovery.take() {
            for medium in options.allowed_mediums.enumerate() {
                self.registry.stop_discovery(medium, &service_id);
            }
        }
        self.discovered.clear();
    }

    fn start_listening(
        &mut self,
        service_id: String,
        listener: Box<dyn ConnectionListener>,
    ) -> Result<MediumSelector, PcpError> {
        if self.listening.is_some() {
            return Err(PcpError::AlreadyListening);
        }
        let mut started = HashSet::new();
        for medium in medium::ALL {
            if self.registry.is_available(medium) && self.registry.start_accepting(medium, &service_id).is_ok() {
                started.insert(medium);
            }
        }
        if started.is_empty() {
            return Err(PcpError::Error);
        }
        let result = started.iter().copied().collect();
        self.listening = Some((service_id, started, Arc::new(Mutex::new(listener))));
        Ok(result)
    }

    /// Builds the closure a medium invokes from its own thread on every
    /// sighting (§6.3); it only has to forward the raw event back onto S,
    /// where `handle_advertisement` does the actual parsing.
    fn discovery_found_callback(&self, service_id: String) -> DiscoveryFoundCallback {
        let events = self.self_events.clone();
        Arc::new(move |kind, blob| {
            let _ = events.send(HandlerEvent::AdvertisementReceived {
                kind,
                service_id: service_id.clone(),
                blob,
            });
        })
    }

    /// Validates a scanned advertisement blob and, if it matches this
    /// session's strategy and service id, records it as found (§4.5
    /// "Discovery" steps 1-3).
    fn handle_advertisement(&mut self, kind: DiscoveredEndpointKind, service_id: String, blob: Vec<u8>) {
        let Some((expected_service_id, _, _)) = self.discovery.as_ref() else { return };
        if *expected_service_id != service_id {
            return;
        }
        let Some((endpoint_id, endpoint_info)) = parse_advertisement(&blob, self.strategy.pcp(), &service_id) else {
            return;
        };
        self.discovered.on_found(DiscoveredEndpoint {
            endpoint_id,
            endpoint_info,
            service_id,
            webrtc_state: Default::default(),
            kind,
        });
    }

    fn handle_table_event(&mut self, event: TableEvent) {
        let Some((_, _, listener)) = self.discovery.as_mut() else { return };
        match event {
            TableEvent::Found(endpoint) => listener.on_endpoint_found(&endpoint),
            TableEvent::Lost { endpoint_id } => listener.on_endpoint_lost(endpoint_id),
        }
    }

    fn inject_endpoint(&mut self, service_id: String, endpoint: InjectedEndpoint) -> Result<(), PcpError> {
        if endpoint.medium != Medium::Bluetooth {
            return Err(PcpError::Error);
        }
        if endpoint.bluetooth_mac == [0u8; 6] {
            return Err(PcpError::Error);
        }
        self.discovered.on_found(DiscoveredEndpoint {
            endpoint_id: endpoint.endpoint_id,
            endpoint_info: endpoint.endpoint_info,
            service_id,
            webrtc_state: Default::default(),
            kind: DiscoveredEndpointKind::Bluetooth { mac: endpoint.bluetooth_mac },
        });
        Ok(())
    }

    // ---- Outgoing connection (§4.5 "Outgoing connection") ----

    fn request_connection(
        &mut self,
        endpoint_id: EndpointId,
        local_info: EndpointInfo,
        options: ConnectionRequestOptions,
        listener: Box<dyn ConnectionListener>,
    ) -> Result<oneshot::Receiver<Result<(), PcpError>>, PcpError> {
        if self.pending.contains(endpoint_id) || self.registered.contains_key(&endpoint_id) {
            return Err(PcpError::AlreadyConnectedToEndpoint);
        }
        let counts = self.pending.count_by_direction();
        if !self.strategy.can_send_outgoing_connection(counts) {
            return Err(PcpError::OutOfOrderApiCall);
        }

        let mut candidates = self.discovered.get_preferred(endpoint_id, |m| self.strategy.medium_priority(m));
        if candidates.is_empty() {
            if let Some(mac) = options.remote_bluetooth_mac_address {
                if options.allowed_mediums.contains(Medium::Bluetooth) {
                    candidates.push(DiscoveredEndpoint {
                        endpoint_id,
                        endpoint_info: local_info.clone(),
                        service_id: String::new(),
                        webrtc_state: Default::default(),
                        kind: DiscoveredEndpointKind::Bluetooth { mac },
                    });
                }
            }
        }
        if candidates.is_empty() {
            return Err(PcpError::EndpointUnknown);
        }

        let mut opened = None;
        for candidate in &candidates {
            let medium = candidate.medium();
            if !options.allowed_mediums.is_empty() && !options.allowed_mediums.contains(medium) {
                continue;
            }
            let target = ConnectTarget { endpoint_id, medium, discovered: Some(candidate) };
            match self.registry.connect(target) {
                Ok(channel) => {
                    opened = Some((medium, channel));
                    break;
                }
                Err(_) => continue,
            }
        }
        let (medium, mut channel) = opened.ok_or(PcpError::EndpointIoError)?;

        let nonce = self.rng.nonce();
        let request = ConnectionRequest {
            endpoint_id: *self.local_endpoint_id.as_bytes(),
            endpoint_info: local_info.as_bytes().to_vec(),
            nonce,
            medium_metadata: MediumMetadata::default(),
            mediums: options.allowed_mediums.as_u8(),
            keep_alive_interval_ms: self.flags.keep_alive_interval_default.as_millis() as u32,
            keep_alive_timeout_ms: self.flags.keep_alive_timeout_default.as_millis() as u32,
            device: options.local_device.clone(),
        };
        let frame = Frame::ConnectionRequest(request);
        if channel.write(&frame.encode()).is_err() {
            channel.close(CloseReason::IoError);
            return Err(PcpError::EndpointIoError);
        }

        let token = ChannelToken(next_channel_token());
        let new_pending = NewPendingConnection {
            client: self.session,
            endpoint_id,
            remote_endpoint_info: local_info,
            nonce,
            is_incoming: false,
            authenticate_as_initiator: true,
            connection_options: ConnectionOptions {
                keep_alive_interval_ms: self.flags.keep_alive_interval_default.as_millis() as u32,
                keep_alive_timeout_ms: self.flags.keep_alive_timeout_default.as_millis() as u32,
                allowed_upgrade_mediums: options.allowed_mediums,
                remote_bluetooth_mac: options.remote_bluetooth_mac_address,
            },
            supported_mediums: options.allowed_mediums,
            medium,
            channel,
            channel_token: token,
            listener,
        };
        let receiver = self.pending.insert(new_pending).ok_or(PcpError::AlreadyConnectedToEndpoint)?;

        let channel = self.pending.get_mut(endpoint_id).unwrap().channel.take().unwrap();
        self.encryption.start_client(endpoint_id, token, channel, (self.ukey2_factory)());

        Ok(receiver)
    }

    // ---- Incoming connection (§4.5 "Incoming connection", "Tie-break") ----

    fn handle_incoming(&mut self, medium: Medium, mut channel: Box<dyn EndpointChannel>, request: ConnectionRequest) {
        let advertising = self.advertising.is_some();
        let listening = self.listening.is_some();
        if !advertising && !listening {
            channel.close(CloseReason::Shutdown);
            return;
        }

        let endpoint_id = EndpointId::from_bytes(request.endpoint_id);
        if self.registered.contains_key(&endpoint_id) {
            channel.close(CloseReason::Shutdown);
            return;
        }

        if let Some(existing) = self.pending.get_mut(endpoint_id) {
            if !existing.is_incoming {
                self.resolve_tie_break(endpoint_id, medium, channel, request);
                return;
            }
        }

        let counts = self.pending.count_by_direction();
        if !self.strategy.can_receive_incoming_connection(counts) {
            channel.close(CloseReason::Shutdown);
            return;
        }

        self.accept_incoming_request(endpoint_id, medium, channel, request);
    }

    fn resolve_tie_break(
        &mut self,
        endpoint_id: EndpointId,
        medium: Medium,
        mut incoming_channel: Box<dyn EndpointChannel>,
        request: ConnectionRequest,
    ) {
        let local_nonce = self.pending.get_mut(endpoint_id).map(|info| info.nonce).unwrap_or(0);
        let remote_nonce = request.nonce;

        if local_nonce == remote_nonce {
            incoming_channel.close(CloseReason::Shutdown);
            if let Some(mut info) = self.pending.remove_with_result(endpoint_id, Err(PcpError::EndpointIoError)) {
                if let Some(mut channel) = info.channel.take() {
                    channel.close(CloseReason::Shutdown);
                }
            }
            return;
        }

        if local_nonce > remote_nonce {
            incoming_channel.close(CloseReason::Shutdown);
        } else {
            if let Some(mut info) = self.pending.remove_with_result(endpoint_id, Err(PcpError::EndpointIoError)) {
                if let Some(mut channel) = info.channel.take() {
                    channel.close(CloseReason::Shutdown);
                }
            }
            self.accept_incoming_request(endpoint_id, medium, incoming_channel, request);
        }
    }

    fn accept_incoming_request(
        &mut self,
        endpoint_id: EndpointId,
        medium: Medium,
        channel: Box<dyn EndpointChannel>,
        request: ConnectionRequest,
    ) {
        let keep_alive_interval_ms = if request.keep_alive_interval_ms == 0 {
            self.flags.keep_alive_interval_default.as_millis() as u32
        } else {
            request.keep_alive_interval_ms
        };
        let keep_alive_timeout_ms = if request.keep_alive_timeout_ms == 0 {
            self.flags.keep_alive_timeout_default.as_millis() as u32
        } else {
            request.keep_alive_timeout_ms
        };

        let remote_info = EndpointInfo::new(request.endpoint_info).unwrap_or_else(|| EndpointInfo::new(Vec::new()).unwrap());
        let token = ChannelToken(next_channel_token());
        let listener: Box<dyn ConnectionListener> = match &self.listening {
            Some((_, _, listener)) => Box::new(SharedListener(Arc::clone(listener))),
            None => Box::new(NoopListener),
        };
        let new_pending = NewPendingConnection {
            client: self.session,
            endpoint_id,
            remote_endpoint_info: remote_info,
            nonce: request.nonce,
            is_incoming: true,
            authenticate_as_initiator: false,
            connection_options: ConnectionOptions {
                keep_alive_interval_ms,
                keep_alive_timeout_ms,
                allowed_upgrade_mediums: MediumSelector::from_u8(request.mediums),
                remote_bluetooth_mac: request.medium_metadata.bssid,
            },
            supported_mediums: MediumSelector::from_u8(request.mediums),
            medium,
            channel,
            channel_token: token,
            listener,
        };
        if let Some(_receiver) = self.pending.insert(new_pending) {
            let channel = self.pending.get_mut(endpoint_id).unwrap().channel.take().unwrap();
            self.encryption.start_server(endpoint_id, token, channel, (self.ukey2_factory)());
        }
    }

    // ---- Handshake completion (§4.4) ----

    fn handle_handshake(&mut self, outcome: HandshakeOutcome) {
        match outcome {
            HandshakeOutcome::Success { endpoint_id, channel_token, channel, context, auth_token, .. } => {
                let stale = self
                    .pending
                    .get_mut(endpoint_id)
                    .map(|info| info.channel_token != channel_token)
                    .unwrap_or(true);
                if stale {
                    // Result from a channel tie-break already replaced (§4.4, §7).
                    return;
                }
                let mut info = self.pending.remove(endpoint_id).unwrap();
                info.authentication_status = AuthenticationStatus::Authenticated;
                info.authentication_token = Some(auth_token);
                info.complete(Ok(()));
                let is_incoming = info.is_incoming;
                let medium = info.medium;
                info.listener.on_connection_initiated(endpoint_id, is_incoming);
                pcp_core::event::Event::ConnectionInitiated { endpoint_id, medium, is_incoming }.emit();
                self.registered.insert(
                    endpoint_id,
                    RegisteredEndpoint {
                        channel,
                        listener: info.listener,
                        local_decision: None,
                        remote_decision: None,
                        ukey2_context: Some(context),
                        is_incoming,
                        medium,
                    },
                );
            }
            HandshakeOutcome::Failure { endpoint_id, channel_token } => {
                let stale = self
                    .pending
                    .get_mut(endpoint_id)
                    .map(|info| info.channel_token != channel_token)
                    .unwrap_or(true);
                if stale {
                    return;
                }
                self.pending.remove_with_result(endpoint_id, Err(PcpError::EndpointIoError));
            }
        }
    }

    // ---- Accept / reject (§4.5 "Accept / reject", "evaluate_connection_result") ----

    fn set_local_decision(&mut self, endpoint_id: EndpointId, accept: bool) -> Result<(), PcpError> {
        let registered = self.registered.get_mut(&endpoint_id).ok_or(PcpError::EndpointUnknown)?;
        let os_info = Vec::new();
        let response = if accept {
            ConnectionResponse::accept(os_info)
        } else {
            ConnectionResponse::reject(os_info)
        };
        if registered.channel.write(&Frame::ConnectionResponse(response).encode()).is_err() {
            return Err(PcpError::EndpointIoError);
        }
        registered.local_decision = Some(accept);
        // For this single-host implementation the remote decision mirrors
        // what the test double on the other end of the loopback channel
        // chooses to report back via `note_remote_decision`.
        self.evaluate_connection_result(endpoint_id, false);
        Ok(())
    }

    /// Reached via [`HandlerEvent::RemoteDecision`] once the peer's own
    /// `ConnectionResponse` has been read and decoded (§4.5
    /// "evaluate_connection_result" is triggered whenever either side's
    /// acceptance state changes).
    fn note_remote_decision(&mut self, endpoint_id: EndpointId, accept: bool) {
        if let Some(registered) = self.registered.get_mut(&endpoint_id) {
            registered.remote_decision = Some(accept);
        }
        self.evaluate_connection_result(endpoint_id, false);
    }

    fn evaluate_connection_result(&mut self, endpoint_id: EndpointId, can_close_immediately: bool) {
        let Some(registered) = self.registered.get(&endpoint_id) else { return };
        let (local, remote) = (registered.local_decision, registered.remote_decision);
        let (Some(local), Some(remote)) = (local, remote) else { return };

        if local && remote {
            let Some(registered) = self.registered.get_mut(&endpoint_id) else { return };
            if let Some(context) = registered.ukey2_context.take() {
                registered.channel.attach_encryption(context);
            }
            registered.listener.on_connection_established(endpoint_id);
            registered.listener.on_connection_accepted(endpoint_id);
            pcp_core::event::Event::ConnectionAccepted { endpoint_id }.emit();
            let is_incoming = registered.is_incoming;
            let medium = registered.medium;
            if self.flags.auto_upgrade_bandwidth && is_incoming {
                if let Some(registered) = self.registered.get_mut(&endpoint_id) {
                    registered.listener.on_bandwidth_changed(endpoint_id, medium);
                }
                pcp_core::event::Event::BandwidthUpgradeStarted { endpoint_id, to_medium: medium }.emit();
                self.initiate_bwu_for_endpoint(endpoint_id);
            }
        } else {
            let reason = PcpError::ConnectionRejected;
            if let Some(registered) = self.registered.get_mut(&endpoint_id) {
                registered.listener.on_connection_rejected(endpoint_id, reason);
            }
            pcp_core::event::Event::ConnectionRejected { endpoint_id }.emit();
            if can_close_immediately {
                self.discard_endpoint(endpoint_id);
            } else {
                let events = self.self_events.clone();
                let delay = self.flags.rejection_close_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(HandlerEvent::DiscardEndpoint { endpoint_id });
                });
            }
        }
    }

    /// Kicks off the upgrade choreography (§4.6) on the channel already in
    /// place. Picking and opening the actual higher-bandwidth medium is the
    /// external upgrade manager's job; this only announces the intent to
    /// upgrade over the existing channel.
    fn initiate_bwu_for_endpoint(&mut self, endpoint_id: EndpointId) {
        let Some(registered) = self.registered.get_mut(&endpoint_id) else { return };
        if let Err(error) = bwu::propose_upgrade(registered.channel.as_mut(), Vec::new(), true) {
            tracing::warn!(%endpoint_id, %error, "failed to announce bandwidth upgrade path");
        }
    }

    fn discard_endpoint(&mut self, endpoint_id: EndpointId) {
        if let Some(mut registered) = self.registered.remove(&endpoint_id) {
            registered.channel.close(CloseReason::LocalDisconnect);
        }
        self.pending.remove(endpoint_id);
    }

    // ---- Update options (§4.5 "Update options") ----

    fn update_advertising_options(&mut self, options: AdvertisingOptions) -> Result<(), PcpError> {
        let Some((service_id, old_options, mut started)) = self.advertising.take() else {
            return Err(PcpError::OutOfOrderApiCall);
        };
        let old_mediums: HashSet<Medium> = old_options.allowed_mediums.enumerate().collect();
        let new_mediums: HashSet<Medium> = options.allowed_mediums.enumerate().collect();

        for medium in old_mediums.difference(&new_mediums) {
            self.registry.stop_advertising(*medium, &service_id);
            self.registry.stop_accepting(*medium, &service_id);
            started.remove(medium);
        }
        let blob = build_advertisement_blob(
            self.strategy.pcp(),
            self.local_endpoint_id,
            &self.local_endpoint_info,
            &service_id,
        );
        for medium in new_mediums.difference(&old_mediums) {
            if self.registry.is_available(*medium)
                && self.registry.start_advertising(*medium, &service_id, &blob).is_ok()
                && self.registry.start_accepting(*medium, &service_id).is_ok()
            {
                started.insert(*medium);
            }
        }
        self.advertising = Some((service_id, options, started));
        Ok(())
    }

    fn update_discovery_options(&mut self, options: DiscoveryOptions) -> Result<(), PcpError> {
        let Some((service_id, old_options, listener)) = self.discovery.take() else {
            return Err(PcpError::OutOfOrderApiCall);
        };
        let old_mediums: HashSet<Medium> = old_options.allowed_mediums.enumerate().collect();
        let new_mediums: HashSet<Medium> = options.allowed_mediums.enumerate().collect();

        for medium in old_mediums.difference(&new_mediums) {
            self.registry.stop_discovery(*medium, &service_id);
        }
        for medium in new_mediums.difference(&old_mediums) {
            let on_found = self.discovery_found_callback(service_id.clone());
            if self.registry.is_available(*medium) && self.registry.start_discovery(*medium, &service_id, on_found).is_ok() {
                self.discovered.start_endpoint_lost_alarms(*medium, self.flags.endpoint_lost_alarm_timeout);
            }
        }
        self.discovery = Some((service_id, options, listener));
        Ok(())
    }
}

fn next_channel_token() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub fn service_id_hash(service_id: &str, len: usize) -> Vec<u8> {
    let digest = Sha256::digest(service_id.as_bytes());
    digest[..len.min(digest.len())].to_vec()
}

/// Builds the advertisement blob (§6.2): version, pcp, service-id-hash
/// (4 bytes), endpoint-id, length-prefixed endpoint-info.
pub fn build_advertisement_blob(pcp: Pcp, endpoint_id: EndpointId, info: &EndpointInfo, service_id: &str) -> Vec<u8> {
    let mut blob = Vec::with_capacity(1 + 1 + 4 + 4 + 1 + info.as_bytes().len());
    blob.push(1);
    blob.push(pcp.as_u8());
    blob.extend_from_slice(&service_id_hash(service_id, 4));
    blob.extend_from_slice(endpoint_id.as_bytes());
    blob.push(info.as_bytes().len() as u8);
    blob.extend_from_slice(info.as_bytes());
    blob
}

/// Inverse of [`build_advertisement_blob`] (§4.5 "Discovery" steps 1-3):
/// rejects a version mismatch, a Pcp that doesn't match this session's
/// strategy, and a service-id-hash that doesn't match `service_id`.
pub fn parse_advertisement(blob: &[u8], expected_pcp: Pcp, service_id: &str) -> Option<(EndpointId, EndpointInfo)> {
    if blob.len() < 1 + 1 + 4 + 4 + 1 {
        return None;
    }
    let (version, rest) = blob.split_first()?;
    if *version != 1 {
        return None;
    }
    let (pcp_tag, rest) = rest.split_first()?;
    if Pcp::from_u8(*pcp_tag)? != expected_pcp {
        return None;
    }
    let (hash, rest) = rest.split_at(4);
    if hash != service_id_hash(service_id, 4) {
        return None;
    }
    let (endpoint_id, rest) = rest.split_at(4);
    let endpoint_id = EndpointId::from_bytes(endpoint_id.try_into().ok()?);
    let (info_len, rest) = rest.split_first()?;
    let info_len = *info_len as usize;
    if rest.len() < info_len {
        return None;
    }
    let info = EndpointInfo::new(rest[..info_len].to_vec())?;
    Some((endpoint_id, info))
}
