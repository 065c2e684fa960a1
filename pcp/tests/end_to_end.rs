//! End-to-end scenarios driven entirely through two in-process
//! [`PcpSession`]s wired together by an in-memory [`LoopbackRegistry`] — a
//! duplex byte pipe standing in for a real medium socket, and a
//! deterministic [`Ukey2`] test double standing in for the external
//! handshake primitive.

use pcp::{
    ConnectionContext, ConnectionListener, ConnectionRequestOptions, DiscoveryListener,
    DiscoveryOptions, PcpSessionBuilder,
};
use pcp_core::discovered::DiscoveredEndpointKind;
use pcp_core::testing::FixedNonce;
use pcp_core::{DiscoveredEndpoint, EndpointId, EndpointInfo, FlagsSnapshot, Medium, MediumSelector, PcpError, Pcp, Strategy};
use pcp_transport::channel::{ChannelError, CloseReason, EndpointChannel};
use pcp_transport::crypto::{Role, Ukey2, Ukey2Result, Ukey2Success};
use pcp_transport::registry::{ConnectTarget, DiscoveryFoundCallback, MediumRegistry};
use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trivial pass-through context; the handshake test double never derives a
/// real key, so encryption is a no-op rather than a cipher.
struct PlainContext;

impl ConnectionContext for PlainContext {
    fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.to_vec()
    }
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        Ok(ciphertext.to_vec())
    }
}

/// Always succeeds immediately, without touching the channel — the
/// simplest double satisfying `Ukey2`'s contract for tests that only care
/// about what happens once a handshake resolves.
struct AlwaysSucceeds;

impl Ukey2 for AlwaysSucceeds {
    fn handshake(self: Box<Self>, _role: Role, channel: Box<dyn EndpointChannel>) -> Ukey2Result {
        Ukey2Result {
            channel,
            outcome: Ok(Ukey2Success {
                context: Box::new(PlainContext),
                auth_token: "AUTH".to_string(),
                raw_auth_token: vec![1, 2, 3, 4],
            }),
        }
    }
}

fn ukey2_factory() -> Box<dyn Ukey2> {
    Box::new(AlwaysSucceeds)
}

/// One end of an in-memory duplex byte pipe, playing the role of a medium
/// socket (§4.3's `EndpointChannel`).
struct LoopbackChannel {
    tx: std_mpsc::Sender<Vec<u8>>,
    rx: std_mpsc::Receiver<Vec<u8>>,
    medium: Medium,
    name: String,
    paused: bool,
}

impl LoopbackChannel {
    fn pair(medium: Medium, a_name: &str, b_name: &str) -> (Self, Self) {
        let (a_tx, b_rx) = std_mpsc::channel();
        let (b_tx, a_rx) = std_mpsc::channel();
        (
            LoopbackChannel { tx: a_tx, rx: a_rx, medium, name: a_name.to_string(), paused: false },
            LoopbackChannel { tx: b_tx, rx: b_rx, medium, name: b_name.to_string(), paused: false },
        )
    }
}

impl EndpointChannel for LoopbackChannel {
    fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.paused {
            return Err(ChannelError::Paused);
        }
        self.rx.recv().map_err(|_| ChannelError::Closed)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.tx.send(bytes.to_vec()).map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self, _reason: CloseReason) {}

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn attach_encryption(&mut self, _context: Box<dyn ConnectionContext>) {}

    fn medium(&self) -> Medium {
        self.medium
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn last_read_time(&self) -> Option<pcp_core::Timestamp> {
        None
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

/// A directory of every session's handle, keyed by the endpoint id the
/// session was assigned — the loopback stand-in for "a real medium knows
/// how to dial a peer's address."
type Directory = Arc<Mutex<HashMap<EndpointId, pcp_transport::PcpHandlerHandle>>>;

/// `MediumRegistry` double: `connect` opens a `LoopbackChannel` pair, hands
/// one end straight back to the caller, and spawns a thread that reads the
/// other end's first frame (the `ConnectionRequest`), decodes it, and
/// forwards it to the target session's `post_incoming` — the role a real
/// medium's accept loop plays before the core ever sees the socket.
struct LoopbackRegistry {
    directory: Directory,
    latency: Duration,
    discovery_callbacks: Arc<Mutex<HashMap<Medium, DiscoveryFoundCallback>>>,
}

impl MediumRegistry for LoopbackRegistry {
    fn is_available(&self, _medium: Medium) -> bool {
        true
    }

    fn start_advertising(&mut self, _medium: Medium, _service_id: &str, _blob: &[u8]) -> Result<(), PcpError> {
        Ok(())
    }

    fn stop_advertising(&mut self, _medium: Medium, _service_id: &str) {}

    fn start_accepting(&mut self, _medium: Medium, _service_id: &str) -> Result<(), PcpError> {
        Ok(())
    }

    fn stop_accepting(&mut self, _medium: Medium, _service_id: &str) {}

    fn start_discovery(
        &mut self,
        medium: Medium,
        _service_id: &str,
        on_found: DiscoveryFoundCallback,
    ) -> Result<(), PcpError> {
        self.discovery_callbacks.lock().unwrap().insert(medium, on_found);
        Ok(())
    }

    fn stop_discovery(&mut self, medium: Medium, _service_id: &str) {
        self.discovery_callbacks.lock().unwrap().remove(&medium);
    }

    fn connect(&mut self, target: ConnectTarget<'_>) -> Result<Box<dyn EndpointChannel>, PcpError> {
        let peer = self
            .directory
            .lock()
            .unwrap()
            .get(&target.endpoint_id)
            .cloned()
            .ok_or(PcpError::EndpointUnknown)?;

        let (local_end, mut remote_end) =
            LoopbackChannel::pair(target.medium, "client", "server");

        let latency = self.latency;
        std::thread::spawn(move || {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            let Ok(mut bytes) = remote_end.read() else { return };
            let Ok(pcp_codec::Frame::ConnectionRequest(request)) = pcp_codec::Frame::decode(&mut bytes) else {
                return;
            };
            peer.post_incoming(target.medium, Box::new(remote_end), request);
        });

        Ok(Box::new(local_end))
    }
}

struct RecordingListener {
    events: std_mpsc::Sender<String>,
}

impl ConnectionListener for RecordingListener {
    fn on_connection_initiated(&mut self, endpoint_id: EndpointId, is_incoming: bool) {
        let _ = self.events.send(format!("initiated:{endpoint_id}:{is_incoming}"));
    }
    fn on_connection_established(&mut self, endpoint_id: EndpointId) {
        let _ = self.events.send(format!("established:{endpoint_id}"));
    }
    fn on_connection_accepted(&mut self, endpoint_id: EndpointId) {
        let _ = self.events.send(format!("accepted:{endpoint_id}"));
    }
    fn on_connection_rejected(&mut self, endpoint_id: EndpointId, _reason: PcpError) {
        let _ = self.events.send(format!("rejected:{endpoint_id}"));
    }
    fn on_bandwidth_changed(&mut self, _endpoint_id: EndpointId, _medium: Medium) {}
    fn on_disconnected(&mut self, endpoint_id: EndpointId) {
        let _ = self.events.send(format!("disconnected:{endpoint_id}"));
    }
}

fn build_session(directory: &Directory, nonce: u32) -> pcp::PcpSession {
    build_session_with(directory, nonce, FlagsSnapshot::default(), Duration::ZERO)
}

/// Builds a session whose registry simulates `latency` of wire delay before
/// an outgoing `connect()` delivers its frame to the peer — enough slack for
/// a test to get both sides' own pending state recorded before a race
/// between them is resolved (tie-break scenarios need this; a clean
/// single-sided connect doesn't).
fn build_session_with(
    directory: &Directory,
    nonce: u32,
    flags: FlagsSnapshot,
    latency: Duration,
) -> pcp::PcpSession {
    build_session_with_discovery_callbacks(
        directory,
        nonce,
        flags,
        latency,
        Arc::new(Mutex::new(HashMap::new())),
    )
}

/// As [`build_session_with`], but also exposes the registry's captured
/// discovery "found" callbacks so a test can invoke one directly, the way a
/// real medium would once it scans an advertisement off the air.
fn build_session_with_discovery_callbacks(
    directory: &Directory,
    nonce: u32,
    flags: FlagsSnapshot,
    latency: Duration,
    discovery_callbacks: Arc<Mutex<HashMap<Medium, DiscoveryFoundCallback>>>,
) -> pcp::PcpSession {
    let registry = Box::new(LoopbackRegistry {
        directory: Arc::clone(directory),
        latency,
        discovery_callbacks,
    });
    let session = PcpSessionBuilder::new()
        .registry(registry)
        .ukey2_factory(ukey2_factory)
        .rng(Box::new(FixedNonce(nonce)))
        .flags(flags)
        .build();
    directory.lock().unwrap().insert(session.local_endpoint_id(), session.handle());
    session
}

/// A clean outgoing connection that both sides accept ends with both
/// listeners observing `on_connection_accepted` and the caller's
/// `request_connection` future resolving `Ok(())` (§8 "End-to-end
/// scenarios", clean connection case).
#[tokio::test]
async fn clean_connection_is_accepted_by_both_sides() {
    let directory: Directory = Arc::new(Mutex::new(HashMap::new()));
    let alice = build_session(&directory, 10);
    let bob = build_session(&directory, 20);

    // Bob has to know Alice is out there before he can dial her; a real
    // medium would learn this via discovery, so we inject it directly.
    bob.handle()
        .inject_endpoint(
            "svc".to_string(),
            pcp::InjectedEndpoint {
                endpoint_id: alice.local_endpoint_id(),
                endpoint_info: EndpointInfo::new(b"alice".to_vec()).unwrap(),
                medium: Medium::Bluetooth,
                bluetooth_mac: [9, 9, 9, 9, 9, 9],
            },
        )
        .await
        .unwrap();

    alice
        .handle()
        .start_listening("svc".to_string(), Box::new(NullConnectionListener))
        .await
        .unwrap();

    let (bob_events_tx, bob_events_rx) = std_mpsc::channel();
    let connect_result = bob
        .handle()
        .request_connection(
            alice.local_endpoint_id(),
            EndpointInfo::new(b"bob".to_vec()).unwrap(),
            ConnectionRequestOptions {
                allowed_mediums: MediumSelector::all(),
                remote_bluetooth_mac_address: Some([9, 9, 9, 9, 9, 9]),
                local_device: None,
            },
            Box::new(RecordingListener { events: bob_events_tx }),
        )
        .await
        .unwrap();

    // `accept_connection` only succeeds once a handshake has registered
    // the endpoint (§4.5 "Accept / reject" step 1); retry until the
    // background handshake threads have had a chance to run and this
    // becomes the real, decisive accept for both sides.
    accept_once_registered(&alice, bob.local_endpoint_id()).await;
    accept_once_registered(&bob, alice.local_endpoint_id()).await;

    // Each side only decides its own half directly; the other half arrives
    // the way a frame-pump would report it after reading the peer's
    // `ConnectionResponse` off the wire.
    alice.handle().post_remote_decision(bob.local_endpoint_id(), true);
    bob.handle().post_remote_decision(alice.local_endpoint_id(), true);

    let outcome = connect_result.await.unwrap();
    assert_eq!(outcome, Ok(()));

    assert_eq!(
        bob_events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        format!("accepted:{}", alice.local_endpoint_id())
    );
}

struct NullConnectionListener;
impl ConnectionListener for NullConnectionListener {
    fn on_connection_initiated(&mut self, _endpoint_id: EndpointId, _is_incoming: bool) {}
    fn on_connection_established(&mut self, _endpoint_id: EndpointId) {}
    fn on_connection_accepted(&mut self, _endpoint_id: EndpointId) {}
    fn on_connection_rejected(&mut self, _endpoint_id: EndpointId, _reason: PcpError) {}
    fn on_bandwidth_changed(&mut self, _endpoint_id: EndpointId, _medium: Medium) {}
    fn on_disconnected(&mut self, _endpoint_id: EndpointId) {}
}

async fn accept_once_registered(session: &pcp::PcpSession, endpoint_id: EndpointId) {
    decide_once_registered(session, endpoint_id, true).await;
}

async fn decide_once_registered(session: &pcp::PcpSession, endpoint_id: EndpointId, accept: bool) {
    for _ in 0..200 {
        let result = if accept {
            session.handle().accept_connection(endpoint_id).await
        } else {
            session.handle().reject_connection(endpoint_id).await
        };
        if result.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("endpoint never registered");
}

fn bluetooth_request_options(mac: [u8; 6]) -> ConnectionRequestOptions {
    ConnectionRequestOptions {
        allowed_mediums: MediumSelector::all(),
        remote_bluetooth_mac_address: Some(mac),
        local_device: None,
    }
}

/// When both endpoints dial each other at the same time, the side with the
/// lower nonce discards its own outgoing attempt and accepts the peer's
/// instead, so only one connection — built from the higher-nonce side's
/// channel — survives (§4.5 "Tie-break").
#[tokio::test]
async fn tie_break_prefers_higher_nonce() {
    let directory: Directory = Arc::new(Mutex::new(HashMap::new()));
    let latency = Duration::from_millis(100);
    let alice = build_session_with(&directory, 10, FlagsSnapshot::default(), latency);
    let bob = build_session_with(&directory, 20, FlagsSnapshot::default(), latency);
    let mac = [7, 7, 7, 7, 7, 7];

    let (alice_tx, _alice_rx) = std_mpsc::channel();
    let (bob_tx, _bob_rx) = std_mpsc::channel();

    let alice_result = alice
        .handle()
        .request_connection(
            bob.local_endpoint_id(),
            EndpointInfo::new(b"alice".to_vec()).unwrap(),
            bluetooth_request_options(mac),
            Box::new(RecordingListener { events: alice_tx }),
        )
        .await
        .unwrap();
    let bob_result = bob
        .handle()
        .request_connection(
            alice.local_endpoint_id(),
            EndpointInfo::new(b"bob".to_vec()).unwrap(),
            bluetooth_request_options(mac),
            Box::new(RecordingListener { events: bob_tx }),
        )
        .await
        .unwrap();

    // Both sides' own pending attempts are recorded before either one's
    // simulated-latency frame arrives, so the tie-break has two genuine
    // candidates to compare instead of racing an empty pending map.
    assert_eq!(alice_result.await.unwrap(), Err(PcpError::EndpointIoError));
    assert_eq!(bob_result.await.unwrap(), Ok(()));

    // Bob's nonce (20) beat Alice's (10), so his own outgoing channel is
    // what ends up registered on both sides.
    accept_once_registered(&alice, bob.local_endpoint_id()).await;
    accept_once_registered(&bob, alice.local_endpoint_id()).await;
    alice.handle().post_remote_decision(bob.local_endpoint_id(), true);
    bob.handle().post_remote_decision(alice.local_endpoint_id(), true);
}

/// A connection both sides reject never calls `on_connection_accepted`, and
/// the endpoint is discarded once the rejection's close delay elapses
/// (§4.5 "evaluate_connection_result").
#[tokio::test]
async fn mutual_rejection_notifies_listeners_and_discards_endpoint() {
    let directory: Directory = Arc::new(Mutex::new(HashMap::new()));
    let flags = FlagsSnapshot { rejection_close_delay: Duration::from_millis(50), ..Default::default() };
    let alice = build_session_with(&directory, 30, flags, Duration::ZERO);
    let bob = build_session_with(&directory, 40, flags, Duration::ZERO);

    bob.handle()
        .inject_endpoint(
            "svc".to_string(),
            pcp::InjectedEndpoint {
                endpoint_id: alice.local_endpoint_id(),
                endpoint_info: EndpointInfo::new(b"alice".to_vec()).unwrap(),
                medium: Medium::Bluetooth,
                bluetooth_mac: [5, 5, 5, 5, 5, 5],
            },
        )
        .await
        .unwrap();
    alice
        .handle()
        .start_listening("svc".to_string(), Box::new(NullConnectionListener))
        .await
        .unwrap();

    let (bob_events_tx, bob_events_rx) = std_mpsc::channel();
    let connect_result = bob
        .handle()
        .request_connection(
            alice.local_endpoint_id(),
            EndpointInfo::new(b"bob".to_vec()).unwrap(),
            bluetooth_request_options([5, 5, 5, 5, 5, 5]),
            Box::new(RecordingListener { events: bob_events_tx }),
        )
        .await
        .unwrap();

    decide_once_registered(&alice, bob.local_endpoint_id(), false).await;
    bob.handle().reject_connection(alice.local_endpoint_id()).await.unwrap();

    alice.handle().post_remote_decision(bob.local_endpoint_id(), false);
    bob.handle().post_remote_decision(alice.local_endpoint_id(), false);

    assert_eq!(connect_result.await.unwrap(), Ok(()));
    assert_eq!(
        bob_events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        format!("rejected:{}", alice.local_endpoint_id())
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        alice.handle().accept_connection(bob.local_endpoint_id()).await,
        Err(PcpError::EndpointUnknown)
    );
}

struct RecordingDiscoveryListener {
    events: std_mpsc::Sender<String>,
}

impl DiscoveryListener for RecordingDiscoveryListener {
    fn on_endpoint_found(&mut self, endpoint: &DiscoveredEndpoint) {
        let _ = self.events.send(format!("found:{}", endpoint.endpoint_id));
    }
    fn on_endpoint_lost(&mut self, endpoint_id: EndpointId) {
        let _ = self.events.send(format!("lost:{endpoint_id}"));
    }
}

/// A medium's scan reporting a sighting through the captured `on_found`
/// callback ends with the discovery listener seeing the validated
/// endpoint, the way `MediumRegistry::start_discovery`'s caller expects
/// (§4.5 "Discovery" steps 1-3).
#[tokio::test]
async fn discovery_found_callback_reports_a_validated_advertisement() {
    let directory: Directory = Arc::new(Mutex::new(HashMap::new()));
    let discovery_callbacks = Arc::new(Mutex::new(HashMap::new()));
    let alice = build_session_with_discovery_callbacks(
        &directory,
        50,
        FlagsSnapshot::default(),
        Duration::ZERO,
        Arc::clone(&discovery_callbacks),
    );

    let (events_tx, events_rx) = std_mpsc::channel();
    alice
        .handle()
        .start_discovery(
            "svc".to_string(),
            DiscoveryOptions::default(),
            Box::new(RecordingDiscoveryListener { events: events_tx }),
        )
        .await
        .unwrap();

    let on_found = discovery_callbacks
        .lock()
        .unwrap()
        .get(&Medium::WifiLan)
        .cloned()
        .expect("discovery started on WifiLan");

    let remote_id = EndpointId::from_bytes(*b"WXYZ");
    let remote_info = EndpointInfo::new(b"remote".to_vec()).unwrap();
    let blob = pcp_transport::handler::build_advertisement_blob(
        Pcp::from_strategy(Strategy::Cluster),
        remote_id,
        &remote_info,
        "svc",
    );
    on_found(DiscoveredEndpointKind::WifiLan { ip: [10, 0, 0, 1], port: 4242 }, blob);

    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        format!("found:{remote_id}")
    );
}
