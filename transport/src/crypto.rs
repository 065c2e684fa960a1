//! `EncryptionRunner` (§4.4): drives a UKEY2 handshake over an
//! `EndpointChannel` on an independent worker thread, then posts the
//! outcome back onto the `PcpHandler` serial executor.
//!
//! UKEY2 itself stays an external collaborator per spec.md §1 ("The UKEY2
//! cryptographic primitive... the core calls StartClient/StartServer,
//! verifies, and extracts a context"); [`Ukey2`] is the seam.

use crate::channel::{ChannelError, EndpointChannel};
use pcp_core::EndpointId;
use std::fmt;

/// Client (initiator) or server (responder) handshake role. Note the open
/// question recorded in spec.md §9: `RequestConnectionV3` sets
/// `is_incoming = true` even for an outgoing call so that downstream
/// authentication code keys on it to pick the initiator role. We preserve
/// that by keying `Role` off `authenticate_as_initiator`, not off whether
/// the connection is incoming, in [`crate::pending::PendingConnectionInfo`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A negotiated shared-secret context. Ownership lives on
/// `PendingConnectionInfo` until `evaluate_connection_result` moves it
/// into the channel via `attach_encryption`; the context must be dropped
/// there and nowhere else, per the design note in §9 about destructor
/// ordering. In this safe-language port no special handling is required
/// beyond normal drop order — `Box<dyn ConnectionContext>` is simply
/// moved, never duplicated.
pub trait ConnectionContext: Send {
    fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8>;
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, ChannelError>;
}

impl fmt::Debug for dyn ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionContext")
    }
}

/// The external UKEY2 primitive's seam: run one handshake role to
/// completion over `channel`, consuming it (the runner owns the channel
/// exclusively for the duration of the handshake).
pub trait Ukey2: Send {
    fn handshake(
        self: Box<Self>,
        role: Role,
        channel: Box<dyn EndpointChannel>,
    ) -> Ukey2Result;
}

pub struct Ukey2Result {
    pub channel: Box<dyn EndpointChannel>,
    pub outcome: Result<Ukey2Success, ()>,
}

pub struct Ukey2Success {
    pub context: Box<dyn ConnectionContext>,
    /// Human-verifiable short string derived from the session key.
    pub auth_token: String,
    /// The full secret used later for out-of-band authentication.
    pub raw_auth_token: Vec<u8>,
}

/// Identifies which channel a handshake ran on, so a stale handshake
/// result (one running against a channel a tie-break has since replaced)
/// can be told apart from a current one (§4.4, §7 "Handshake failure").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChannelToken(pub u64);

/// What the `EncryptionRunner` posts back onto the `PcpHandler` serial
/// executor once a handshake worker finishes (§4.4).
pub enum HandshakeOutcome {
    Success {
        endpoint_id: EndpointId,
        channel_token: ChannelToken,
        channel: Box<dyn EndpointChannel>,
        context: Box<dyn ConnectionContext>,
        auth_token: String,
        raw_auth_token: Vec<u8>,
    },
    Failure {
        endpoint_id: EndpointId,
        channel_token: ChannelToken,
    },
}

/// Drives UKEY2 handshakes on dedicated worker threads (§4.4, §5: "The
/// EncryptionRunner... each run on their own threads; their results
/// re-enter S via queued tasks").
#[derive(Clone)]
pub struct EncryptionRunner {
    reply: tokio::sync::mpsc::UnboundedSender<HandshakeOutcome>,
}

impl EncryptionRunner {
    pub fn new(reply: tokio::sync::mpsc::UnboundedSender<HandshakeOutcome>) -> Self {
        Self { reply }
    }

    pub fn start_client(
        &self,
        endpoint_id: EndpointId,
        channel_token: ChannelToken,
        channel: Box<dyn EndpointChannel>,
        ukey2: Box<dyn Ukey2>,
    ) {
        self.spawn(endpoint_id, channel_token, channel, ukey2, Role::Client)
    }

    pub fn start_server(
        &self,
        endpoint_id: EndpointId,
        channel_token: ChannelToken,
        channel: Box<dyn EndpointChannel>,
        ukey2: Box<dyn Ukey2>,
    ) {
        self.spawn(endpoint_id, channel_token, channel, ukey2, Role::Server)
    }

    fn spawn(
        &self,
        endpoint_id: EndpointId,
        channel_token: ChannelToken,
        channel: Box<dyn EndpointChannel>,
        ukey2: Box<dyn Ukey2>,
        role: Role,
    ) {
        let reply = self.reply.clone();
        std::thread::spawn(move || {
            let Ukey2Result { channel, outcome } = ukey2.handshake(role, channel);
            let message = match outcome {
                Ok(success) => HandshakeOutcome::Success {
                    endpoint_id,
                    channel_token,
                    channel,
                    context: success.context,
                    auth_token: success.auth_token,
                    raw_auth_token: success.raw_auth_token,
                },
                Err(()) => {
                    tracing::warn!(%endpoint_id, "ukey2 handshake failed");
                    HandshakeOutcome::Failure {
                        endpoint_id,
                        channel_token,
                    }
                }
            };
            // The PcpHandler may have already shut down; dropping the
            // outcome silently is correct in that case.
            let _ = reply.send(message);
        });
    }
}
