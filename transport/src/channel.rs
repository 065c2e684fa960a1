//! `EndpointChannel`: a bidirectional byte channel over one medium (§4.3).
//!
//! `read`/`write` are ordinary blocking calls — the medium socket is real
//! I/O — but per §5 ("Suspension points") they must never be invoked from
//! the `PcpHandler` serial executor itself; callers run them on a
//! dedicated worker (the `EncryptionRunner`'s thread, a medium's accept
//! loop) and post the result back onto the serial executor.

use pcp_core::{time::Timestamp, Medium};
use std::fmt;

/// Why an [`EndpointChannel`] was closed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Shutdown,
    IoError,
    Upgraded,
    Unfinished,
    RemoteDisconnect,
    LocalDisconnect,
}

/// An I/O failure on an [`EndpointChannel`]. All `read`/`write` surface a
/// `Result`; there is no exception control flow (§9 "Exceptions-for-IO").
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("the channel's peer closed the connection")]
    Closed,
    #[error("an I/O error occurred on the channel")]
    Io,
    #[error("the channel is paused and cannot read or write")]
    Paused,
}

/// One bidirectional byte channel over one medium. Every concrete medium
/// implementation satisfies this contract; the core treats them
/// polymorphically as `Box<dyn EndpointChannel>`.
pub trait EndpointChannel: Send {
    /// Reads the next complete chunk of bytes, blocking until data
    /// arrives, the peer closes, or an I/O error occurs.
    fn read(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Writes `bytes`, blocking until the write completes or fails.
    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Closes the channel. Idempotent.
    fn close(&mut self, reason: CloseReason);

    /// Suspends reads. The only mechanism for temporarily halting reads
    /// during a bandwidth upgrade — UKEY2 is sequence-numbered, so
    /// out-of-order reads break encryption (§4.3).
    fn pause(&mut self);

    /// Resumes reads after [`EndpointChannel::pause`].
    fn resume(&mut self);

    /// Attaches a post-handshake encryption context. Subsequent reads and
    /// writes transparently encrypt/decrypt. Idempotent per channel.
    fn attach_encryption(&mut self, context: Box<dyn super::crypto::ConnectionContext>);

    fn medium(&self) -> Medium;

    fn name(&self) -> &str;

    fn last_read_time(&self) -> Option<Timestamp>;

    fn is_paused(&self) -> bool;
}

impl fmt::Debug for dyn EndpointChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointChannel")
            .field("medium", &self.medium())
            .field("name", &self.name())
            .field("paused", &self.is_paused())
            .finish()
    }
}
