//! Status codes the core produces (§6.4), expressed as an error enum the
//! way `s2n-quic-core::connection::error` pairs `displaydoc` with
//! `thiserror` for both a human-readable `Display` and a `std::error::Error`
//! impl.

/// Errors a public `PcpHandler` operation can surface to its caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum PcpError {
    /// an unspecified error occurred
    Error,
    /// the local client is already connected to this endpoint
    AlreadyConnectedToEndpoint,
    /// the call is invalid given the client's current state
    OutOfOrderApiCall,
    /// no endpoint with that id is known to this client
    EndpointUnknown,
    /// the endpoint's channel failed or was closed
    EndpointIoError,
    /// the remote peer rejected the connection
    ConnectionRejected,
    /// a Bluetooth-medium operation failed
    BluetoothError,
    /// a BLE-medium operation failed
    BleError,
    /// a WiFi-LAN-medium operation failed
    WifiLanError,
    /// the client is already listening for incoming connections
    AlreadyListening,
}

impl std::error::Error for PcpError {}

pub type Result<T> = core::result::Result<T, PcpError>;
