//! `FlagsSnapshot`: the feature-flag values the original implementation
//! reads ad hoc at many call sites, grouped and captured once at client
//! session creation and threaded explicitly thereafter (§9 design note).

use std::time::Duration;

/// Feature flags and tunable timeouts captured once when a client session
/// is built. None of these are re-read mid-session; a new session must be
/// created to pick up new values.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FlagsSnapshot {
    /// Default keep-alive interval when a remote request omits one.
    pub keep_alive_interval_default: Duration,
    /// Default keep-alive timeout when a remote request omits one.
    pub keep_alive_timeout_default: Duration,
    /// Read deadline for an incoming `ConnectionRequest` frame (§5).
    pub connection_request_read_deadline: Duration,
    /// Per-medium endpoint-lost alarm timeout (§4.2, §5).
    pub endpoint_lost_alarm_timeout: Duration,
    /// Delay before discarding a rejected endpoint, so the rejection frame
    /// has time to reach the peer (§4.5 "evaluate_connection_result", §5).
    pub rejection_close_delay: Duration,
    /// How long a cached stable endpoint id remains valid across a
    /// stop/start pair (§8 "Endpoint-id stability").
    pub stable_endpoint_id_cache_timeout: Duration,
    /// Automatically request a bandwidth upgrade once an incoming
    /// connection is accepted (§4.5 "evaluate_connection_result").
    pub auto_upgrade_bandwidth: bool,
    /// Enable multiplexing the encrypted channel after acceptance.
    pub enable_multiplex: bool,
}

impl Default for FlagsSnapshot {
    fn default() -> Self {
        Self {
            keep_alive_interval_default: Duration::from_secs(5),
            keep_alive_timeout_default: Duration::from_secs(30),
            connection_request_read_deadline: Duration::from_secs(2),
            endpoint_lost_alarm_timeout: Duration::from_secs(10),
            rejection_close_delay: Duration::from_secs(2),
            stable_endpoint_id_cache_timeout: Duration::from_secs(20),
            auto_upgrade_bandwidth: true,
            enable_multiplex: false,
        }
    }
}
