//! The P2P topology strategy and its wire tag (§2 "MediumStrategy", §4.5
//! "Strategy variants", §6.2 advertisement blob's `pcp` byte).

/// Topology policy constraining outgoing/incoming connection counts.
/// `CanSendOutgoingConnection`/`CanReceiveIncomingConnection` are
/// implemented per-variant in `pcp-transport::strategy`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Many-to-many: no topology restriction.
    Cluster,
    /// Hub many-to-one.
    Star,
    /// Strict 1:1.
    PointToPoint,
}

/// The single-byte PCP tag carried in the advertisement blob (§6.2),
/// identifying which [`Strategy`] produced it so discovery can reject
/// mismatched strategies (§4.5 "Discovery", step 2).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pcp(u8);

impl Pcp {
    pub fn from_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Cluster => Self(1),
            Strategy::Star => Self(2),
            Strategy::PointToPoint => Self(3),
        }
    }

    pub fn matches(self, strategy: Strategy) -> bool {
        self == Self::from_strategy(strategy)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        matches!(tag, 1..=3).then_some(Self(tag))
    }
}
