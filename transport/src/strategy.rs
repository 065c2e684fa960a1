//! `MediumStrategy` variants (§4.5 "Strategy variants"): the topology
//! policy that parameterizes how many simultaneous outgoing/incoming
//! connections a client session may hold.

use pcp_core::{medium, Medium, Pcp, Strategy};

/// How many connections (pending or registered) the caller currently
/// holds, passed in by the handler rather than read from shared state,
/// so the predicate stays a pure function of its inputs.
#[derive(Debug, Copy, Clone, Default)]
pub struct ConnectionCounts {
    pub outgoing: usize,
    pub incoming: usize,
}

impl ConnectionCounts {
    pub fn total(self) -> usize {
        self.outgoing + self.incoming
    }
}

/// Per §9's open question: the base predicates are unconditionally
/// `true` for Cluster; only Star and PointToPoint restrict. We preserve
/// that observed asymmetry rather than inventing a resource-pressure
/// policy for Cluster.
pub trait MediumStrategy: Send + Sync {
    fn pcp(&self) -> Pcp;

    fn can_send_outgoing_connection(&self, counts: ConnectionCounts) -> bool;

    fn can_receive_incoming_connection(&self, counts: ConnectionCounts) -> bool;

    /// Lower is preferred. Defaults to declaration order in
    /// [`pcp_core::medium::ALL`]; strategies may override to prefer, say,
    /// WiFi-LAN over Bluetooth.
    fn medium_priority(&self, wanted: Medium) -> u8 {
        medium::ALL
            .iter()
            .position(|m| *m == wanted)
            .map(|pos| pos as u8)
            .unwrap_or(u8::MAX)
    }
}

/// Many-to-many: every device may hold any number of simultaneous
/// connections to any number of peers.
pub struct Cluster;

impl MediumStrategy for Cluster {
    fn pcp(&self) -> Pcp {
        Pcp::from_strategy(Strategy::Cluster)
    }

    fn can_send_outgoing_connection(&self, _counts: ConnectionCounts) -> bool {
        true
    }

    fn can_receive_incoming_connection(&self, _counts: ConnectionCounts) -> bool {
        true
    }
}

/// Hub-and-spoke: a hub accepts many incoming connections but never
/// dials out itself; a spoke dials exactly one hub and accepts nothing.
pub struct Star;

impl MediumStrategy for Star {
    fn pcp(&self) -> Pcp {
        Pcp::from_strategy(Strategy::Star)
    }

    fn can_send_outgoing_connection(&self, counts: ConnectionCounts) -> bool {
        counts.total() == 0
    }

    fn can_receive_incoming_connection(&self, counts: ConnectionCounts) -> bool {
        counts.outgoing == 0
    }
}

/// Exactly one connection, in either direction.
pub struct PointToPoint;

impl MediumStrategy for PointToPoint {
    fn pcp(&self) -> Pcp {
        Pcp::from_strategy(Strategy::PointToPoint)
    }

    fn can_send_outgoing_connection(&self, counts: ConnectionCounts) -> bool {
        counts.total() == 0
    }

    fn can_receive_incoming_connection(&self, counts: ConnectionCounts) -> bool {
        counts.total() == 0
    }
}

pub fn for_strategy(strategy: Strategy) -> Box<dyn MediumStrategy> {
    match strategy {
        Strategy::Cluster => Box::new(Cluster),
        Strategy::Star => Box::new(Star),
        Strategy::PointToPoint => Box::new(PointToPoint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_always_permits() {
        let cluster = Cluster;
        let busy = ConnectionCounts { outgoing: 3, incoming: 3 };
        assert!(cluster.can_send_outgoing_connection(busy));
        assert!(cluster.can_receive_incoming_connection(busy));
    }

    #[test]
    fn star_hub_accepts_but_never_dials() {
        let star = Star;
        let hub_with_spokes = ConnectionCounts { outgoing: 0, incoming: 4 };
        assert!(!star.can_send_outgoing_connection(hub_with_spokes));
        assert!(star.can_receive_incoming_connection(hub_with_spokes));
    }

    #[test]
    fn star_spoke_with_outgoing_refuses_incoming() {
        let star = Star;
        let spoke = ConnectionCounts { outgoing: 1, incoming: 0 };
        assert!(!star.can_receive_incoming_connection(spoke));
    }

    #[test]
    fn point_to_point_permits_exactly_one() {
        let p2p = PointToPoint;
        let none = ConnectionCounts::default();
        assert!(p2p.can_send_outgoing_connection(none));
        let one = ConnectionCounts { outgoing: 1, incoming: 0 };
        assert!(!p2p.can_send_outgoing_connection(one));
        assert!(!p2p.can_receive_incoming_connection(one));
    }
}
