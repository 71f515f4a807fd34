use cubenet_addr::{HypercubeMaskAddress, MacAddress};
use cubenet_units::Time;

/// The relationship of a neighbour to this node on the addressing plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourRole {
    /// Gave this node its primary address.
    ParentOf,
    /// Received its primary address from this node.
    Child,
    /// Physically adjacent and at Hamming distance 1.
    Adjacent,
    /// Heard of but not yet part of the overlay topology.
    NotConnected,
    /// Stopped sending heart-bits.
    Disappeared,
    /// Announced its disconnection; kept as a tombstone so its address can
    /// be offered to a future joiner.
    Disconnected,
}

impl NeighbourRole {
    pub fn name(self) -> &'static str {
        match self {
            NeighbourRole::ParentOf => "parent",
            NeighbourRole::Child => "child",
            NeighbourRole::Adjacent => "adjacent",
            NeighbourRole::NotConnected => "not connected",
            NeighbourRole::Disappeared => "disappeared",
            NeighbourRole::Disconnected => "disconnected",
        }
    }

    /// Whether the neighbour takes part in the overlay topology.
    pub fn is_linked(self) -> bool {
        matches!(self, NeighbourRole::ParentOf | NeighbourRole::Child | NeighbourRole::Adjacent)
    }
}

/// One entry of a node's neighbour table.
#[derive(Debug, Clone)]
pub struct Neighbour {
    pub primary: HypercubeMaskAddress,
    pub mac: MacAddress,
    pub role: NeighbourRole,
    pub active: bool,
    pub last_seen: Time,
    pub proposed_secondary: bool,
}

impl Neighbour {
    pub fn new(primary: HypercubeMaskAddress, mac: MacAddress) -> Self {
        Neighbour {
            primary,
            mac,
            role: NeighbourRole::NotConnected,
            active: true,
            last_seen: Time::ZERO,
            proposed_secondary: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_neighbours_start_unconnected_and_active() {
        let n = Neighbour::new(
            HypercubeMaskAddress::new("10000000".parse().unwrap(), 1),
            MacAddress::new([1, 2, 3, 4, 5, 6]),
        );
        assert_eq!(n.role, NeighbourRole::NotConnected);
        assert!(n.active);
        assert!(!n.proposed_secondary);
    }

    #[test]
    fn linked_roles() {
        assert!(NeighbourRole::ParentOf.is_linked());
        assert!(NeighbourRole::Adjacent.is_linked());
        assert!(!NeighbourRole::Disappeared.is_linked());
        assert!(!NeighbourRole::Disconnected.is_linked());
    }
}
