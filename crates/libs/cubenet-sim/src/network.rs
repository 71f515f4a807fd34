//! The simulated network: an arena of nodes indexed by small ids, the
//! connections between their physical layers, and the network-wide
//! assertions scenario files lean on.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::Write;

use cubenet_addr::{AddressSpace, HypercubeAddress, MacAddress, UniversalAddress};
use cubenet_units::{Bandwidth, Time};

use crate::node::Node;
use crate::SimError;

/// Arena index of a node. Events and layers carry ids, never pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Arena index of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub usize);

/// A full-duplex link between two nodes' physical layers.
#[derive(Debug)]
pub struct Connection {
    pub a: NodeId,
    pub b: NodeId,
    pub bandwidth: Bandwidth,
    pub delay: Time,
}

impl Connection {
    /// The endpoint that is not `from`.
    pub fn other(&self, from: NodeId) -> NodeId {
        if from == self.a {
            self.b
        } else {
            self.a
        }
    }
}

/// The network owns every node and connection. Nodes are temporarily
/// taken out of the arena while an event runs against them, so lookups
/// tolerate a missing slot.
#[derive(Debug)]
pub struct Network {
    address_length: u16,
    nodes: Vec<Option<Node>>,
    by_name: BTreeMap<String, NodeId>,
    by_mac: HashMap<MacAddress, NodeId>,
    connections: Vec<Option<Connection>>,
}

impl Default for Network {
    fn default() -> Self {
        Network {
            address_length: 8,
            nodes: Vec::new(),
            by_name: BTreeMap::new(),
            by_mac: HashMap::new(),
            connections: Vec::new(),
        }
    }
}

impl Network {
    pub fn address_length(&self) -> u16 {
        self.address_length
    }

    pub fn set_address_length(&mut self, length: u16) {
        self.address_length = length;
    }

    pub fn node_count(&self) -> usize {
        self.by_name.len()
    }

    pub fn add_node(&mut self, name: &str) -> Result<NodeId, SimError> {
        if self.by_name.contains_key(name) {
            return Err(SimError::scenario(format!("node already exists: {name}")));
        }
        let id = NodeId(self.nodes.len());
        let node = Node::new(id, UniversalAddress::new(name));
        self.by_mac.insert(node.mac, id);
        self.by_name.insert(name.to_string(), id);
        self.nodes.push(Some(node));
        Ok(id)
    }

    pub fn node_id(&self, name: &str) -> Result<NodeId, SimError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimError::scenario(format!("node not found: {name}")))
    }

    pub fn node_ref(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// All node ids in name order, the deterministic fan-out order of
    /// `allNodes`.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.by_name.values().copied().collect()
    }

    pub(crate) fn take_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.get_mut(id.0).and_then(Option::take)
    }

    pub(crate) fn put_node(&mut self, node: Node) {
        let slot = node.id.0;
        if let Some(entry) = self.nodes.get_mut(slot) {
            *entry = Some(node);
        }
    }

    /// Remove a node and every connection attached to it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), SimError> {
        let node = self
            .nodes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
        self.by_name.remove(node.name.as_str());
        self.by_mac.remove(&node.mac);

        let attached: Vec<ConnId> = self
            .connections
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.as_ref().filter(|c| c.a == id || c.b == id).map(|_| ConnId(i))
            })
            .collect();
        for conn in attached {
            self.remove_connection(conn);
        }
        Ok(())
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(id.0).and_then(Option::as_ref)
    }

    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.connections.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Connect two nodes, registering the link in both physical layers.
    pub fn add_connection(
        &mut self,
        a: NodeId,
        b: NodeId,
        bandwidth: Bandwidth,
        delay: Time,
    ) -> Result<ConnId, SimError> {
        let id = ConnId(self.connections.len());
        let mac_a = self.node_ref(a).map(|n| n.mac);
        let mac_b = self.node_ref(b).map(|n| n.mac);
        let (Some(mac_a), Some(mac_b)) = (mac_a, mac_b) else {
            return Err(SimError::scenario("connection endpoint not found".to_string()));
        };
        self.connections.push(Some(Connection { a, b, bandwidth, delay }));
        if let Some(Some(node)) = self.nodes.get_mut(a.0) {
            node.phys.connections.insert(mac_b, id);
        }
        if let Some(Some(node)) = self.nodes.get_mut(b.0) {
            node.phys.connections.insert(mac_a, id);
        }
        Ok(id)
    }

    /// The connection from `a` towards the node owning `b_mac`, if any.
    pub fn find_connection(&self, a: NodeId, b_mac: &MacAddress) -> Option<ConnId> {
        self.node_ref(a).and_then(|n| n.phys.connections.get(b_mac)).copied()
    }

    pub fn remove_connection(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        for endpoint in [conn.a, conn.b] {
            if let Some(Some(node)) = self.nodes.get_mut(endpoint.0) {
                node.phys.connections.retain(|_, c| *c != id);
            }
        }
    }

    /// Find the node currently holding `addr` as its primary address.
    /// `extra` covers the node an event has temporarily taken out.
    pub fn find_by_primary<'a>(
        &'a self,
        addr: &HypercubeAddress,
        extra: Option<&'a Node>,
    ) -> Option<&'a Node> {
        if let Some(node) = extra {
            if node.is_connected() && node.primary_address().address() == addr {
                return Some(node);
            }
        }
        self.nodes
            .iter()
            .flatten()
            .find(|n| n.is_connected() && n.primary_address().address() == addr)
    }

    fn node_by_name<'a>(&'a self, name: &str, extra: Option<&'a Node>) -> Option<&'a Node> {
        if let Some(node) = extra {
            if node.name.as_str() == name {
                return Some(node);
            }
        }
        self.by_name.get(name).copied().and_then(|id| self.node_ref(id))
    }

    /// Breadth-first hop count between two identities over the overlay
    /// links (or over every physical neighbour when `all_connections`).
    /// Returns -1 when unreachable.
    pub fn shortest_path(
        &self,
        source: &str,
        dest: &str,
        all_connections: bool,
        extra: Option<&Node>,
    ) -> i64 {
        if source == dest {
            return 0;
        }
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, i64)> = VecDeque::new();
        visited.insert(source.to_string());
        queue.push_back((source.to_string(), 0));

        while let Some((current, distance)) = queue.pop_front() {
            let Some(node) = self.node_by_name(&current, extra) else {
                continue;
            };
            for neighbour in node.neighbours() {
                if !all_connections && !neighbour.role.is_linked() {
                    continue;
                }
                let Some(next) = self.find_by_primary(neighbour.primary.address(), extra) else {
                    continue;
                };
                let name = next.name.to_string();
                if name == dest {
                    return distance + 1;
                }
                if visited.insert(name.clone()) {
                    queue.push_back((name, distance + 1));
                }
            }
        }
        -1
    }

    /// Verify the union of all owned addresses is disjoint and covers the
    /// whole cube.
    pub fn assert_complete_address_space(&self) -> Result<(), SimError> {
        let mut space = AddressSpace::new();
        for id in self.node_ids() {
            let Some(node) = self.node_ref(id) else {
                continue;
            };
            for addr in node.addresses() {
                if !space.add(addr.clone()) {
                    let base: Vec<String> = space.base().map(ToString::to_string).collect();
                    return Err(SimError::scenario(format!(
                        "address space has non-disjoint addresses! Address: {} of node {}; space: {}",
                        addr,
                        node.name,
                        base.join(" ")
                    )));
                }
            }
        }

        if space.is_complete() {
            return Ok(());
        }

        // Work out which sub-cubes are missing by complementing the last
        // (narrowest) element until the space collapses.
        let composed: Vec<String> = space.base().map(ToString::to_string).collect();
        let mut missing = Vec::new();
        while !space.is_complete() {
            let Some(last) = space.base().last().cloned() else {
                break;
            };
            if last.mask() == 0 {
                break;
            }
            let mut complement = last;
            complement.flip_bit(complement.mask() - 1);
            missing.push(complement.to_string());
            space.add(complement);
        }
        Err(SimError::scenario(format!(
            "address space is not complete! Composed by: {}; missing: {}",
            composed.join(" "),
            missing.join(" ")
        )))
    }

    /// Dump the overlay links as `a,b` lines, one per link, each reported
    /// by its lexicographically larger endpoint.
    pub fn export_connections(&self, path: &str) -> Result<(), SimError> {
        let mut file = std::fs::File::create(path)?;
        for id in self.node_ids() {
            let Some(node) = self.node_ref(id) else {
                continue;
            };
            for neighbour in node.neighbours() {
                if !neighbour.role.is_linked() {
                    continue;
                }
                if let Some(other) = self.find_by_primary(neighbour.primary.address(), None) {
                    if node.name.as_str() > other.name.as_str() {
                        writeln!(file, "{},{}", node.name, other.name)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_found_by_name_and_mac() {
        let mut network = Network::default();
        let a = network.add_node("A").unwrap();
        assert_eq!(network.node_id("A").unwrap(), a);
        assert!(network.node_id("B").is_err());
        assert!(network.add_node("A").is_err());
        let mac = network.node_ref(a).unwrap().mac;
        assert_eq!(network.by_mac.get(&mac), Some(&a));
    }

    #[test]
    fn connections_register_both_endpoints() {
        let mut network = Network::default();
        let a = network.add_node("A").unwrap();
        let b = network.add_node("B").unwrap();
        let conn = network
            .add_connection(a, b, Bandwidth::from_bps(1_000_000), Time::from_millis(1))
            .unwrap();

        let mac_b = network.node_ref(b).unwrap().mac;
        assert_eq!(network.find_connection(a, &mac_b), Some(conn));
        assert_eq!(network.connection(conn).unwrap().other(a), b);

        network.remove_connection(conn);
        assert!(network.connection(conn).is_none());
        assert_eq!(network.find_connection(a, &mac_b), None);
    }

    #[test]
    fn removing_a_node_removes_its_connections() {
        let mut network = Network::default();
        let a = network.add_node("A").unwrap();
        let b = network.add_node("B").unwrap();
        let conn = network.add_connection(a, b, Bandwidth::INFINITE, Time::ZERO).unwrap();
        network.remove_node(b).unwrap();
        assert!(network.connection(conn).is_none());
        assert!(network.node_id("B").is_err());
        assert_eq!(network.node_count(), 1);
    }

    #[test]
    fn taken_nodes_leave_an_empty_slot() {
        let mut network = Network::default();
        let a = network.add_node("A").unwrap();
        let node = network.take_node(a).unwrap();
        assert!(network.node_ref(a).is_none());
        network.put_node(node);
        assert!(network.node_ref(a).is_some());
    }

    #[test]
    fn empty_network_space_is_incomplete() {
        let network = Network::default();
        assert!(network.assert_complete_address_space().is_err());
    }
}
