//! A hypercube node: physical and data-link plumbing, the control layer
//! with its three state machines, the routing layer, and the applications.

use std::collections::BTreeMap;

use cubenet_addr::{HypercubeAddress, HypercubeMaskAddress, MacAddress, UniversalAddress};
use cubenet_units::Time;
use cubenet_wire::{
    ControlHeader, ControlPacket, Frame, UdpSegment, ETHERNET_CONTROL, ETHERNET_DATA, TRANSPORT_UDP,
};

use crate::apps::{RV_CLIENT_PORT, RV_SERVER_PORT, TEST_APP_PORT, TRACE_ROUTE_PORT};
use crate::event::{EventKind, TimeoutTarget};
use crate::machines::{HblSm, MainSm, PapSm};
use crate::message::{Message, Subscriber};
use crate::neighbour::Neighbour;
use crate::network::{ConnId, NodeId};
use crate::notification::QueryResult;
use crate::queries::{control_packet_query, neighbour_query};
use crate::rendezvous::{RvClient, RvServer};
use crate::routing::RoutingState;
use crate::simulator::Simulator;
use crate::SimError;

/// Sent/received counters per control packet type (indexes 0..8 map to
/// packet types 1..=8).
#[derive(Debug, Default)]
pub struct PacketStats {
    sent: [u64; 8],
    received: [u64; 8],
    sent_bytes: [u64; 8],
    received_bytes: [u64; 8],
}

#[derive(Debug, Clone, Copy)]
pub enum StatsKind {
    Sent,
    Received,
    SentBytes,
    ReceivedBytes,
}

impl PacketStats {
    fn record(&mut self, sent: bool, packet_type: u8, total_length: u8) {
        let index = usize::from(packet_type.saturating_sub(1)).min(7);
        if sent {
            self.sent[index] += 1;
            self.sent_bytes[index] += u64::from(total_length);
        } else {
            self.received[index] += 1;
            self.received_bytes[index] += u64::from(total_length);
        }
    }

    pub fn render(&self, kind: StatsKind) -> String {
        let values = match kind {
            StatsKind::Sent => &self.sent,
            StatsKind::Received => &self.received,
            StatsKind::SentBytes => &self.sent_bytes,
            StatsKind::ReceivedBytes => &self.received_bytes,
        };
        values.iter().map(u64::to_string).collect::<Vec<_>>().join(",")
    }
}

/// The physical layer: connections keyed by the far end's MAC, and the
/// serialisation horizon of the outgoing link.
#[derive(Debug, Default)]
pub struct PhysicalLayer {
    pub connections: BTreeMap<MacAddress, ConnId>,
    pub next_time_to_send: Time,
}

/// The hypercube control layer state: the owned addresses (primary first),
/// the neighbour table, reconnection offers and the state machines.
#[derive(Debug)]
pub struct ControlLayer {
    pub addresses: Vec<HypercubeMaskAddress>,
    pub initial_mask: u16,
    pub recovered_mask: HypercubeAddress,
    pub reconnect: Vec<HypercubeMaskAddress>,
    pub neighbours: BTreeMap<MacAddress, Neighbour>,
    pub hb_enabled: bool,
    pub stats: PacketStats,
    pub main_sm: MainSm,
    pub pap_sm: Option<PapSm>,
    pub hbl_sm: Option<HblSm>,
}

impl Default for ControlLayer {
    fn default() -> Self {
        ControlLayer {
            addresses: Vec::new(),
            initial_mask: 0,
            recovered_mask: HypercubeAddress::empty(),
            reconnect: Vec::new(),
            neighbours: BTreeMap::new(),
            hb_enabled: true,
            stats: PacketStats::default(),
            main_sm: MainSm::default(),
            pap_sm: None,
            hbl_sm: None,
        }
    }
}

/// One simulated node. Layers carry the node id, never references into
/// other nodes; anything inter-node travels as scheduled frames.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: UniversalAddress,
    pub mac: MacAddress,
    pub(crate) marked_for_delete: bool,
    pub(crate) phys: PhysicalLayer,
    pub(crate) control: ControlLayer,
    pub(crate) routing: RoutingState,
    pub(crate) rv_server: RvServer,
    pub(crate) rv_client: RvClient,
}

impl Node {
    pub fn new(id: NodeId, name: UniversalAddress) -> Self {
        let mac = name.hash_to_mac();
        Node {
            id,
            name,
            mac,
            marked_for_delete: false,
            phys: PhysicalLayer::default(),
            control: ControlLayer::default(),
            routing: RoutingState::default(),
            rv_server: RvServer::default(),
            rv_client: RvClient::default(),
        }
    }

    /// The node's primary address, or the empty address when disconnected.
    pub fn primary_address(&self) -> HypercubeMaskAddress {
        self.control.addresses.first().cloned().unwrap_or_default()
    }

    pub fn addresses(&self) -> &[HypercubeMaskAddress] {
        &self.control.addresses
    }

    pub fn is_connected(&self) -> bool {
        self.primary_address().bit_len() > 0
    }

    pub fn neighbours(&self) -> impl Iterator<Item = &Neighbour> {
        self.control.neighbours.values()
    }

    pub fn rv_server(&self) -> &RvServer {
        &self.rv_server
    }

    pub fn rv_client(&self) -> &RvClient {
        &self.rv_client
    }

    pub(crate) fn control_header(&self) -> ControlHeader {
        ControlHeader { mac: self.mac, primary: self.primary_address() }
    }

    pub(crate) fn make_hb_packet(&self) -> ControlPacket {
        ControlPacket::Hb { header: self.control_header() }
    }

    /// Whether this node has delegated part of its space to a child.
    pub fn has_child(&self) -> bool {
        self.control
            .addresses
            .first()
            .is_some_and(|primary| self.control.initial_mask != primary.mask())
    }

    pub(crate) fn set_primary_address(
        &mut self,
        sim: &mut Simulator,
        addr: HypercubeMaskAddress,
    ) -> Result<(), SimError> {
        let event = if self.control.addresses.is_empty() {
            self.control.initial_mask = addr.mask();
            self.control.addresses.push(addr.clone());
            "assigned"
        } else {
            self.control.addresses[0] = addr.clone();
            "changed"
        };
        let qr = QueryResult::with_id("Address", addr.to_string());
        sim.notify_node(&format!("node.primaryAddress.{event}"), Some(qr), self.name.as_str())
    }

    pub(crate) fn add_secondary_address(
        &mut self,
        sim: &mut Simulator,
        addr: HypercubeMaskAddress,
    ) -> Result<(), SimError> {
        self.control.addresses.push(addr.clone());
        let qr = QueryResult::with_id("Address", addr.to_string());
        sim.notify_node("node.secondaryAddress.assigned", Some(qr), self.name.as_str())
    }

    pub(crate) fn erase_reconnect(&mut self, addr: &HypercubeAddress) -> bool {
        match self.control.reconnect.iter().position(|r| r.address() == addr) {
            Some(pos) => {
                self.control.reconnect.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Toggle heart-bit emission; enabling while connected restarts both
    /// the listener machine and the heart-bit timer.
    pub(crate) fn set_hb_enabled(&mut self, sim: &mut Simulator, enabled: bool) -> Result<(), SimError> {
        self.control.hb_enabled = enabled;
        if enabled {
            if self.control.pap_sm.is_some() && self.control.hbl_sm.is_none() {
                self.start_hbl(sim)?;
                self.main_restart_heard_bit(sim);
            }
        } else {
            self.control.hbl_sm = None;
        }
        Ok(())
    }

    fn start_hbl(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.control.hbl_sm = Some(HblSm::default());
        self.hbl_enter_current(sim)?;
        sim.notify_node("node.statemachine.hbl.listenhb.enter", None, self.name.as_str())
    }

    // ----- message bus ----------------------------------------------------

    pub(crate) fn deliver_message(
        &mut self,
        sim: &mut Simulator,
        subscriber: Subscriber,
        msg: &Message,
    ) -> Result<(), SimError> {
        match subscriber {
            Subscriber::MainSm => self.main_on_message(sim, msg),
            Subscriber::ControlLayer => self.control_on_message(sim, msg),
            Subscriber::Routing => {
                self.routing_on_message(msg);
                Ok(())
            }
            Subscriber::RvServer => self.rv_server_on_message(sim, msg),
            Subscriber::Node => {
                if self.marked_for_delete && matches!(msg, Message::Disconnected) {
                    let command = format!("deleteNode({})", self.name);
                    sim.schedule_relative(EventKind::RunCommand { command }, Time::ZERO);
                }
                Ok(())
            }
        }
    }

    /// Connection lifecycle of the control layer: the provider machines
    /// only exist while the node holds an address.
    fn control_on_message(&mut self, sim: &mut Simulator, msg: &Message) -> Result<(), SimError> {
        match msg {
            Message::Connected { primary, .. } => {
                self.control.pap_sm = Some(PapSm::default());
                if self.control.hb_enabled {
                    self.start_hbl(sim)?;
                }
                self.control.recovered_mask = HypercubeAddress::zeros(primary.bit_len());
                Ok(())
            }
            Message::Disconnected => {
                self.control.pap_sm = None;
                self.control.hbl_sm = None;
                self.control.addresses.clear();
                self.control.neighbours.clear();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ----- timeouts -------------------------------------------------------

    pub(crate) fn on_timeout(
        &mut self,
        sim: &mut Simulator,
        target: TimeoutTarget,
        id: u64,
    ) -> Result<(), SimError> {
        match target {
            TimeoutTarget::MainSm(_) => self.main_on_timeout(sim, id),
            TimeoutTarget::PapSm(_) => self.pap_on_timeout(sim, id),
            TimeoutTarget::HblSm(_) => self.hbl_on_timeout(sim, id),
            TimeoutTarget::RoutingTable(_) => {
                self.routing_on_timeout(sim, id);
                Ok(())
            }
            TimeoutTarget::RvServer(_) => {
                self.rv_server_on_timeout(sim);
                Ok(())
            }
            TimeoutTarget::RvClient(_) => {
                self.rv_client_on_timeout(sim, id);
                Ok(())
            }
        }
    }

    // ----- frames up and down ---------------------------------------------

    pub(crate) fn receive_frame(&mut self, sim: &mut Simulator, frame: Frame) -> Result<(), SimError> {
        match frame.ethernet_type {
            ETHERNET_CONTROL => self.receive_control_frame(sim, &frame),
            ETHERNET_DATA => self.receive_data_frame(sim, frame.src, &frame.payload),
            other => Err(SimError::protocol(format!("unknown network protocol type {other}"))),
        }
    }

    fn receive_control_frame(&mut self, sim: &mut Simulator, frame: &Frame) -> Result<(), SimError> {
        let packet = ControlPacket::decode(&frame.payload)?;
        sim.notify_node(
            &format!("node.received.hcpacket.{}", packet.name().to_lowercase()),
            Some(control_packet_query(&packet)),
            self.name.as_str(),
        )?;
        self.control.stats.record(false, packet.packet_type(), packet.total_length());

        self.main_on_packet(sim, &packet)?;
        self.hbl_on_packet(sim, &packet)?;
        self.pap_on_packet(sim, &packet)
    }

    pub(crate) fn send_control(
        &mut self,
        sim: &mut Simulator,
        dest: MacAddress,
        packet: &ControlPacket,
    ) -> Result<(), SimError> {
        sim.notify_node(
            &format!("node.sent.hcpacket.{}", packet.name().to_lowercase()),
            Some(control_packet_query(packet)),
            self.name.as_str(),
        )?;
        self.control.stats.record(true, packet.packet_type(), packet.total_length());
        self.send_frame(sim, dest, ETHERNET_CONTROL, packet.encode())
    }

    /// Serialise a frame onto the wire. The physical layer queues behind
    /// `next_time_to_send`, which advances by frame-bits over bandwidth;
    /// broadcast pays the price of the slowest connection.
    pub(crate) fn send_frame(
        &mut self,
        sim: &mut Simulator,
        dest: MacAddress,
        ethernet_type: u16,
        payload: Vec<u8>,
    ) -> Result<(), SimError> {
        if self.phys.next_time_to_send < sim.now() {
            self.phys.next_time_to_send = sim.now();
        }

        let frame = Frame::new(self.mac, dest, ethernet_type, payload);
        let frame_bits = frame.len() as f64 * 8.0;

        if dest.is_broadcast() {
            let mut min_bandwidth = 0i64;
            for conn_id in self.phys.connections.values() {
                if let Some(conn) = sim.network.connection(*conn_id) {
                    let bps = conn.bandwidth.bps();
                    if bps > 0 && (min_bandwidth == 0 || bps < min_bandwidth) {
                        min_bandwidth = bps;
                    }
                }
            }
            if min_bandwidth > 0 {
                let delta = (frame_bits / min_bandwidth as f64 * Time::SEC as f64).round() as i64;
                self.phys.next_time_to_send += Time::from_nanos(delta);
            }
            for conn_id in self.phys.connections.values() {
                if let Some(conn) = sim.network.connection(*conn_id) {
                    let kind = EventKind::SendBits {
                        dest: conn.other(self.id),
                        delay: conn.delay,
                        frame: frame.clone(),
                    };
                    sim.schedule_absolute(kind, self.phys.next_time_to_send);
                }
            }
            return Ok(());
        }

        let conn_id = *self
            .phys
            .connections
            .get(&dest)
            .ok_or_else(|| SimError::protocol(format!("connection not found towards {dest}")))?;
        let Some(conn) = sim.network.connection(conn_id) else {
            return Ok(());
        };
        let (bandwidth, other, delay) = (conn.bandwidth.bps(), conn.other(self.id), conn.delay);
        if bandwidth > 0 {
            let delta = (frame_bits / bandwidth as f64 * Time::SEC as f64).round() as i64;
            self.phys.next_time_to_send += Time::from_nanos(delta);
        }
        sim.schedule_absolute(
            EventKind::SendBits { dest: other, delay, frame },
            self.phys.next_time_to_send,
        );
        Ok(())
    }

    // ----- transport ------------------------------------------------------

    pub(crate) fn transport_send(
        &mut self,
        sim: &mut Simulator,
        dest: HypercubeAddress,
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
    ) -> Result<(), SimError> {
        self.routing_send(sim, dest, UdpSegment::new(src_port, dst_port, payload))
    }

    pub(crate) fn transport_receive(
        &mut self,
        sim: &mut Simulator,
        packet: cubenet_wire::DataPacket,
    ) -> Result<(), SimError> {
        if packet.transport != TRANSPORT_UDP {
            return Err(SimError::protocol(format!("unknown transport type: {}", packet.transport)));
        }
        let segment = UdpSegment::decode(&packet.payload)?;
        match segment.dst_port {
            TRACE_ROUTE_PORT => Ok(()),
            RV_SERVER_PORT => {
                let from = packet.src.clone();
                self.rv_server_receive(sim, from, &segment.payload, &packet)
            }
            RV_CLIENT_PORT => self.rv_client_receive(sim, &segment.payload),
            TEST_APP_PORT => self.test_app_receive(sim, &segment.payload, &packet),
            _ => Ok(()),
        }
    }

    // ----- queries --------------------------------------------------------

    pub(crate) fn query_basic(&self) -> QueryResult {
        let mut qr = QueryResult::with_id("Node", self.name.as_str());
        qr.insert("universalAddress", self.name.to_string());
        for (i, addr) in self.control.addresses.iter().enumerate() {
            qr.insert(if i == 0 { "primaryAddress" } else { "secondaryAddress" }, addr.to_string());
        }
        qr.insert("MACAddress", self.mac.to_string());
        qr
    }

    pub(crate) fn query_neighbours(&self, sim: &Simulator) -> QueryResult {
        let mut qr = QueryResult::with_id("Node", self.name.as_str());
        let mut list = QueryResult::new("neighbours");
        for neighbour in self.control.neighbours.values() {
            let resolved = if neighbour.role.is_linked() {
                sim.network
                    .find_by_primary(neighbour.primary.address(), Some(self))
                    .map_or_else(|| "UNKNOWN".to_string(), |n| n.name.to_string())
            } else {
                "UNKNOWN".to_string()
            };
            list.insert_multi(neighbour_query(neighbour, &resolved));
        }
        qr.insert_multi(list);
        qr
    }

    pub(crate) fn query_stats(&self) -> QueryResult {
        let mut qr = QueryResult::with_id("Node", self.name.as_str());
        let mut control = QueryResult::new("ControlPackets");
        control.insert("sent", self.control.stats.render(StatsKind::Sent));
        control.insert("received", self.control.stats.render(StatsKind::Received));
        control.insert("sentBytes", self.control.stats.render(StatsKind::SentBytes));
        control.insert("receivedBytes", self.control.stats.render(StatsKind::ReceivedBytes));
        qr.insert_multi(control);
        qr
    }
}
