//! Reactive routing: per-flow reverse-path learning, greedy forwarding by
//! Hamming distance and backtracking over visited-neighbour bitmaps.

use std::collections::HashMap;

use cubenet_addr::{HypercubeAddress, HypercubeMaskAddress};
use cubenet_wire::{DataPacket, RouteHeader, UdpSegment, ETHERNET_DATA, MAX_TTL};

use crate::apps::{RV_SERVER_PORT, TRACE_ROUTE_PORT};
use crate::event::TimeoutTarget;
use crate::message::Message;
use crate::node::Node;
use crate::notification::QueryResult;
use crate::queries::data_packet_query;
use crate::simulator::Simulator;
use crate::SimError;

/// Maps bitmap positions to neighbour addresses and availability. The
/// parent always occupies index 0; later routes append.
#[derive(Debug, Default)]
pub struct NeighbourMapping {
    entries: Vec<(HypercubeMaskAddress, bool)>,
}

impl NeighbourMapping {
    pub fn set_parent(&mut self, parent: HypercubeMaskAddress) {
        if self.entries.is_empty() {
            self.entries.push((parent, true));
        } else {
            self.entries[0] = (parent, true);
        }
    }

    pub fn add(&mut self, neighbour: HypercubeMaskAddress) {
        self.entries.push((neighbour, true));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn address(&self, n: usize) -> &HypercubeMaskAddress {
        &self.entries[n].0
    }

    pub fn is_available(&self, n: usize) -> bool {
        self.entries[n].1
    }

    pub fn set_available(&mut self, n: usize, available: bool) {
        self.entries[n].1 = available;
    }

    /// Index of the neighbour with this address, mask ignored.
    pub fn find_index(&self, addr: &HypercubeAddress) -> Option<usize> {
        self.entries.iter().position(|(a, _)| a.address() == addr)
    }

    pub fn change_mask(&mut self, addr: &HypercubeMaskAddress) {
        if let Some(i) = self.find_index(addr.address()) {
            self.entries[i].0 = addr.clone();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Which neighbours a flow already tried. Grows on demand; out-of-range
/// reads count as unvisited.
#[derive(Debug, Default, Clone)]
pub struct VisitedBitmap {
    bits: Vec<bool>,
}

impl VisitedBitmap {
    pub fn set(&mut self, n: usize) {
        if n >= self.bits.len() {
            self.bits.resize(n + 1, false);
        }
        self.bits[n] = true;
    }

    pub fn get(&self, n: usize) -> bool {
        self.bits.get(n).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    pub fn render(&self) -> String {
        self.bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }
}

pub type EntryId = u64;

/// One routing table entry. An empty next hop caches "no route from here".
#[derive(Debug, Clone)]
pub struct Entry {
    pub dest: HypercubeAddress,
    pub next_hop: HypercubeAddress,
    pub distance: i64,
    pub visited: VisitedBitmap,
}

impl Entry {
    fn known(dest: HypercubeAddress, next_hop: HypercubeAddress, distance: i64) -> Self {
        Entry { dest, next_hop, distance, visited: VisitedBitmap::default() }
    }

    fn unknown(dest: HypercubeAddress) -> Self {
        Entry {
            dest,
            next_hop: HypercubeAddress::empty(),
            distance: i64::from(MAX_TTL),
            visited: VisitedBitmap::default(),
        }
    }

    pub fn query(&self) -> QueryResult {
        let mut qr = QueryResult::new("Entry");
        qr.insert("Destination", self.dest.to_string());
        qr.insert("NextHop", self.next_hop.to_string());
        qr.insert("Distance", self.distance.to_string());
        qr.insert("VisitedBitmap", self.visited.render());
        qr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    ClearEntry,
    ClearBitmap,
}

/// The per-node routing table: a destination multimap plus the
/// per-(source, destination) pair map tying reverse and forward entries
/// together.
#[derive(Debug, Default)]
pub struct RoutingTable {
    next_id: EntryId,
    entries: HashMap<EntryId, Entry>,
    order: Vec<EntryId>,
    pairs: HashMap<(HypercubeAddress, HypercubeAddress), (EntryId, EntryId)>,
    timers: HashMap<u64, (TimerKind, EntryId)>,
}

impl RoutingTable {
    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    pub fn entries_for(&self, dest: &HypercubeAddress) -> Vec<EntryId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.entries.get(id).is_some_and(|e| &e.dest == dest))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter_in_order(&self) -> impl Iterator<Item = &Entry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn pair(&self, src: &HypercubeAddress, dst: &HypercubeAddress) -> Option<(EntryId, EntryId)> {
        self.pairs.get(&(src.clone(), dst.clone())).copied()
    }

    fn insert_pair(&mut self, src: HypercubeAddress, dst: HypercubeAddress, pair: (EntryId, EntryId)) {
        self.pairs.entry((src, dst)).or_insert(pair);
    }

    fn remove_entry(&mut self, id: EntryId) {
        self.pairs.retain(|_, (rev, fwd)| *rev != id && *fwd != id);
        self.entries.remove(&id);
        self.order.retain(|&e| e != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.pairs.clear();
        self.timers.clear();
    }
}

impl Node {
    /// Append an entry to the table, arming its lifetime and bitmap
    /// timers.
    fn table_add(&mut self, sim: &mut Simulator, entry: Entry) -> Result<EntryId, SimError> {
        let table = &mut self.routing.table;
        let id = table.next_id;
        table.next_id += 1;
        let query = entry.query();
        table.entries.insert(id, entry);
        table.order.push(id);
        sim.notify_node("node.routing.table.added", Some(query), self.name.as_str())?;
        self.table_arm_timer(sim, TimerKind::ClearEntry, id);
        self.table_arm_timer(sim, TimerKind::ClearBitmap, id);
        Ok(id)
    }

    fn table_arm_timer(&mut self, sim: &mut Simulator, kind: TimerKind, entry: EntryId) {
        let period = match kind {
            TimerKind::ClearEntry => sim.params.routing_table_entry_clear_period,
            TimerKind::ClearBitmap => sim.params.routing_table_bitmap_clear_period,
        };
        let timeout = sim.schedule_timeout(TimeoutTarget::RoutingTable(self.id), period);
        self.routing.table.timers.insert(timeout, (kind, entry));
    }

    pub(crate) fn routing_on_timeout(&mut self, _sim: &mut Simulator, id: u64) {
        let Some((kind, entry_id)) = self.routing.table.timers.remove(&id) else {
            return;
        };
        if !self.routing.table.entries.contains_key(&entry_id) {
            return;
        }
        match kind {
            TimerKind::ClearEntry => self.routing.table.remove_entry(entry_id),
            TimerKind::ClearBitmap => {
                if let Some(entry) = self.routing.table.entries.get_mut(&entry_id) {
                    entry.visited.clear();
                }
            }
        }
    }

    pub(crate) fn routing_on_message(&mut self, msg: &Message) {
        match msg {
            Message::Connected { parent, .. } => {
                if parent.bit_len() > 0 {
                    self.routing.mapping.set_parent(parent.clone());
                }
            }
            Message::NewRoute { route } => self.routing.mapping.add(route.clone()),
            Message::LostRoute { route } => {
                if let Some(n) = self.routing.mapping.find_index(route.address()) {
                    self.routing.mapping.set_available(n, false);
                }
            }
            Message::RouteChangedMask { route } => self.routing.mapping.change_mask(route),
            _ => {}
        }
    }

    /// Pick the next hop for a packet. Returns the empty address when no
    /// route exists from this node.
    pub(crate) fn route_packet(
        &mut self,
        sim: &mut Simulator,
        packet: &mut DataPacket,
        from: Option<HypercubeAddress>,
    ) -> Result<HypercubeAddress, SimError> {
        // A returned packet resumes backtracking immediately, skipping
        // reverse-path learning.
        if packet.returned() {
            packet.set_returned(false);
            return self.send_to_next_neighbour(sim, packet, from, None);
        }

        // The packet looped all the way back to its source.
        if let Some(from_addr) = &from {
            if packet.src == *self.primary_address().address() {
                packet.set_returned(true);
                packet.ttl += 1;
                return Ok(from_addr.clone());
            }
        }

        let mut reverse_entry: Option<EntryId> = None;
        let mut needs_join = false;

        if let Some(from_addr) = &from {
            let distance = i64::from(MAX_TTL) - i64::from(packet.ttl);
            if let Some((rev, _)) = self.routing.table.pair(&packet.src, &packet.dst) {
                let recorded = self.routing.table.get(rev).map_or(i64::from(MAX_TTL), |e| e.distance);
                if distance > recorded {
                    // Came in over a longer path than already learned;
                    // bounce it straight back.
                    packet.set_returned(true);
                    packet.ttl += 1;
                    return Ok(from_addr.clone());
                }
                reverse_entry = Some(rev);
                if let Some(entry) = self.routing.table.get_mut(rev) {
                    entry.next_hop = from_addr.clone();
                }
            } else {
                needs_join = true;
                for id in self.routing.table.entries_for(&packet.src) {
                    if self.routing.table.get(id).is_some_and(|e| e.next_hop == *from_addr) {
                        reverse_entry = Some(id);
                        break;
                    }
                }
                if reverse_entry.is_none() {
                    let entry = Entry::known(packet.src.clone(), from_addr.clone(), distance);
                    reverse_entry = Some(self.table_add(sim, entry)?);
                }
            }
            if let Some(rev) = reverse_entry {
                if let Some(entry) = self.routing.table.get_mut(rev) {
                    entry.distance = distance;
                }
            }
        }

        if packet.dst == *self.primary_address().address() {
            return Ok(packet.dst.clone());
        }

        let entries = self.routing.table.entries_for(&packet.dst);
        if entries.is_empty() {
            return self.send_to_next_neighbour(sim, packet, from, reverse_entry);
        }

        let mut next = HypercubeAddress::empty();
        let mut min_dist = i64::from(MAX_TTL) + 1;
        let mut best = None;
        for id in &entries {
            if let Some(entry) = self.routing.table.get(*id) {
                if entry.distance < min_dist {
                    next = entry.next_hop.clone();
                    min_dist = entry.distance;
                    best = Some(*id);
                }
            }
        }

        // An empty cached next hop means "known unreachable".
        if next.is_empty() {
            return Ok(next);
        }

        if let Some(from_addr) = &from {
            if next == *from_addr {
                packet.set_returned(true);
                packet.ttl += 1;
                return Ok(from_addr.clone());
            }
        }

        if let Some(index) = self.routing.mapping.find_index(&next) {
            if !self.routing.mapping.is_available(index) {
                return self.send_to_next_neighbour(sim, packet, from, reverse_entry);
            }
        }

        if needs_join {
            if let (Some(rev), Some(fwd)) = (reverse_entry, best) {
                self.routing.table.insert_pair(packet.src.clone(), packet.dst.clone(), (rev, fwd));
            }
        }

        packet.ttl = packet.ttl.saturating_sub(1);
        Ok(next)
    }

    /// Backtracking step: pick an unvisited neighbour, or give up and send
    /// the packet back along the learned reverse path.
    fn send_to_next_neighbour(
        &mut self,
        sim: &mut Simulator,
        packet: &mut DataPacket,
        from: Option<HypercubeAddress>,
        reverse_entry: Option<EntryId>,
    ) -> Result<HypercubeAddress, SimError> {
        let dest = packet.dst.clone();

        let entries = self.routing.table.entries_for(&dest);
        let entry_id = if entries.is_empty() {
            self.table_add(sim, Entry::unknown(dest.clone()))?
        } else {
            let mut best = entries[0];
            let mut min_dist = i64::from(MAX_TTL) + 1;
            for id in &entries {
                if let Some(entry) = self.routing.table.get(*id) {
                    if entry.distance < min_dist {
                        best = *id;
                        min_dist = entry.distance;
                    }
                }
            }
            best
        };

        if let Some(rev) = reverse_entry {
            self.routing.table.insert_pair(packet.src.clone(), packet.dst.clone(), (rev, entry_id));
        }

        // Arm the bitmap-clear timer when the bitmap starts filling.
        let was_empty = self.routing.table.get(entry_id).is_some_and(|e| e.visited.count() == 0);
        if was_empty {
            self.table_arm_timer(sim, TimerKind::ClearBitmap, entry_id);
        }

        if let Some(from_addr) = &from {
            if let Some(i) = self.routing.mapping.find_index(from_addr) {
                if let Some(entry) = self.routing.table.get_mut(entry_id) {
                    entry.visited.set(i);
                }
            }
        }

        let visited = self.routing.table.get(entry_id).map(|e| e.visited.clone()).unwrap_or_default();
        let all_visited = (0..self.routing.mapping.len())
            .all(|i| !self.routing.mapping.is_available(i) || visited.get(i));

        if all_visited {
            // This node is the dead end for the flow.
            let mut next_hop = HypercubeAddress::empty();
            if let Some((rev, _)) = self.routing.table.pair(&packet.src, &packet.dst) {
                packet.set_returned(true);
                packet.ttl += 1;
                next_hop = self.routing.table.get(rev).map(|e| e.next_hop.clone()).unwrap_or_default();
            }
            for id in self.routing.table.entries_for(&dest) {
                if let Some(entry) = self.routing.table.get_mut(id) {
                    entry.next_hop = next_hop.clone();
                }
            }
            return Ok(next_hop);
        }

        let mapping = &self.routing.mapping;
        let mut next_index = None;

        if visited.count() as u32 <= sim.params.neighbours_before_parent {
            // Greedy choice: closest to the destination, ties to the
            // smaller mask.
            let mut best_dist = u32::MAX;
            let mut best_mask = u16::MAX;
            for i in 0..mapping.len() {
                if visited.get(i) || !mapping.is_available(i) {
                    continue;
                }
                let addr = mapping.address(i);
                let d = if packet.rendez_vous() {
                    addr.distance_with_mask(&dest)
                } else {
                    addr.address().distance(&dest)
                };
                if d < best_dist || (d == best_dist && addr.mask() < best_mask) {
                    next_index = Some(i);
                    best_dist = d;
                    best_mask = addr.mask();
                }
            }
        } else if !visited.get(0) && !mapping.is_empty() && mapping.is_available(0) {
            next_index = Some(0);
        } else {
            next_index = (0..mapping.len()).find(|&i| !visited.get(i) && mapping.is_available(i));
        }

        let index = next_index
            .ok_or_else(|| SimError::protocol("expected to find a next hop for backtracking"))?;
        let next = self.routing.mapping.address(index).address().clone();

        if let Some(entry) = self.routing.table.get_mut(entry_id) {
            entry.next_hop = next.clone();
            entry.visited.set(index);
        }
        packet.ttl = packet.ttl.saturating_sub(1);
        Ok(next)
    }

    /// Whether this node is the packet's final destination. Rendez-vous
    /// traffic is accepted by the whole managed space, not just the
    /// primary address.
    pub(crate) fn has_arrived(&self, packet: &DataPacket) -> bool {
        if packet.rendez_vous() {
            self.control
                .addresses
                .iter()
                .any(|a| a.bit_len() == packet.dst.bit_len() && a.covers(&packet.dst))
        } else {
            self.is_connected() && *self.primary_address().address() == packet.dst
        }
    }

    /// Entry point for segments coming down from the transport layer.
    pub(crate) fn routing_send(
        &mut self,
        sim: &mut Simulator,
        dest: HypercubeAddress,
        segment: UdpSegment,
    ) -> Result<(), SimError> {
        if !self.is_connected() || dest.is_empty() {
            // A root node has no parent to hand anything to.
            return Ok(());
        }

        let src_port = segment.src_port;
        let dst_port = segment.dst_port;
        let mut packet = DataPacket::new(
            self.primary_address().address().clone(),
            dest,
            cubenet_wire::TRANSPORT_UDP,
            segment.encode(),
        );
        sim.notify_node("node.sent.hcpacket.data", Some(data_packet_query(&packet)), self.name.as_str())?;

        if src_port == TRACE_ROUTE_PORT {
            packet.set_trace_route(true);
        }
        if dst_port == RV_SERVER_PORT {
            packet.set_rendez_vous(true);
        }

        if self.has_arrived(&packet) {
            return self.transport_receive(sim, packet);
        }

        let next_hop = self.route_packet(sim, &mut packet, None)?;
        self.send_to_route(sim, next_hop, packet)
    }

    /// Entry point for data frames coming up from the data link layer.
    pub(crate) fn receive_data_frame(
        &mut self,
        sim: &mut Simulator,
        from_mac: cubenet_addr::MacAddress,
        payload: &[u8],
    ) -> Result<(), SimError> {
        if !self.is_connected() {
            return Ok(());
        }
        let mut packet = DataPacket::decode(payload)?;

        if packet.ttl == 0 {
            return sim.notify_node("packet.discarded", Some(data_packet_query(&packet)), self.name.as_str());
        }
        sim.notify_node("node.received.hcpacket.data", Some(data_packet_query(&packet)), self.name.as_str())?;

        let from = self
            .control
            .neighbours
            .get(&from_mac)
            .map(|n| n.primary.address().clone())
            .ok_or_else(|| {
                SimError::protocol(format!(
                    "physical address not in neighbour table: {from_mac} in node {}",
                    self.name
                ))
            })?;

        if self.has_arrived(&packet) {
            if packet.trace_route() {
                self.notify_trace_route(sim, &packet, true)?;
            }
            self.transport_receive(sim, packet)
        } else {
            let next_hop = self.route_packet(sim, &mut packet, Some(from))?;
            self.send_to_route(sim, next_hop, packet)
        }
    }

    /// Hand the packet to the neighbour owning the chosen next hop, or
    /// report that no route exists.
    pub(crate) fn send_to_route(
        &mut self,
        sim: &mut Simulator,
        next_hop: HypercubeAddress,
        mut packet: DataPacket,
    ) -> Result<(), SimError> {
        if next_hop.is_empty() {
            if packet.trace_route() {
                self.notify_trace_route(sim, &packet, false)?;
            }
            let mut qr = QueryResult::new("route");
            qr.insert("source", packet.src.to_string());
            qr.insert("destination", packet.dst.to_string());
            return sim.notify("node.routing.no_route", Some(qr));
        }

        if packet.trace_route() {
            packet.add_route_header(RouteHeader::new(next_hop.clone(), packet.returned()));
        }

        let mac = self
            .control
            .neighbours
            .values()
            .find(|n| n.primary.address() == &next_hop)
            .map(|n| n.mac);
        match mac {
            Some(mac) => self.send_frame(sim, mac, ETHERNET_DATA, packet.encode()),
            None => Err(SimError::protocol(format!("routing returned an unknown address: {next_hop}"))),
        }
    }

    /// Report a completed (or failed) trace, and verify route asserts.
    pub(crate) fn notify_trace_route(
        &self,
        sim: &mut Simulator,
        packet: &DataPacket,
        has_route: bool,
    ) -> Result<(), SimError> {
        let segment = UdpSegment::decode(&packet.payload)?;
        let data = String::from_utf8_lossy(&segment.payload).into_owned();

        let mut qr = QueryResult::with_id("TraceRoute", &data);
        if has_route {
            qr.insert("distance", packet.route.len().to_string());
        } else {
            qr.insert("noRoute", "true");
        }

        let mut names = Vec::new();
        for hop in &packet.route {
            let name = sim
                .network
                .find_by_primary(&hop.address, Some(self))
                .map_or_else(|| "UNKNOWN".to_string(), |n| n.name.to_string());
            let mut hop_qr = QueryResult::new("hop");
            hop_qr.insert("node", hop.address.to_string());
            hop_qr.insert("nodeName", name.clone());
            if hop.returned {
                hop_qr.insert("returned", "true");
            }
            qr.insert_multi(hop_qr);
            names.push(name);
        }
        sim.notify("node.routing.trace", Some(qr))?;

        if data.starts_with("Assert") {
            if let Some(pos) = data.find("=(") {
                let expected = &data[pos + 1..];
                let got =
                    if has_route { format!("({})", names.join(";")) } else { "()".to_string() };
                if expected != got {
                    return Err(SimError::scenario(format!(
                        "route assert failed. Expected {expected}, got {got}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The routing layer state carried by each node.
#[derive(Debug, Default)]
pub struct RoutingState {
    pub mapping: NeighbourMapping,
    pub table: RoutingTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(addr: &str, m: u16) -> HypercubeMaskAddress {
        HypercubeMaskAddress::new(addr.parse().unwrap(), m)
    }

    #[test]
    fn mapping_parent_is_index_zero() {
        let mut mapping = NeighbourMapping::default();
        mapping.add(mask("0100", 2));
        mapping.set_parent(mask("1000", 1));
        assert_eq!(mapping.address(0), &mask("1000", 1));
        let mut fresh = NeighbourMapping::default();
        fresh.set_parent(mask("1000", 1));
        fresh.add(mask("0100", 2));
        assert_eq!(fresh.address(0), &mask("1000", 1));
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn mapping_find_ignores_mask() {
        let mut mapping = NeighbourMapping::default();
        mapping.add(mask("0100", 2));
        assert_eq!(mapping.find_index(&"0100".parse().unwrap()), Some(0));
        assert_eq!(mapping.find_index(&"0111".parse().unwrap()), None);
    }

    #[test]
    fn bitmap_grows_and_clears() {
        let mut bitmap = VisitedBitmap::default();
        assert!(!bitmap.get(3));
        bitmap.set(3);
        assert!(bitmap.get(3));
        assert_eq!(bitmap.count(), 1);
        assert_eq!(bitmap.render(), "0001");
        bitmap.clear();
        assert_eq!(bitmap.count(), 0);
    }

    #[test]
    fn table_multimap_and_pairs() {
        let mut table = RoutingTable::default();
        let dest: HypercubeAddress = "0100".parse().unwrap();
        let id_a = 0;
        table.entries.insert(id_a, Entry::unknown(dest.clone()));
        table.order.push(id_a);
        table.next_id = 1;
        let id_b = 1;
        table.entries.insert(id_b, Entry::known(dest.clone(), "1000".parse().unwrap(), 3));
        table.order.push(id_b);

        assert_eq!(table.entries_for(&dest), vec![id_a, id_b]);
        let src: HypercubeAddress = "0010".parse().unwrap();
        table.insert_pair(src.clone(), dest.clone(), (id_a, id_b));
        assert_eq!(table.pair(&src, &dest), Some((id_a, id_b)));

        table.remove_entry(id_b);
        assert_eq!(table.entries_for(&dest), vec![id_a]);
        assert_eq!(table.pair(&src, &dest), None);
    }
}
