//! The heard-bit listener machine: ListenHB <-> WaitSAN. It ages
//! neighbours, discovers adjacencies and levels the address space by
//! offering secondary addresses.

use cubenet_addr::MacAddress;
use cubenet_wire::{AdditionalAddress, ControlPacket};

use crate::event::TimeoutTarget;
use crate::machines::{arm_timeout, take_armed, HblState};
use crate::message::Message;
use crate::neighbour::{Neighbour, NeighbourRole};
use crate::node::Node;
use crate::simulator::Simulator;
use crate::SimError;

impl Node {
    pub(crate) fn hbl_on_packet(
        &mut self,
        sim: &mut Simulator,
        packet: &ControlPacket,
    ) -> Result<(), SimError> {
        let Some(hbl_sm) = &self.control.hbl_sm else {
            return Ok(());
        };
        match (hbl_sm.state, packet) {
            (HblState::ListenHb, ControlPacket::Hb { header }) => {
                let mac = header.mac;
                let primary = header.primary.clone();
                match self.control.neighbours.get_mut(&mac) {
                    Some(neighbour) => {
                        neighbour.active = true;
                        neighbour.last_seen = sim.now();
                        if neighbour.primary.mask() != primary.mask() {
                            neighbour.primary = primary.clone();
                            sim.put_message(self.id, Message::RouteChangedMask { route: primary });
                        }
                    }
                    None => {
                        self.control.neighbours.insert(mac, Neighbour::new(primary, mac));
                    }
                }
                Ok(())
            }
            (HblState::WaitSan, ControlPacket::San { header, accepted, proposed }) => {
                let mac = header.mac;
                let sender_primary = header.primary.clone();
                self.hbl_on_san(sim, mac, sender_primary, *accepted, proposed.clone())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn hbl_on_timeout(&mut self, sim: &mut Simulator, id: u64) -> Result<(), SimError> {
        let Some(hbl_sm) = &mut self.control.hbl_sm else {
            return Ok(());
        };
        if !take_armed(&mut hbl_sm.armed, id) {
            return Ok(());
        }
        match hbl_sm.state {
            HblState::ListenHb => self.hbl_listen_timeout(sim),
            HblState::WaitSan => self.hbl_transition(sim, HblState::ListenHb),
        }
    }

    /// The listening window closed: age silent neighbours, promote new
    /// adjacencies, and maybe offer one secondary address.
    fn hbl_listen_timeout(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        let addr = self.primary_address();
        let macs: Vec<MacAddress> = self.control.neighbours.keys().copied().collect();

        for mac in macs {
            let Some(n) = self.control.neighbours.get(&mac) else {
                continue;
            };
            let role = n.role;
            let active = n.active;
            let neigh_primary = n.primary.clone();
            let already_proposed = n.proposed_secondary;

            // Silent neighbours disappear from the topology.
            if role != NeighbourRole::NotConnected && !active {
                if let Some(n) = self.control.neighbours.get_mut(&mac) {
                    n.role = NeighbourRole::Disappeared;
                }
                sim.put_message(self.id, Message::LostRoute { route: neigh_primary.clone() });
                continue;
            }

            // A stranger at Hamming distance 1 is a new adjacency.
            if role == NeighbourRole::NotConnected
                && neigh_primary.bit_len() == addr.bit_len()
                && addr.address().distance(neigh_primary.address()) == 1
            {
                if let Some(n) = self.control.neighbours.get_mut(&mac) {
                    n.role = NeighbourRole::Adjacent;
                }
                sim.put_message(self.id, Message::NewRoute { route: neigh_primary.clone() });
                let hb = self.make_hb_packet();
                self.send_control(sim, MacAddress::BROADCAST, &hb)?;
                continue;
            }

            // A stranger differing only inside our masked prefix can be
            // given a secondary address that makes it adjacent.
            if role == NeighbourRole::NotConnected
                && !already_proposed
                && addr.mask() < addr.bit_len()
                && !self.control.pap_sm.as_ref().map_or(true, |sm| sm.is_proposing())
                && addr.distance_with_mask(neigh_primary.address()) == 1
            {
                // The proposal mask: the first position past our mask
                // where the candidate carries a 1-bit.
                let mut mask_sa = addr.mask() + 1;
                while mask_sa < neigh_primary.bit_len() {
                    if neigh_primary.bit(mask_sa - 1) {
                        break;
                    }
                    mask_sa += 1;
                }

                let mut propose = addr.address().clone();
                propose.set_bit(mask_sa - 1, true);

                if let Some(n) = self.control.neighbours.get_mut(&mac) {
                    n.proposed_secondary = true;
                }
                let sap = ControlPacket::Sap {
                    header: self.control_header(),
                    proposed: AdditionalAddress::proposal(propose, mask_sa as u8, 0),
                };
                self.send_control(sim, mac, &sap)?;
                return self.hbl_transition(sim, HblState::WaitSan);
            }
        }

        self.hbl_transition(sim, HblState::ListenHb)
    }

    /// The proposed secondary came back; on acceptance take over the
    /// delegated space and fill the holes it leaves.
    fn hbl_on_san(
        &mut self,
        sim: &mut Simulator,
        mac: MacAddress,
        sender_primary: cubenet_addr::HypercubeMaskAddress,
        accepted: bool,
        proposed: AdditionalAddress,
    ) -> Result<(), SimError> {
        if !accepted {
            return self.hbl_transition(sim, HblState::ListenHb);
        }

        let sec_addr = proposed.mask_address();
        let mut addr = self.primary_address();

        match self.control.neighbours.get_mut(&mac) {
            Some(neighbour) => {
                neighbour.role = NeighbourRole::Adjacent;
                let route = neighbour.primary.clone();
                sim.put_message(self.id, Message::NewRoute { route });
                let hb = self.make_hb_packet();
                self.send_control(sim, MacAddress::BROADCAST, &hb)?;
            }
            None => {
                // The neighbour vanished while we were proposing.
                return self.hbl_transition(sim, HblState::ListenHb);
            }
        }

        if self.control.addresses.iter().skip(1).any(|a| a.contains(&sec_addr)) {
            return self.hbl_transition(sim, HblState::ListenHb);
        }

        // The mask may have moved past the proposal while the SAN was in
        // flight; the delegation is stale then.
        let Some(bits) = sec_addr.mask().checked_sub(addr.mask()).filter(|b| *b > 0) else {
            return self.hbl_transition(sim, HblState::ListenHb);
        };

        self.add_secondary_address(sim, sec_addr.clone())?;

        // Cover every other combination of the newly delegated bits so
        // the node's space stays gap-free.
        addr.set_mask(sec_addr.mask());
        for i in 2u32..(1 << bits) {
            let mut filler = addr.clone();
            for j in 0..bits {
                filler.set_bit(sec_addr.mask() - j - 1, i & (1 << j) != 0);
            }
            self.add_secondary_address(sim, filler)?;
        }

        self.set_primary_address(sim, addr)?;

        sim.put_message(
            self.id,
            Message::AddressGiven {
                given: cubenet_addr::HypercubeMaskAddress::new(
                    sender_primary.address().clone(),
                    sec_addr.mask(),
                ),
                recipient: sec_addr.address().clone(),
            },
        );

        self.hbl_transition(sim, HblState::ListenHb)
    }

    pub(crate) fn hbl_transition(&mut self, sim: &mut Simulator, next: HblState) -> Result<(), SimError> {
        let Some(hbl_sm) = &mut self.control.hbl_sm else {
            return Ok(());
        };
        let leaving = hbl_sm.state.name();
        hbl_sm.armed.clear();
        sim.notify_node(&format!("node.statemachine.hbl.{leaving}.exit"), None, self.name.as_str())?;

        if let Some(hbl_sm) = &mut self.control.hbl_sm {
            hbl_sm.state = next;
        }
        self.hbl_enter_current(sim)?;
        sim.notify_node(&format!("node.statemachine.hbl.{}.enter", next.name()), None, self.name.as_str())
    }

    /// Entry actions for the current HBL state; also run when the machine
    /// is created on connection.
    pub(crate) fn hbl_enter_current(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        let Some(hbl_sm) = &self.control.hbl_sm else {
            return Ok(());
        };
        match hbl_sm.state {
            HblState::ListenHb => {
                for neighbour in self.control.neighbours.values_mut() {
                    neighbour.active = false;
                }
                let delay = sim.params.listen_hb_timeout;
                if let Some(hbl_sm) = &mut self.control.hbl_sm {
                    arm_timeout(sim, TimeoutTarget::HblSm(self.id), delay, &mut hbl_sm.armed);
                }
            }
            HblState::WaitSan => {
                let delay = sim.params.wait_san_timeout;
                if let Some(hbl_sm) = &mut self.control.hbl_sm {
                    arm_timeout(sim, TimeoutTarget::HblSm(self.id), delay, &mut hbl_sm.armed);
                }
            }
        }
        Ok(())
    }
}
