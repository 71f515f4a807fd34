//! The primary address provider machine: WaitPAR <-> WaitPAN.

use cubenet_wire::{AdditionalAddress, ControlPacket};

use crate::event::TimeoutTarget;
use crate::machines::{arm_timeout, take_armed, PapState};
use crate::message::Message;
use crate::neighbour::{Neighbour, NeighbourRole};
use crate::node::Node;
use crate::simulator::Simulator;
use crate::SimError;

impl Node {
    pub(crate) fn pap_on_packet(
        &mut self,
        sim: &mut Simulator,
        packet: &ControlPacket,
    ) -> Result<(), SimError> {
        let Some(pap_sm) = &self.control.pap_sm else {
            return Ok(());
        };
        match (pap_sm.state, packet) {
            (PapState::WaitPar, ControlPacket::Par { header }) => {
                let requester = header.mac;
                self.pap_propose(sim, requester)
            }
            (PapState::WaitPan, ControlPacket::Pan { header }) => {
                let mac = header.mac;
                let chosen = header.primary.clone();
                self.pap_on_pan(sim, mac, chosen)
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn pap_on_timeout(&mut self, sim: &mut Simulator, id: u64) -> Result<(), SimError> {
        let Some(pap_sm) = &mut self.control.pap_sm else {
            return Ok(());
        };
        if !take_armed(&mut pap_sm.armed, id) {
            return Ok(());
        }
        if pap_sm.state == PapState::WaitPan {
            self.pap_transition(sim, PapState::WaitPar)?;
        }
        Ok(())
    }

    /// Answer a PAR: propose one bit deeper into our own sub-cube, plus
    /// any cached reconnection addresses.
    fn pap_propose(&mut self, sim: &mut Simulator, requester: cubenet_addr::MacAddress) -> Result<(), SimError> {
        // While a secondary address offer is in flight the same space must
        // not be promised twice.
        if self.control.hbl_sm.as_ref().is_some_and(|sm| sm.is_proposing()) {
            return Ok(());
        }

        let primary = self.primary_address();
        let reply = if primary.mask() == primary.bit_len() {
            if let Some(pap_sm) = &mut self.control.pap_sm {
                pap_sm.proposed.clear();
            }
            ControlPacket::Pap { header: self.control_header(), proposed: None, reconnect: Vec::new() }
        } else {
            let mut propose = primary.address().clone();
            propose.flip_bit(primary.mask());
            let proposed = AdditionalAddress::proposal(propose.clone(), primary.mask() as u8 + 1, 0);

            let reconnect: Vec<AdditionalAddress> = self
                .control
                .reconnect
                .iter()
                .map(|r| AdditionalAddress::with_mask(r.address().clone(), r.mask() as u8))
                .collect();

            if let Some(pap_sm) = &mut self.control.pap_sm {
                pap_sm.proposed.clear();
                pap_sm.proposed.push(cubenet_addr::HypercubeMaskAddress::new(
                    propose,
                    primary.mask() + 1,
                ));
                pap_sm.proposed.extend(self.control.reconnect.iter().cloned());
            }

            ControlPacket::Pap { header: self.control_header(), proposed: Some(proposed), reconnect }
        };

        self.send_control(sim, requester, &reply)?;
        self.pap_transition(sim, PapState::WaitPan)
    }

    /// A joiner announced its choice; if it took one of our proposals,
    /// confirm it and delegate the space.
    fn pap_on_pan(
        &mut self,
        sim: &mut Simulator,
        mac: cubenet_addr::MacAddress,
        chosen: cubenet_addr::HypercubeMaskAddress,
    ) -> Result<(), SimError> {
        let matched = self
            .control
            .pap_sm
            .as_ref()
            .and_then(|sm| sm.proposed.iter().position(|p| p.address() == chosen.address()));

        let Some(index) = matched else {
            return self.pap_transition(sim, PapState::WaitPar);
        };
        let accepted = self
            .control
            .pap_sm
            .as_ref()
            .map(|sm| sm.proposed[index].clone())
            .ok_or_else(|| SimError::protocol("PAP machine vanished mid-proposal"))?;

        if index == 0 {
            let panc = ControlPacket::Panc { header: self.control_header() };
            self.send_control(sim, mac, &panc)?;

            let mut neighbour = Neighbour::new(accepted.clone(), mac);
            neighbour.role = NeighbourRole::Child;
            self.control.neighbours.entry(mac).or_insert(neighbour);

            sim.put_message(self.id, Message::NewRoute { route: accepted.clone() });

            // Extend our own mask by one: the other half now belongs to
            // the new child.
            let mut primary = self.primary_address();
            primary.set_mask(primary.mask() + 1);
            self.set_primary_address(sim, primary)?;

            sim.put_message(
                self.id,
                Message::AddressGiven { given: accepted, recipient: chosen.address().clone() },
            );
        } else if self.erase_reconnect(accepted.address()) {
            let panc = ControlPacket::Panc { header: self.control_header() };
            self.send_control(sim, mac, &panc)?;

            let mut neighbour = Neighbour::new(chosen, mac);
            neighbour.role = NeighbourRole::Child;
            self.control.neighbours.entry(mac).or_insert(neighbour);

            sim.put_message(self.id, Message::NewRoute { route: accepted });
        }

        self.pap_transition(sim, PapState::WaitPar)
    }

    pub(crate) fn pap_transition(&mut self, sim: &mut Simulator, next: PapState) -> Result<(), SimError> {
        let Some(pap_sm) = &mut self.control.pap_sm else {
            return Ok(());
        };
        let leaving = pap_sm.state.name();
        pap_sm.armed.clear();
        sim.notify_node(&format!("node.statemachine.pap.{leaving}.exit"), None, self.name.as_str())?;

        if let Some(pap_sm) = &mut self.control.pap_sm {
            pap_sm.state = next;
            if next == PapState::WaitPan {
                let delay = sim.params.wait_pan_timeout;
                arm_timeout(sim, TimeoutTarget::PapSm(self.id), delay, &mut pap_sm.armed);
            }
        }
        sim.notify_node(&format!("node.statemachine.pap.{}.enter", next.name()), None, self.name.as_str())
    }
}
