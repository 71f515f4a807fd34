//! The main state machine: Disconnected -> WaitPAP -> WaitPANC ->
//! StableAddress -> WaitWaitMe -> WaitReadyForDisc -> Disconnected.

use cubenet_addr::{HypercubeAddress, HypercubeMaskAddress, MacAddress};
use cubenet_wire::ControlPacket;

use crate::event::TimeoutTarget;
use crate::machines::{arm_timeout, take_armed, MainState, PapResponse};
use crate::message::Message;
use crate::neighbour::{Neighbour, NeighbourRole};
use crate::node::Node;
use crate::simulator::Simulator;
use crate::SimError;

impl Node {
    pub(crate) fn main_on_message(
        &mut self,
        sim: &mut Simulator,
        msg: &Message,
    ) -> Result<(), SimError> {
        match (&self.control.main_sm.state, msg) {
            (MainState::Disconnected, Message::JoinNetwork) => {
                let retries = sim.params.wait_pap_retries;
                self.main_transition(sim, MainState::WaitPap { retries, responses: Vec::new() })
            }
            (MainState::StableAddress, Message::LeaveNetwork) => {
                self.main_transition(sim, MainState::WaitWaitMe)
            }
            (MainState::WaitWaitMe, Message::WaitMe { port }) => {
                self.control.main_sm.pending_disc.insert(*port);
                Ok(())
            }
            (MainState::WaitWaitMe, Message::ReadyForDisc { port }) => {
                // Some subsystems answer before the window even closes.
                self.control.main_sm.pending_disc.remove(port);
                Ok(())
            }
            (MainState::WaitReadyForDisc, Message::ReadyForDisc { port }) => {
                self.control.main_sm.pending_disc.remove(port);
                if self.control.main_sm.pending_disc.is_empty() {
                    self.main_transition(sim, MainState::Disconnected)
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn main_on_timeout(&mut self, sim: &mut Simulator, id: u64) -> Result<(), SimError> {
        if !take_armed(&mut self.control.main_sm.armed, id) {
            return Ok(());
        }
        match &self.control.main_sm.state {
            MainState::WaitPap { .. } => self.main_wait_pap_timeout(sim),
            MainState::WaitPanc => {
                let retries = sim.params.wait_pap_retries;
                self.main_transition(sim, MainState::WaitPap { retries, responses: Vec::new() })
            }
            MainState::StableAddress => {
                if !self.control.hb_enabled {
                    return Ok(());
                }
                let hb = self.make_hb_packet();
                self.send_control(sim, MacAddress::BROADCAST, &hb)?;
                self.main_transition(sim, MainState::StableAddress)
            }
            MainState::WaitWaitMe => self.main_transition(sim, MainState::WaitReadyForDisc),
            _ => Ok(()),
        }
    }

    pub(crate) fn main_on_packet(
        &mut self,
        sim: &mut Simulator,
        packet: &ControlPacket,
    ) -> Result<(), SimError> {
        match packet {
            ControlPacket::Pap { header, proposed, reconnect } => {
                if let MainState::WaitPap { responses, .. } = &mut self.control.main_sm.state {
                    responses.push(PapResponse {
                        mac: header.mac,
                        primary: header.primary.clone(),
                        proposed: proposed.clone(),
                        reconnect: reconnect.clone(),
                    });
                }
                Ok(())
            }
            ControlPacket::Panc { header } => {
                if !matches!(self.control.main_sm.state, MainState::WaitPanc) {
                    return Ok(());
                }
                let parent = header.primary.clone();
                sim.put_message(
                    self.id,
                    Message::Connected { primary: self.primary_address(), parent },
                );
                self.main_transition(sim, MainState::StableAddress)
            }
            ControlPacket::Sap { header, proposed } => {
                if !matches!(self.control.main_sm.state, MainState::StableAddress) {
                    return Ok(());
                }
                self.main_stable_on_sap(sim, header.mac, proposed)
            }
            ControlPacket::Disc { header, has_child } => {
                if !matches!(self.control.main_sm.state, MainState::StableAddress) {
                    return Ok(());
                }
                self.main_stable_on_disc(sim, header.mac, header.primary.clone(), *has_child)
            }
            _ => Ok(()),
        }
    }

    /// The join window closed; decide between retrying, claiming the root
    /// address, giving up, or picking the best proposal.
    fn main_wait_pap_timeout(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        let (mut retries, responses) = match &self.control.main_sm.state {
            MainState::WaitPap { retries, responses } => (*retries, responses.clone()),
            _ => return Ok(()),
        };
        retries = retries.saturating_sub(1);

        if responses.is_empty() {
            if retries == 0 {
                // Nobody answered five times over: this is the first node,
                // claim the whole space.
                let bit_len = sim.network.address_length();
                let primary = HypercubeMaskAddress::new(HypercubeAddress::zeros(bit_len), 0);
                self.set_primary_address(sim, primary.clone())?;
                sim.put_message(
                    self.id,
                    Message::Connected { primary, parent: HypercubeMaskAddress::default() },
                );
                return self.main_transition(sim, MainState::StableAddress);
            }
            return self.main_transition(sim, MainState::WaitPap { retries, responses });
        }

        if responses.iter().all(PapResponse::exhausted) {
            if retries == 0 {
                sim.put_message(
                    self.id,
                    Message::CantConnect { reason: "Address Space Exhausted".to_string() },
                );
                sim.notify_node("node.cantConnect", None, self.name.as_str())?;
                return self.main_transition(sim, MainState::Disconnected);
            }
            return self.main_transition(sim, MainState::WaitPap { retries, responses });
        }

        // Prefer a reconnection address that would restore the most
        // adjacencies; it needs at least two adjacent responders to beat
        // a fresh primary proposal. Ties go to the shallower mask.
        let mut best_reconnect: Option<(usize, usize, u32, u16)> = None;
        for (i, response) in responses.iter().enumerate() {
            for (j, offer) in response.reconnect.iter().enumerate() {
                let adjacent = responses
                    .iter()
                    .filter(|r| r.primary.bit_len() == offer.address.bit_len())
                    .filter(|r| offer.address.distance(r.primary.address()) == 1)
                    .count() as u32;
                let mask = u16::from(offer.mask.unwrap_or(0));
                let better = match best_reconnect {
                    None => adjacent >= 2,
                    Some((_, _, best_adj, best_mask)) => {
                        adjacent > best_adj || (adjacent == best_adj && mask < best_mask)
                    }
                };
                if better {
                    best_reconnect = Some((i, j, adjacent, mask));
                }
            }
        }

        let chosen = if let Some((i, j, _, _)) = best_reconnect {
            let offer = &responses[i].reconnect[j];
            let primary = offer.mask_address();
            self.set_primary_address(sim, primary)?;
            i
        } else {
            let mut best = 0;
            let mut smallest_mask = u16::MAX;
            for (i, response) in responses.iter().enumerate() {
                if let Some(proposed) = &response.proposed {
                    let mask = u16::from(proposed.mask.unwrap_or(0));
                    if mask < smallest_mask {
                        smallest_mask = mask;
                        best = i;
                    }
                }
            }
            let primary = responses[best]
                .proposed
                .as_ref()
                .map(|p| p.mask_address())
                .ok_or_else(|| SimError::protocol("chosen PAP response carries no proposal"))?;
            self.set_primary_address(sim, primary)?;
            best
        };

        for (i, response) in responses.iter().enumerate() {
            let mut neighbour = Neighbour::new(response.primary.clone(), response.mac);
            neighbour.role =
                if i == chosen { NeighbourRole::ParentOf } else { NeighbourRole::NotConnected };
            self.control.neighbours.entry(response.mac).or_insert(neighbour);
        }

        self.main_transition(sim, MainState::WaitPanc)
    }

    fn main_stable_on_sap(
        &mut self,
        sim: &mut Simulator,
        from: MacAddress,
        proposed: &cubenet_wire::AdditionalAddress,
    ) -> Result<(), SimError> {
        let proposal = proposed.mask_address();
        let accept = proposal.prefix_distance(&self.primary_address()) == 1;

        let san = ControlPacket::San {
            header: self.control_header(),
            accepted: accept,
            proposed: proposed.clone(),
        };
        self.send_control(sim, from, &san)?;

        if accept {
            if let Some(neighbour) = self.control.neighbours.get_mut(&from) {
                neighbour.role = NeighbourRole::Adjacent;
                let route = neighbour.primary.clone();
                sim.put_message(self.id, Message::NewRoute { route });
                let hb = self.make_hb_packet();
                self.send_control(sim, MacAddress::BROADCAST, &hb)?;
            }
        }
        Ok(())
    }

    fn main_stable_on_disc(
        &mut self,
        sim: &mut Simulator,
        from: MacAddress,
        leaver_primary: HypercubeMaskAddress,
        has_child: bool,
    ) -> Result<(), SimError> {
        let Some(neighbour) = self.control.neighbours.get(&from) else {
            return Ok(());
        };
        let route = neighbour.primary.clone();
        let role = neighbour.role;
        sim.put_message(self.id, Message::LostRoute { route: route.clone() });

        // A leaving leaf child frees its half of our delegated space.
        if role == NeighbourRole::Child && !has_child {
            self.recover_address(sim, route.address().clone())?;
        }
        if let Some(neighbour) = self.control.neighbours.get_mut(&from) {
            neighbour.role = NeighbourRole::Disconnected;
        }
        self.control.reconnect.push(leaver_primary);
        Ok(())
    }

    /// Defragment after a leaf child left: mark its freed sibling bit and
    /// coalesce trailing recovered bits back into a shorter mask.
    fn recover_address(
        &mut self,
        sim: &mut Simulator,
        child: HypercubeAddress,
    ) -> Result<(), SimError> {
        let mut addr = self.primary_address();
        if addr.mask() == 0 {
            return Ok(());
        }
        let mut recovered = self.control.recovered_mask.clone();

        let bit_len = addr.bit_len();
        let mut first_diff = bit_len;
        for i in 0..bit_len.min(child.bit_len()) {
            if addr.bit(i) != child.bit(i) {
                first_diff = i;
                break;
            }
        }
        if first_diff == bit_len {
            return Ok(());
        }
        recovered.set_bit(first_diff, true);

        let mut j = i32::from(addr.mask()) - 1;
        while j >= 0 && recovered.bit(j as u16) {
            recovered.set_bit(j as u16, false);
            j -= 1;
        }

        addr.set_mask((j + 1) as u16);
        self.set_primary_address(sim, addr)?;
        self.control.recovered_mask = recovered;
        Ok(())
    }

    /// Drive the machine into `next`, running exit actions, cancelling the
    /// old state's timeouts and chaining entry actions.
    pub(crate) fn main_transition(
        &mut self,
        sim: &mut Simulator,
        next: MainState,
    ) -> Result<(), SimError> {
        let mut next = Some(next);
        while let Some(state) = next.take() {
            let leaving = self.control.main_sm.state.name();
            self.main_exit_actions(sim)?;
            sim.notify_node(
                &format!("node.statemachine.main.{leaving}.exit"),
                None,
                self.name.as_str(),
            )?;

            self.control.main_sm.state = state;
            next = self.main_entry_actions(sim)?;
            sim.notify_node(
                &format!("node.statemachine.main.{}.enter", self.control.main_sm.state.name()),
                None,
                self.name.as_str(),
            )?;
        }
        Ok(())
    }

    fn main_exit_actions(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.control.main_sm.armed.clear();
        if matches!(self.control.main_sm.state, MainState::WaitReadyForDisc) {
            let disc = ControlPacket::Disc {
                header: self.control_header(),
                has_child: self.has_child(),
            };
            self.send_control(sim, MacAddress::BROADCAST, &disc)?;
            sim.put_message(self.id, Message::Disconnected);
        }
        Ok(())
    }

    /// Entry actions; returning a state chains straight into it.
    fn main_entry_actions(&mut self, sim: &mut Simulator) -> Result<Option<MainState>, SimError> {
        match &self.control.main_sm.state {
            MainState::Disconnected => Ok(None),
            MainState::WaitPap { .. } => {
                let par = ControlPacket::Par { header: self.control_header() };
                self.send_control(sim, MacAddress::BROADCAST, &par)?;
                let delay = sim.params.wait_pap_timeout;
                arm_timeout(sim, TimeoutTarget::MainSm(self.id), delay, &mut self.control.main_sm.armed);
                Ok(None)
            }
            MainState::WaitPanc => {
                let pan = ControlPacket::Pan { header: self.control_header() };
                self.send_control(sim, MacAddress::BROADCAST, &pan)?;
                let delay = sim.params.wait_panc_timeout;
                arm_timeout(sim, TimeoutTarget::MainSm(self.id), delay, &mut self.control.main_sm.armed);
                Ok(None)
            }
            MainState::StableAddress => {
                let delay = sim.params.heard_bit_period;
                arm_timeout(sim, TimeoutTarget::MainSm(self.id), delay, &mut self.control.main_sm.armed);
                Ok(None)
            }
            MainState::WaitWaitMe => {
                sim.put_message(self.id, Message::WillDisconnect);
                let delay = sim.params.wait_waitme_timeout;
                arm_timeout(sim, TimeoutTarget::MainSm(self.id), delay, &mut self.control.main_sm.armed);
                Ok(None)
            }
            MainState::WaitReadyForDisc => {
                if self.control.main_sm.pending_disc.is_empty() {
                    Ok(Some(MainState::Disconnected))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Re-arm the heart-bit timer after heart-bits were switched back on.
    pub(crate) fn main_restart_heard_bit(&mut self, sim: &mut Simulator) {
        if matches!(self.control.main_sm.state, MainState::StableAddress) {
            let delay = sim.params.heard_bit_period;
            arm_timeout(sim, TimeoutTarget::MainSm(self.id), delay, &mut self.control.main_sm.armed);
        }
    }
}
