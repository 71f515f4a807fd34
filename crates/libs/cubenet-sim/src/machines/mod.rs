//! The three per-node control state machines: Main (join/leave lifecycle),
//! PAP (primary address provider) and HBL (heard-bit listener).
//!
//! States are plain enums; transitions run exit actions, cancel the
//! leaving state's timeouts, emit `node.statemachine.*` notifications and
//! run entry actions, which may chain into a further transition.

mod hbl_sm;
mod main_sm;
mod pap_sm;

use std::collections::BTreeSet;

use cubenet_addr::{HypercubeMaskAddress, MacAddress};
use cubenet_units::Time;
use cubenet_wire::AdditionalAddress;

use crate::event::TimeoutTarget;
use crate::simulator::Simulator;

/// One buffered PAP reply, kept until the join window closes.
#[derive(Debug, Clone)]
pub struct PapResponse {
    pub mac: MacAddress,
    pub primary: HypercubeMaskAddress,
    pub proposed: Option<AdditionalAddress>,
    pub reconnect: Vec<AdditionalAddress>,
}

impl PapResponse {
    pub fn exhausted(&self) -> bool {
        self.proposed.is_none()
    }
}

/// States of the main (join/leave) machine.
#[derive(Debug, Clone)]
pub enum MainState {
    Disconnected,
    WaitPap { retries: u32, responses: Vec<PapResponse> },
    WaitPanc,
    StableAddress,
    WaitWaitMe,
    WaitReadyForDisc,
}

impl MainState {
    pub fn name(&self) -> &'static str {
        match self {
            MainState::Disconnected => "disconnected",
            MainState::WaitPap { .. } => "waitpap",
            MainState::WaitPanc => "waitpanc",
            MainState::StableAddress => "stableaddress",
            MainState::WaitWaitMe => "waitwaitme",
            MainState::WaitReadyForDisc => "waitreadyfordisc",
        }
    }
}

/// The main state machine data: its state, the set of subsystem ports the
/// disconnect handshake still waits for, and the timeouts armed by the
/// current state.
#[derive(Debug)]
pub struct MainSm {
    pub state: MainState,
    pub pending_disc: BTreeSet<u16>,
    pub armed: Vec<u64>,
}

impl Default for MainSm {
    fn default() -> Self {
        MainSm { state: MainState::Disconnected, pending_disc: BTreeSet::new(), armed: Vec::new() }
    }
}

/// States of the primary address provider machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapState {
    WaitPar,
    WaitPan,
}

impl PapState {
    pub fn name(self) -> &'static str {
        match self {
            PapState::WaitPar => "waitpar",
            PapState::WaitPan => "waitpan",
        }
    }
}

/// The PAP machine remembers the addresses it proposed so a later PAN can
/// be matched against them; index 0 is the primary proposal, the rest are
/// reconnection offers.
#[derive(Debug)]
pub struct PapSm {
    pub state: PapState,
    pub proposed: Vec<HypercubeMaskAddress>,
    pub armed: Vec<u64>,
}

impl Default for PapSm {
    fn default() -> Self {
        PapSm { state: PapState::WaitPar, proposed: Vec::new(), armed: Vec::new() }
    }
}

impl PapSm {
    pub fn is_proposing(&self) -> bool {
        self.state == PapState::WaitPan
    }
}

/// States of the heard-bit listener machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HblState {
    ListenHb,
    WaitSan,
}

impl HblState {
    pub fn name(self) -> &'static str {
        match self {
            HblState::ListenHb => "listenhb",
            HblState::WaitSan => "waitsan",
        }
    }
}

#[derive(Debug)]
pub struct HblSm {
    pub state: HblState,
    pub armed: Vec<u64>,
}

impl Default for HblSm {
    fn default() -> Self {
        HblSm { state: HblState::ListenHb, armed: Vec::new() }
    }
}

impl HblSm {
    pub fn is_proposing(&self) -> bool {
        self.state == HblState::WaitSan
    }
}

/// Arm a timeout and record it with the current state so a later
/// transition can cancel it. A fired id missing from `armed` is treated
/// as cancelled.
pub(crate) fn arm_timeout(
    sim: &mut Simulator,
    target: TimeoutTarget,
    delay: Time,
    armed: &mut Vec<u64>,
) {
    let id = sim.schedule_timeout(target, delay);
    armed.push(id);
}

/// Consume a fired timeout id; returns false when it had been cancelled.
pub(crate) fn take_armed(armed: &mut Vec<u64>, id: u64) -> bool {
    match armed.iter().position(|&t| t == id) {
        Some(pos) => {
            armed.remove(pos);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_armed_is_idempotent() {
        let mut armed = vec![3, 7];
        assert!(take_armed(&mut armed, 7));
        assert!(!take_armed(&mut armed, 7));
        assert!(take_armed(&mut armed, 3));
        assert!(armed.is_empty());
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(MainState::WaitPap { retries: 5, responses: vec![] }.name(), "waitpap");
        assert_eq!(PapState::WaitPan.name(), "waitpan");
        assert_eq!(HblState::ListenHb.name(), "listenhb");
    }
}
