//! Per-node membership state machine
//!
//! Type-safe state machine for a node's wireless role using the state-machines
//! crate. The registry stays authoritative; the machine rejects transitions the
//! membership logic should never attempt (e.g. joining twice without leaving).

use state_machines::state_machine;

state_machine! {
    name: MembershipMachine,
    dynamic: true,
    initial: Unaffiliated,
    states: [Unaffiliated, Hosting, Associated, Peering],
    events {
        host {
            transition: { from: Unaffiliated, to: Hosting }
        }
        associate {
            transition: { from: Unaffiliated, to: Associated }
        }
        peer {
            transition: { from: Unaffiliated, to: Peering }
        }
        release {
            transition: { from: [Hosting, Associated, Peering], to: Unaffiliated }
        }
    }
}

/// Simple state enum for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unaffiliated,
    AccessPoint,
    BssStation,
    IbssStation,
}

impl NodeState {
    /// Parse state from the machine's state name
    pub fn from_machine(s: &str) -> Self {
        match s {
            "Hosting" => NodeState::AccessPoint,
            "Associated" => NodeState::BssStation,
            "Peering" => NodeState::IbssStation,
            _ => NodeState::Unaffiliated,
        }
    }
}

/// Membership lifecycle of one node
pub struct NodeLifecycle {
    machine: DynamicMembershipMachine<()>,
}

impl NodeLifecycle {
    pub fn new() -> Self {
        Self {
            machine: MembershipMachine::new(()).into_dynamic(),
        }
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_machine(self.machine.current_state())
    }

    pub fn host(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(MembershipMachineEvent::Host)
    }

    pub fn associate(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(MembershipMachineEvent::Associate)
    }

    pub fn peer(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(MembershipMachineEvent::Peer)
    }

    pub fn release(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(MembershipMachineEvent::Release)
    }
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
