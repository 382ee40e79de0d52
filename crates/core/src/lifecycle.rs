//! Worker lifecycle state machine.
//!
//! A manager moves through `parsed → installing → installed → activating →
//! activated`. Install and activate can fail, in which case the manager falls
//! back to the state it came from so the host can retry. A manager replaced by
//! a newer version becomes `redundant` and never leaves that state.
//!
//! Transitions are plain functions over [`WorkerState`]; nothing here performs
//! I/O, so every edge of the table can be tested directly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    InstallSucceeded,
    InstallFailed,
    Activate,
    ActivateSucceeded,
    ActivateFailed,
    Replace,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Install => "install",
            LifecycleEvent::InstallSucceeded => "install_succeeded",
            LifecycleEvent::InstallFailed => "install_failed",
            LifecycleEvent::Activate => "activate",
            LifecycleEvent::ActivateSucceeded => "activate_succeeded",
            LifecycleEvent::ActivateFailed => "activate_failed",
            LifecycleEvent::Replace => "replace",
        };
        f.write_str(name)
    }
}

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot apply {event} while {from}")]
    InvalidTransition { from: WorkerState, event: LifecycleEvent },
}

/// Compute the state reached by applying `event` in state `from`.
pub fn next_state(from: WorkerState, event: LifecycleEvent) -> Result<WorkerState, LifecycleError> {
    use LifecycleEvent as E;
    use WorkerState as S;

    let to = match (from, event) {
        (S::Parsed, E::Install) => S::Installing,
        (S::Installing, E::InstallSucceeded) => S::Installed,
        (S::Installing, E::InstallFailed) => S::Parsed,
        (S::Installed, E::Activate) => S::Activating,
        (S::Activating, E::ActivateSucceeded) => S::Activated,
        (S::Activating, E::ActivateFailed) => S::Installed,
        (S::Redundant, E::Replace) => return Err(LifecycleError::InvalidTransition { from, event }),
        (_, E::Replace) => S::Redundant,
        _ => return Err(LifecycleError::InvalidTransition { from, event }),
    };

    Ok(to)
}

/// Mutable lifecycle record of one manager instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    state: WorkerState,
    skip_waiting: bool,
    clients_claimed: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { state: WorkerState::Parsed, skip_waiting: false, clients_claimed: false }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Apply an event, returning the new state.
    ///
    /// The record is left untouched when the transition is rejected.
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<WorkerState, LifecycleError> {
        let to = next_state(self.state, event)?;
        tracing::debug!(from = %self.state, to = %to, %event, "lifecycle transition");
        self.state = to;
        if to == WorkerState::Redundant {
            self.clients_claimed = false;
        }
        Ok(to)
    }

    /// Record a skip-waiting request. Ignored once the manager is redundant.
    pub fn request_skip_waiting(&mut self) {
        if self.state != WorkerState::Redundant {
            self.skip_waiting = true;
        }
    }

    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting
    }

    /// Take control of all open clients. Only an activated manager can claim.
    pub fn claim_clients(&mut self) -> Result<(), LifecycleError> {
        if self.state != WorkerState::Activated {
            return Err(LifecycleError::InvalidTransition { from: self.state, event: LifecycleEvent::ActivateSucceeded });
        }
        self.clients_claimed = true;
        Ok(())
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed
    }

    /// Installed and waiting for the previous version's clients to go away.
    pub fn is_waiting(&self) -> bool {
        self.state == WorkerState::Installed && !self.skip_waiting
    }

    /// Installed and allowed to activate without waiting.
    pub fn ready_to_activate(&self) -> bool {
        self.state == WorkerState::Installed && self.skip_waiting
    }

    /// Whether fetches should be intercepted at all.
    pub fn controls_clients(&self) -> bool {
        self.state == WorkerState::Activated && self.clients_claimed
    }
}
