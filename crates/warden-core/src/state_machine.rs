//! Agent lifecycle state machine
//!
//! ```text
//! idle ──start──▶ running ◀──resume── paused
//!   ▲               │  ▲ └───pause───▶  │
//!   │            fail  │ success        │
//!   │               ▼  │                │
//!   └──success──── error                │
//!                   │                   │
//!                   └──────▶ stopped ◀──┘
//! ```
//!
//! Self-transitions are not in the table; callers treat them as no-ops.

use crate::error::StateMachineError;
use crate::types::AgentState;

/// Validate a state transition
pub fn validate_transition(from: AgentState, to: AgentState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: AgentState) -> &'static [AgentState] {
    use AgentState::*;
    match from {
        Idle => &[Running, Error, Stopped],
        Running => &[Paused, Error, Stopped],
        Paused => &[Running, Stopped],
        Error => &[Idle, Running, Stopped],
        Stopped => &[Running, Idle],
    }
}
