//! Per-request activation states.
//!
//! ```text
//! idle -> resolving -> materializing -> committing -> done
//!                  \_________________/
//! any non-terminal state -> aborted
//! ```
//!
//! The state lives only for the duration of one request. It is tracked so
//! that logs say where an aborted activation stopped.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Idle,
    Resolving,
    Materializing,
    Committing,
    Done,
    Aborted,
}

impl ActivationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether `to` is a valid successor of `self`.
    pub fn can_advance(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Resolving)
                | (Self::Resolving, Self::Materializing)
                | (Self::Resolving, Self::Committing)
                | (Self::Materializing, Self::Committing)
                | (Self::Committing, Self::Done)
        ) || (to == Self::Aborted && !self.is_terminal())
    }

    pub(crate) fn advance(&mut self, to: Self) {
        debug_assert!(self.can_advance(to), "invalid activation transition {self} -> {to}");
        tracing::debug!(from = %self, to = %to, "activation state");
        *self = to;
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Materializing => "materializing",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
