//! Per-sheet processing states.
//!
//! ```text
//! Start -> TypeInferred -> LayoutResolved -> Cleaned -> Profiled -> Done
//!   \____________\______________\______________\___________> Degraded -> (retry) ...
//!                                                          \-> Failed
//! ```
//!
//! Stages a fallback level skips are skipped in the path too, so forward
//! moves may jump ahead. `Degraded` restarts the forward sequence for the
//! next level. `Done` and `Failed` are terminal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetState {
    Start,
    TypeInferred,
    LayoutResolved,
    Cleaned,
    Profiled,
    Done,
    Degraded,
    Failed,
}

impl SheetState {
    /// Position in the forward sequence; `Degraded` restarts it.
    fn rank(self) -> Option<u8> {
        match self {
            SheetState::Start | SheetState::Degraded => Some(0),
            SheetState::TypeInferred => Some(1),
            SheetState::LayoutResolved => Some(2),
            SheetState::Cleaned => Some(3),
            SheetState::Profiled => Some(4),
            SheetState::Done => Some(5),
            SheetState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SheetState::Done | SheetState::Failed)
    }

    pub fn can_transition_to(self, next: SheetState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SheetState::Degraded | SheetState::Failed => true,
            SheetState::Start => false,
            SheetState::Done => self == SheetState::Profiled,
            _ => match (self.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

/// Path of states a sheet went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTrace {
    states: Vec<SheetState>,
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTrace {
    pub fn new() -> Self {
        Self {
            states: vec![SheetState::Start],
        }
    }

    pub fn current(&self) -> SheetState {
        self.states.last().copied().unwrap_or(SheetState::Start)
    }

    /// Move to `next`. Invalid moves are ignored and reported as `false`.
    pub fn advance(&mut self, next: SheetState) -> bool {
        let ok = self.current().can_transition_to(next);
        debug_assert!(ok, "invalid sheet state transition {:?} -> {:?}", self.current(), next);
        if ok {
            self.states.push(next);
        }
        ok
    }

    pub fn states(&self) -> &[SheetState] {
        &self.states
    }
}
