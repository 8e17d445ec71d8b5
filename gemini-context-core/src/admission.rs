//! Token-budget admission control.
//!
//! Every measured handle passes through [`AdmissionController::decide`], which
//! checks the remaining budget and commits the cost in one step under a mutex.
//! The lock covers only the comparison and the addition; all network I/O
//! happens before a file reaches this point.
//!
//! Admission order is the order in which concurrent `decide` calls acquire the
//! lock, not the order files were discovered. Under a worker pool that order is
//! nondeterministic, so which files win when the budget runs out can vary from
//! run to run.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::contract::{Handle, UnitCount};

pub const DEFAULT_CEILING: UnitCount = 2_000_000;

/// Consumed and maximum units for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetState {
    pub consumed: UnitCount,
    pub ceiling: UnitCount,
}

impl BudgetState {
    pub fn remaining(&self) -> UnitCount {
        self.ceiling.saturating_sub(self.consumed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    RejectedBudget,
}

/// Serialized decision point over a run's [`BudgetState`].
///
/// The controller never deletes anything: a rejected handle stays the
/// caller's responsibility.
#[derive(Debug)]
pub struct AdmissionController {
    state: Mutex<BudgetState>,
}

impl AdmissionController {
    pub fn new(ceiling: UnitCount) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                consumed: 0,
                ceiling,
            }),
        }
    }

    /// Admit `cost` if it fits in the remaining budget, committing it atomically.
    pub fn decide(&self, handle: &Handle, cost: UnitCount) -> Decision {
        let mut state = self.lock();
        let decision = match state.consumed.checked_add(cost) {
            Some(total) if total <= state.ceiling => {
                state.consumed = total;
                Decision::Admitted
            }
            _ => Decision::RejectedBudget,
        };
        debug!(
            handle = %handle.id,
            cost,
            consumed = state.consumed,
            ceiling = state.ceiling,
            ?decision,
            "Admission decision"
        );
        decision
    }

    pub fn snapshot(&self) -> BudgetState {
        *self.lock()
    }

    // Writes are single assignments, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
