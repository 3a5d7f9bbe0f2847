//! Resource slot accounting.

use std::collections::HashMap;

use tracing::debug;

use crate::stage::ResourceClass;

/// Proof that a worker holds one slot of a class. Not cloneable; the
/// only way back into the pool is [`ResourceAllocator::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceGrant {
    pub class: ResourceClass,
    pub slot: usize,
}

/// Outcome of a non-blocking acquire.
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(ResourceGrant),
    /// No slot free; the caller re-queues the task instead of parking.
    Blocked,
}

struct ClassState {
    total: usize,
    in_use: usize,
    next_slot: usize,
}

/// Counts slots per resource class. Acquire never blocks; a class with
/// no configured slots always reports `Blocked`, which config
/// validation rules out for classes the pipeline actually uses.
pub struct ResourceAllocator {
    classes: HashMap<ResourceClass, ClassState>,
}

impl ResourceAllocator {
    pub fn new(slots: HashMap<ResourceClass, usize>) -> Self {
        let classes = slots
            .into_iter()
            .map(|(class, total)| {
                (
                    class,
                    ClassState {
                        total,
                        in_use: 0,
                        next_slot: 0,
                    },
                )
            })
            .collect();
        Self { classes }
    }

    /// Number of configured slots for a class (0 if unknown).
    pub fn capacity(&self, class: ResourceClass) -> usize {
        self.classes.get(&class).map(|s| s.total).unwrap_or(0)
    }

    pub fn in_use(&self, class: ResourceClass) -> usize {
        self.classes.get(&class).map(|s| s.in_use).unwrap_or(0)
    }

    pub fn acquire(&mut self, class: ResourceClass) -> AcquireOutcome {
        let Some(state) = self.classes.get_mut(&class) else {
            return AcquireOutcome::Blocked;
        };
        if state.in_use >= state.total {
            return AcquireOutcome::Blocked;
        }
        state.in_use += 1;
        let slot = state.next_slot;
        state.next_slot = state.next_slot.wrapping_add(1);
        debug!(
            "Granted {} slot ({}/{} in use)",
            class, state.in_use, state.total
        );
        AcquireOutcome::Granted(ResourceGrant { class, slot })
    }

    pub fn release(&mut self, grant: ResourceGrant) {
        if let Some(state) = self.classes.get_mut(&grant.class) {
            state.in_use = state.in_use.saturating_sub(1);
            debug!(
                "Released {} slot ({}/{} in use)",
                grant.class, state.in_use, state.total
            );
        }
    }
}
