//! Scheduling primitives: the priority queue and the resource
//! allocator.
//!
//! Both are owned exclusively by the orchestrator's coordinator loop,
//! which is the single authority over task state. Neither needs
//! internal locking.

mod allocator;
mod queue;

pub use allocator::{AcquireOutcome, ResourceAllocator, ResourceGrant};
pub use queue::{QueueEntry, TaskQueue};
