//! Priority queue over ready tasks.
//!
//! Ordering: earlier stages first, then lower segment ids, so the
//! pipeline fills breadth-first and early segments finish early for
//! incremental preview. Within a tier, a monotonic sequence number
//! keeps ordering FIFO; entries deferred for lack of resources are
//! re-pushed with their original sequence number and so keep their
//! place in line.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::stage::ResourceClass;
use crate::task::TaskKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: TaskKey,
    pub ordinal: u32,
    pub class: ResourceClass,
    seq: u64,
}

impl QueueEntry {
    fn priority(&self) -> (u32, u32, u64) {
        (self.ordinal, self.key.segment_id, self.seq)
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a newly ready task.
    pub fn push(&mut self, key: TaskKey, ordinal: u32, class: ResourceClass) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueueEntry {
            key,
            ordinal,
            class,
            seq,
        }));
    }

    /// Re-enqueue an entry that could not get a resource grant. The
    /// original sequence number is kept so the entry stays ahead of
    /// anything that became ready after it.
    pub fn push_deferred(&mut self, entry: QueueEntry) {
        self.heap.push(Reverse(entry));
    }

    /// Highest-priority entry, if any.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop all queued entries (used on cancellation).
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(segment: u32, stage: &str) -> TaskKey {
        TaskKey::new(segment, stage)
    }

    #[test]
    fn test_stage_ordinal_comes_first() {
        let mut queue = TaskQueue::new();
        queue.push(key(0, "transcribe"), 1, ResourceClass::GpuLarge);
        queue.push(key(5, "extract"), 0, ResourceClass::Cpu);

        // Earlier stage wins even with a higher segment id.
        assert_eq!(queue.pop().unwrap().key, key(5, "extract"));
        assert_eq!(queue.pop().unwrap().key, key(0, "transcribe"));
    }

    #[test]
    fn test_segment_id_breaks_ties() {
        let mut queue = TaskQueue::new();
        queue.push(key(3, "extract"), 0, ResourceClass::Cpu);
        queue.push(key(1, "extract"), 0, ResourceClass::Cpu);
        queue.push(key(2, "extract"), 0, ResourceClass::Cpu);

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop())
            .map(|e| e.key.segment_id)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_deferred_entry_keeps_its_place() {
        let mut queue = TaskQueue::new();
        queue.push(key(0, "transcribe"), 1, ResourceClass::GpuLarge);

        let deferred = queue.pop().unwrap();

        // Something newer in the same tier arrives while the first
        // entry waits for a slot.
        queue.push(key(0, "translate"), 1, ResourceClass::GpuLarge);
        queue.push_deferred(deferred);

        // Same ordinal and segment: the original seq puts the deferred
        // entry back in front.
        assert_eq!(queue.pop().unwrap().key, key(0, "transcribe"));
        assert_eq!(queue.pop().unwrap().key, key(0, "translate"));
    }

    #[test]
    fn test_clear() {
        let mut queue = TaskQueue::new();
        queue.push(key(0, "extract"), 0, ResourceClass::Cpu);
        queue.push(key(1, "extract"), 0, ResourceClass::Cpu);
        assert_eq!(queue.len(), 2);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
