//! The deferred-write queue.
//!
//! A write whose target value carries a queue-condition mask is deferred
//! while the device state intersects that mask. The queue owns the parsed
//! operand outright; applying an entry consumes it, so there is never a
//! second owner to reconcile after the fact.

use crate::value::{Op, Value};

/// Index of a live value within the daemon's store.
pub type ValueId = usize;

/// One owned live value plus the state mask under which writes to it are
/// deferred.
#[derive(Debug)]
pub struct CondValue {
    pub value: Value,
    /// Writes queue while `(state & queue_condition) != 0`. Zero means
    /// never queue.
    pub queue_condition: u32,
}

/// One pending deferred write: target, operator, owned operand.
#[derive(Debug)]
pub struct QueuedWrite {
    pub target: ValueId,
    pub op: Op,
    pub operand: Value,
}

/// Ordered set of pending writes, at most one per target value.
#[derive(Debug, Default)]
pub struct WriteQueue {
    entries: Vec<QueuedWrite>,
}

impl WriteQueue {
    pub fn is_queued(&self, target: ValueId) -> bool {
        self.entries.iter().any(|e| e.target == target)
    }

    /// Queue a write, superseding any earlier entry for the same value.
    /// The fresh entry goes to the tail: last writer wins, and application
    /// order follows arrival order of the surviving entries.
    pub fn push_replace(&mut self, write: QueuedWrite) {
        self.entries.retain(|e| e.target != write.target);
        self.entries.push(write);
    }

    /// Drop and return the pending entry for a value, if any.
    pub fn remove(&mut self, target: ValueId) -> Option<QueuedWrite> {
        let pos = self.entries.iter().position(|e| e.target == target)?;
        Some(self.entries.remove(pos))
    }

    /// Remove and return, in order, all entries whose gate no longer
    /// holds.
    pub fn drain_released(&mut self, released: impl Fn(ValueId) -> bool) -> Vec<QueuedWrite> {
        let mut out = Vec::new();
        let mut kept = Vec::new();
        for entry in self.entries.drain(..) {
            if released(entry.target) {
                out.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{BaseType, ValueFlags};
    use pretty_assertions::assert_eq;

    fn operand(payload: &str) -> Value {
        let mut v = Value::new(ValueFlags::new(BaseType::Double), "OP", "").unwrap();
        v.set_from_str(payload).unwrap();
        v
    }

    #[test]
    fn test_push_replace_keeps_one_entry_per_target() {
        let mut queue = WriteQueue::default();
        queue.push_replace(QueuedWrite {
            target: 3,
            op: Op::Assign,
            operand: operand("1.0"),
        });
        queue.push_replace(QueuedWrite {
            target: 3,
            op: Op::Assign,
            operand: operand("2.0"),
        });
        assert_eq!(queue.len(), 1);
        let entry = queue.remove(3).unwrap();
        assert_eq!(entry.operand.as_f64(), Some(2.0));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_released_preserves_order() {
        let mut queue = WriteQueue::default();
        for target in [1, 2, 3] {
            queue.push_replace(QueuedWrite {
                target,
                op: Op::Assign,
                operand: operand("0.0"),
            });
        }
        let released = queue.drain_released(|id| id != 2);
        assert_eq!(
            released.iter().map(|e| e.target).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(queue.is_queued(2));
        assert_eq!(queue.len(), 1);
    }
}
