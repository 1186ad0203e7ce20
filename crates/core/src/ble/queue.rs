//! Bounded operation queue with a single pending slot.
//!
//! Exactly one operation may be in flight against the GATT stack at any time,
//! across all devices. New operations are accepted only while the queue holds
//! fewer than [`MAX_OPS_QUEUE_SIZE`] entries; beyond that they are dropped and
//! the caller is told so. The queue itself does no I/O - the connection
//! manager drains it.

use std::collections::VecDeque;

use tracing::{error, info};

use crate::constants::queue::MAX_OPS_QUEUE_SIZE;

use super::operation::BleOperation;

/// Queue entry: operation plus the token that deadline timers use to check
/// whether the entry they armed against is still the pending one.
#[derive(Debug, Clone)]
pub struct QueuedOperation {
    pub id: u64,
    pub operation: BleOperation,
}

/// FIFO of not-yet-started operations plus the one currently in flight.
#[derive(Debug, Default)]
pub struct OperationQueue {
    queue: VecDeque<QueuedOperation>,
    pending: Option<QueuedOperation>,
    next_id: u64,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation, unless the queue is at capacity. Returns whether
    /// the operation was accepted.
    pub fn enqueue(&mut self, operation: BleOperation) -> bool {
        if self.queue.len() >= MAX_OPS_QUEUE_SIZE {
            info!(
                "Queue is full! {} operation not enqueued!",
                operation.kind()
            );
            return false;
        }
        info!(
            "Adding {} operation to the queue. Queue size: {}",
            operation.kind(),
            self.queue.len()
        );
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(QueuedOperation { id, operation });
        true
    }

    /// Move the next queued operation into the pending slot and return a
    /// clone of it. Returns `None` if an operation is already pending (this
    /// is a caller bug, logged and refused) or the queue is empty.
    pub fn take_next(&mut self) -> Option<QueuedOperation> {
        if self.pending.is_some() {
            error!("take_next() called while an operation is pending! Aborting.");
            return None;
        }
        let entry = self.queue.pop_front()?;
        self.pending = Some(entry.clone());
        Some(entry)
    }

    /// Clear the pending slot. Returns the completed entry, if any.
    pub fn complete_pending(&mut self) -> Option<QueuedOperation> {
        self.pending.take()
    }

    /// True if the entry with the given id is still the pending one.
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.as_ref().map(|p| p.id) == Some(id)
    }

    pub fn pending_operation(&self) -> Option<&BleOperation> {
        self.pending.as_ref().map(|p| &p.operation)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::driver::DeviceAddress;

    fn connect_op(address: &str) -> BleOperation {
        BleOperation::Connect {
            device: DeviceAddress::from(address),
        }
    }

    #[test]
    fn test_enqueue_and_take_in_fifo_order() {
        let mut queue = OperationQueue::new();
        assert!(queue.enqueue(connect_op("AA")));
        assert!(queue.enqueue(connect_op("BB")));

        let first = queue.take_next().unwrap();
        assert_eq!(first.operation.device().as_str(), "AA");
        assert!(queue.has_pending());

        // A second take while pending is refused.
        assert!(queue.take_next().is_none());

        queue.complete_pending();
        let second = queue.take_next().unwrap();
        assert_eq!(second.operation.device().as_str(), "BB");
    }

    #[test]
    fn test_enqueue_beyond_capacity_drops_operation() {
        let mut queue = OperationQueue::new();
        for _ in 0..MAX_OPS_QUEUE_SIZE {
            assert!(queue.enqueue(connect_op("AA")));
        }
        assert_eq!(queue.len(), MAX_OPS_QUEUE_SIZE);

        // The 21st operation is dropped without growing the queue.
        assert!(!queue.enqueue(connect_op("BB")));
        assert_eq!(queue.len(), MAX_OPS_QUEUE_SIZE);
    }

    #[test]
    fn test_pending_identity_survives_requeue() {
        let mut queue = OperationQueue::new();
        queue.enqueue(connect_op("AA"));
        let entry = queue.take_next().unwrap();
        assert!(queue.is_pending(entry.id));

        // Requeued copies get a fresh id; the old token no longer matches.
        queue.complete_pending();
        queue.enqueue(entry.operation.clone());
        let requeued = queue.take_next().unwrap();
        assert_ne!(requeued.id, entry.id);
        assert!(!queue.is_pending(entry.id));
        assert!(queue.is_pending(requeued.id));
    }
}
