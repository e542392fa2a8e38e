//! Fixed-capacity FIFO that overwrites its oldest entry when full.

use std::collections::VecDeque;

/// Slots reserved up front; larger buffers grow on demand.
const INITIAL_SLOTS: usize = 128;

/// Bounded first-in first-out buffer.
///
/// `len() <= capacity()` holds at all times. Pushing into a full buffer
/// evicts the oldest entry and hands it back to the caller; a zero-capacity
/// buffer evicts every pushed value immediately.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(INITIAL_SLOTS)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append `item`, returning the entry evicted to make room, if any.
    #[must_use = "evicted entries are lost unless the caller accounts for them"]
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Put `item` back at the head of the queue.
    ///
    /// Used to return an entry that was popped but could not be delivered.
    /// When the buffer is full the item itself is handed back, since every
    /// queued entry is newer than it.
    #[must_use = "rejected entries are lost unless the caller accounts for them"]
    pub fn push_front(&mut self, item: T) -> Option<T> {
        if self.items.len() >= self.capacity {
            return Some(item);
        }
        self.items.push_front(item);
        None
    }

    /// Remove and return the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Drop every entry, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    /// Iterate oldest-first without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn overflow_evicts_oldest() {
        let mut buffer = RingBuffer::new(2);
        assert_eq!(buffer.push("a"), None);
        assert_eq!(buffer.push("b"), None);
        assert_eq!(buffer.push("c"), Some("a"));
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_evicts_everything() {
        let mut buffer = RingBuffer::new(0);
        assert_eq!(buffer.push(1), Some(1));
        assert!(buffer.is_empty());
        assert_eq!(buffer.push_front(2), Some(2));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn push_front_restores_head() {
        let mut buffer = RingBuffer::new(3);
        let _ = buffer.push(1);
        let _ = buffer.push(2);
        let head = buffer.pop().expect("head present");
        assert_eq!(buffer.push_front(head), None);
        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.pop(), Some(2));
    }

    #[test]
    fn push_front_rejects_when_full() {
        let mut buffer = RingBuffer::new(1);
        let _ = buffer.push(2);
        assert_eq!(buffer.push_front(1), Some(1));
        assert_eq!(buffer.pop(), Some(2));
    }

    #[test]
    fn huge_capacity_grows_on_demand() {
        let mut buffer = RingBuffer::new(usize::MAX);
        assert_eq!(buffer.capacity(), usize::MAX);
        for i in 0..1000 {
            assert_eq!(buffer.push(i), None);
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.pop(), Some(0));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(5)]
    fn clear_reports_discarded(#[case] count: usize) {
        let mut buffer = RingBuffer::new(8);
        for i in 0..count {
            let _ = buffer.push(i);
        }
        assert_eq!(buffer.clear(), count);
        assert!(buffer.is_empty());
    }
}
