//! Bounded FIFO between the reader task and the consumer.

use std::collections::VecDeque;

/// Result of [`EventBuffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued below the high-water mark.
    Queued,
    /// Queued, but the buffer already held at least the high-water mark.
    AboveHighWater(usize),
    /// Rejected; the buffer is at capacity and the item was dropped.
    Full,
}

/// Bounded queue with a warning threshold.
#[derive(Debug)]
pub struct EventBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    high_water_mark: usize,
}

impl<T> EventBuffer<T> {
    /// Create an empty buffer.
    pub fn new(capacity: usize, high_water_mark: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            high_water_mark,
        }
    }

    /// Queue `item` unless the buffer is full.
    pub fn push(&mut self, item: T) -> PushOutcome {
        let len = self.items.len();
        if len >= self.capacity {
            return PushOutcome::Full;
        }
        self.items.push_back(item);
        if len >= self.high_water_mark {
            PushOutcome::AboveHighWater(len + 1)
        } else {
            PushOutcome::Queued
        }
    }

    /// Queue `item` regardless of capacity.
    pub fn force_push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Put `items` in front of everything already queued, keeping their order.
    pub fn prepend(&mut self, items: impl IntoIterator<Item = T, IntoIter: DoubleEndedIterator>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    /// Oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove everything, oldest first.
    pub fn take_all(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.items)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut buf = EventBuffer::new(4, 3);
        assert_eq!(buf.push(1), PushOutcome::Queued);
        assert_eq!(buf.push(2), PushOutcome::Queued);
        assert_eq!(buf.pop(), Some(1));
        assert_eq!(buf.pop(), Some(2));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn high_water_then_full() {
        let mut buf = EventBuffer::new(4, 2);
        assert_eq!(buf.push(1), PushOutcome::Queued);
        assert_eq!(buf.push(2), PushOutcome::Queued);
        assert_eq!(buf.push(3), PushOutcome::AboveHighWater(3));
        assert_eq!(buf.push(4), PushOutcome::AboveHighWater(4));
        assert_eq!(buf.push(5), PushOutcome::Full);
        assert_eq!(buf.len(), 4);

        buf.force_push(6);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.take_all().into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 6]);
        assert!(buf.is_empty());
    }

    #[test]
    fn prepend_keeps_order() {
        let mut buf = EventBuffer::new(8, 8);
        let _ = buf.push(3);
        let _ = buf.push(4);
        buf.prepend(vec![1, 2]);
        assert_eq!(buf.take_all().into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }
}
