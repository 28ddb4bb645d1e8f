//! Bounded in-memory history of received entries.

use crate::stream::proto::Entry;

/// Default number of entries retained by the client.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Ordered store of received entries with a fixed capacity.
///
/// When an append arrives at capacity the whole history is replaced by the
/// newest entry (reset-on-overflow), so the length never exceeds `capacity`.
#[derive(Clone, Debug)]
pub struct MessageBuffer {
    entries: Vec<Entry>,
    capacity: usize,
}

impl MessageBuffer {
    /// Creates an empty buffer. A zero capacity is clamped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry, collapsing the history to `[entry]` on overflow.
    ///
    /// Returns `true` when the append triggered an overflow reset.
    pub fn push(&mut self, entry: Entry) -> bool {
        if self.entries.len() >= self.capacity {
            self.entries.clear();
            self.entries.push(entry);
            return true;
        }
        self.entries.push(entry);
        false
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Read-only view in arrival order.
    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    /// Owned copy of the current history in arrival order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.clone()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{MessageBuffer, DEFAULT_BUFFER_CAPACITY};
    use crate::stream::proto::Entry;

    fn numbered(n: u64) -> Entry {
        Entry::Structured(json!({ "n": n }))
    }

    #[test]
    fn appends_preserve_arrival_order() {
        let mut buffer = MessageBuffer::with_capacity(3);
        buffer.push(numbered(1));
        buffer.push(numbered(2));
        assert_eq!(buffer.as_slice(), &[numbered(1), numbered(2)]);
    }

    #[test]
    fn overflow_collapses_to_newest_entry() {
        let mut buffer = MessageBuffer::default();
        for n in 1..=100 {
            assert!(!buffer.push(numbered(n)));
        }
        assert_eq!(buffer.len(), DEFAULT_BUFFER_CAPACITY);

        assert!(buffer.push(numbered(101)));
        assert_eq!(buffer.snapshot(), vec![numbered(101)]);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut buffer = MessageBuffer::with_capacity(7);
        for n in 0..200 {
            buffer.push(numbered(n));
            assert!(buffer.len() <= buffer.capacity());
        }
    }

    #[test]
    fn clear_always_empties() {
        let mut buffer = MessageBuffer::with_capacity(2);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(Entry::Raw("a".to_string()));
        buffer.push(Entry::Raw("b".to_string()));
        buffer.clear();
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = MessageBuffer::with_capacity(0);
        buffer.push(numbered(1));
        buffer.push(numbered(2));
        assert_eq!(buffer.snapshot(), vec![numbered(2)]);
    }
}
