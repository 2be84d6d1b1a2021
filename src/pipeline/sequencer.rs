use std::collections::BTreeMap;

/// Re-establishes per-source arrival order for observations that parallel workers
/// may deliver out of order.
///
/// Items carry the dense sequence number their frame was stamped with at enqueue
/// time; the buffer holds early arrivals until every lower sequence has been released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

/// What happened to an item handed to [`ReorderBuffer::accept`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    /// Items now releasable, in sequence order. Empty when the item was buffered.
    Released(Vec<T>),
    /// The sequence was already released or is already pending.
    Stale(u64),
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn accept(&mut self, sequence: u64, item: T) -> Admission<T> {
        if sequence < self.next || self.pending.contains_key(&sequence) {
            return Admission::Stale(sequence);
        }
        self.pending.insert(sequence, item);

        let mut released = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            released.push(item);
            self.next += 1;
        }
        Admission::Released(released)
    }

    /// Releases everything still held, skipping over gaps. Used on shutdown, when
    /// missing sequences will never arrive.
    pub fn flush(&mut self) -> Vec<T> {
        let pending = std::mem::take(&mut self.pending);
        if let Some(last) = pending.keys().next_back() {
            self.next = last + 1;
        }
        pending.into_values().collect()
    }

    pub fn next_expected(&self) -> u64 {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
