use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::models::{AssetItem, Priority};

/// A queued item. Ordering uses only the priority and sequence captured at insertion.
struct PendingEntry {
    priority: Priority,
    seq: u64,
    item: AssetItem,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: the most urgent priority, then the oldest entry, sorts greatest.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Asset items waiting for the downloader's single transfer slot.
#[derive(Default)]
pub struct PendingQueue {
    heap: BinaryHeap<PendingEntry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: AssetItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PendingEntry {
            priority: item.priority(),
            seq,
            item,
        });
    }

    /// Removes the most urgent item.
    pub fn pop(&mut self) -> Option<AssetItem> {
        self.heap.pop().map(|entry| entry.item)
    }

    /// Priority of the item [`pop`](Self::pop) would return.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.heap.peek().map(|entry| entry.priority)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Source urls of every queued item, in no particular order.
    pub fn urls(&self) -> Vec<String> {
        self.heap.iter().map(|entry| entry.item.url().to_string()).collect()
    }
}
