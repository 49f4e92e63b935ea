//! Bounded newest-first list used for the badge and notification feeds.

use std::collections::VecDeque;

/// A newest-first list holding at most `capacity` items.
///
/// Inserting at the head evicts from the tail once the bound is reached.
/// Order is arrival order; items are never re-sorted by timestamp.
///
/// The feed remembers how many head items arrived live since the last
/// snapshot merge, so a fresh REST snapshot can replace the settled tail
/// without losing events that raced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Number of head items inserted since the last snapshot merge.
    live: usize,
}

impl<T> Feed<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            live: 0,
        }
    }

    /// Insert one item at the head.
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
        self.live = (self.live + 1).min(self.items.len());
    }

    /// Insert a batch at the head, keeping the batch's own order.
    ///
    /// `[a, b]` prepended to `[x, y]` gives `[a, b, x, y]`.
    pub fn prepend_batch(&mut self, batch: impl IntoIterator<Item = T>) {
        let batch: Vec<T> = batch.into_iter().collect();
        let added = batch.len();
        for item in batch.into_iter().rev() {
            self.items.push_front(item);
        }
        self.items.truncate(self.capacity);
        self.live = (self.live + added).min(self.items.len());
    }

    /// Replace everything but the live head with `snapshot`.
    ///
    /// Live items stay first; snapshot items for which `same(live, item)`
    /// holds are dropped. Afterwards the whole feed counts as settled.
    pub fn merge_snapshot(
        &mut self,
        snapshot: impl IntoIterator<Item = T>,
        same: impl Fn(&T, &T) -> bool,
    ) {
        let live: Vec<T> = self.items.drain(..).take(self.live).collect();
        let older: Vec<T> = snapshot
            .into_iter()
            .filter(|item| !live.iter().any(|fresh| same(fresh, item)))
            .collect();
        self.items = live.into_iter().chain(older).take(self.capacity).collect();
        self.live = 0;
    }

    /// Keep only the items matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let live_before = self.live;
        let mut removed_live = 0;
        let mut index = 0;
        self.items.retain(|item| {
            let kept = keep(item);
            if !kept && index < live_before {
                removed_live += 1;
            }
            index += 1;
            kept
        });
        self.live -= removed_live;
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.live = 0;
    }

    /// Number of head items that arrived since the last snapshot merge.
    #[must_use]
    pub const fn live_len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }
}
