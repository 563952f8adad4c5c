//! Fixed-capacity append-only history.
//!
//! Backs every bounded log in the crate (sensor snapshots, alerts,
//! action records, control decisions).  When full, pushing evicts the
//! oldest entry first.

use heapless::Deque;

pub struct Ring<T, const N: usize> {
    entries: Deque<T, N>,
}

impl<T, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Ring<T, N> {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    /// Append `item`, evicting the oldest entry when at capacity.
    pub fn push(&mut self, item: T) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        // Cannot fail: a slot was freed above if the deque was full.
        let _ = self.entries.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.entries.iter_mut()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone, const N: usize> Ring<T, N> {
    /// The newest `limit` entries, oldest first.  `None` returns everything.
    pub fn recent(&self, limit: Option<usize>) -> Vec<T> {
        let skip = limit.map_or(0, |l| self.len().saturating_sub(l));
        self.entries.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut r: Ring<u32, 3> = Ring::new();
        for i in 0..5 {
            r.push(i);
        }
        assert_eq!(r.len(), 3);
        assert_eq!(r.recent(None), vec![2, 3, 4]);
        assert_eq!(r.latest(), Some(&4));
    }

    #[test]
    fn recent_limits_to_newest() {
        let mut r: Ring<u32, 8> = Ring::new();
        for i in 0..6 {
            r.push(i);
        }
        assert_eq!(r.recent(Some(2)), vec![4, 5]);
        assert_eq!(r.recent(Some(100)).len(), 6);
    }
}
