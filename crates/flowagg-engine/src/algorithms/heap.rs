//! Binary heap ordered by a caller-supplied comparison.
//!
//! The ordering usually depends on state outside the heap (the current key
//! of each open spill file, say), so the comparator is passed to every
//! operation instead of being baked into an `Ord` impl. The root is the
//! least element under that comparator.

use std::cmp::Ordering;

pub struct HeapBy<T> {
    items: Vec<T>,
}

impl<T> HeapBy<T> {
    pub fn new() -> Self {
        HeapBy { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        HeapBy {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn push<F>(&mut self, item: T, cmp: &mut F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.items.push(item);
        self.sift_up(self.items.len() - 1, cmp);
    }

    pub fn pop<F>(&mut self, cmp: &mut F) -> Option<T>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let top = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0, cmp);
        }
        top
    }

    /// Replace the root with `item` and restore the heap. Returns the old root.
    pub fn replace_top<F>(&mut self, item: T, cmp: &mut F) -> Option<T>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.items.is_empty() {
            self.items.push(item);
            return None;
        }
        let old = std::mem::replace(&mut self.items[0], item);
        self.sift_down(0, cmp);
        Some(old)
    }

    /// The elements in heap order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn shrink_to_fit(&mut self) {
        self.items.shrink_to_fit();
    }

    /// The elements in heap order, which is not sorted order.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    fn sift_up<F>(&mut self, mut pos: usize, cmp: &mut F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if cmp(&self.items[pos], &self.items[parent]) != Ordering::Less {
                break;
            }
            self.items.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down<F>(&mut self, mut pos: usize, cmp: &mut F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let len = self.items.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && cmp(&self.items[right], &self.items[left]) == Ordering::Less
            {
                right
            } else {
                left
            };
            if cmp(&self.items[child], &self.items[pos]) != Ordering::Less {
                break;
            }
            self.items.swap(pos, child);
            pos = child;
        }
    }
}

impl<T> Default for HeapBy<T> {
    fn default() -> Self {
        Self::new()
    }
}
