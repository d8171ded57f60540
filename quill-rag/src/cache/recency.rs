//! Arena-backed doubly-linked list ordering cache entries by recency.
//!
//! Slots are reused through a free list, so pushing, unlinking and promoting
//! an entry are all O(1) given its slot index.

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Front is most recently used, back is least recently used.
#[derive(Debug)]
pub(crate) struct RecencyList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> RecencyList<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx).and_then(|s| s.value.as_mut())
    }

    /// Slot index of the least recently used value.
    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Insert `value` as most recently used and return its slot.
    pub fn push_front(&mut self, value: T) -> usize {
        let slot = Slot { value: Some(value), prev: None, next: None };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.link_front(idx);
        self.len += 1;
        idx
    }

    /// Unlink and return the value in `idx`, freeing the slot.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let value = self.slots.get_mut(idx)?.value.take()?;
        self.unlink(idx);
        self.free.push(idx);
        self.len -= 1;
        Some(value)
    }

    /// Mark `idx` as most recently used.
    pub fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) || self.get(idx).is_none() {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn link_front(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.head;
        match self.head {
            Some(old) => self.slots[old].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }
}
