//! Single-pass uniform sampling (Algorithm R).

use rand::Rng;

/// Fixed-capacity reservoir.
///
/// After `n` offers, every offered item is held with probability
/// `min(1, capacity / n)`. Held items keep their relative offer order only
/// until the reservoir fills; callers that need input order must sort.
#[derive(Debug, Clone)]
pub struct Reservoir<T> {
    capacity: usize,
    seen: usize,
    slots: Vec<T>,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: 0,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Offer the next item of the stream.
    pub fn offer<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) {
        self.seen += 1;
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        let j = rng.random_range(0..self.seen);
        if j < self.capacity {
            self.slots[j] = item;
        }
    }

    /// Items offered so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn into_vec(self) -> Vec<T> {
        self.slots
    }
}
