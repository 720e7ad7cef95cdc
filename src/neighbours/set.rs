//! Bounded worst-of-k neighbour collection

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A training vector found near a query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbour {
    /// Distance from the query vector
    pub distance: f64,
    /// Index of the training candle the vector came from
    pub index: usize,
}

impl Neighbour {
    /// Ascending by distance, ties broken by training index
    fn rank(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

/// Holds at most `k` neighbours.
///
/// Accepts everything until full; afterwards a candidate replaces the current
/// worst only if it is strictly closer. The buffer is re-sorted lazily, only
/// when a replacement is being considered, so the last element is the worst.
#[derive(Debug, Clone)]
pub struct NeighbourSet {
    k: usize,
    items: Vec<Neighbour>,
    sorted: bool,
}

impl NeighbourSet {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k),
            sorted: true,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.k
    }

    fn sort(&mut self) {
        if !self.sorted {
            self.items.sort_by(|a, b| a.rank(b));
            self.sorted = true;
        }
    }

    /// Current worst kept neighbour
    pub fn worst(&mut self) -> Option<&Neighbour> {
        self.sort();
        self.items.last()
    }

    /// Offer a candidate; returns whether it was kept.
    pub fn offer(&mut self, candidate: Neighbour) -> bool {
        if self.k == 0 {
            return false;
        }
        if !self.is_full() {
            self.items.push(candidate);
            self.sorted = false;
            return true;
        }

        self.sort();
        let last = self.items.len() - 1;
        if candidate.distance < self.items[last].distance {
            self.items[last] = candidate;
            self.sorted = false;
            return true;
        }
        false
    }

    /// Sorted ascending by distance
    pub fn finalize(mut self) -> Vec<Neighbour> {
        self.sort();
        self.items
    }
}
