//! Fixed-length trailing-window statistics with O(1) updates.

use std::collections::VecDeque;

/// Rolling mean / variance / min / max over the last `capacity` samples.
///
/// Mean and variance come from running sums; min and max from monotonic
/// deques, so every update is O(1) amortized. Variance is
/// `E[x^2] - (E[x])^2` floored at zero.
#[derive(Debug, Clone)]
pub struct RollingStats {
    capacity: usize,
    window: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    // (insertion index, value), values decreasing for max / increasing for min
    max_deque: VecDeque<(u64, f64)>,
    min_deque: VecDeque<(u64, f64)>,
    next_idx: u64,
}

impl RollingStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
            max_deque: VecDeque::new(),
            min_deque: VecDeque::new(),
            next_idx: 0,
        }
    }

    pub fn push(&mut self, x: f64) {
        let idx = self.next_idx;
        self.next_idx += 1;

        if self.window.len() == self.capacity {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.window.push_back(x);
        self.sum += x;
        self.sum_sq += x * x;

        while self.max_deque.back().is_some_and(|&(_, v)| v <= x) {
            self.max_deque.pop_back();
        }
        self.max_deque.push_back((idx, x));
        while self.min_deque.back().is_some_and(|&(_, v)| v >= x) {
            self.min_deque.pop_back();
        }
        self.min_deque.push_back((idx, x));

        // Expire entries that slid out of the window.
        let oldest = self.next_idx.saturating_sub(self.window.len() as u64);
        while self.max_deque.front().is_some_and(|&(i, _)| i < oldest) {
            self.max_deque.pop_front();
        }
        while self.min_deque.front().is_some_and(|&(i, _)| i < oldest) {
            self.min_deque.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.sum / self.window.len() as f64
    }

    pub fn variance(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let n = self.window.len() as f64;
        let m = self.sum / n;
        (self.sum_sq / n - m * m).max(0.0)
    }

    pub fn sd(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min_deque.front().map_or(0.0, |&(_, v)| v)
    }

    pub fn max(&self) -> f64 {
        self.max_deque.front().map_or(0.0, |&(_, v)| v)
    }
}
