use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Bounded window over the last `capacity` values, oldest first.
///
/// Aggregates are recomputed from the stored values on every call so they
/// match a direct computation over the same slice bit-for-bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arithmetic mean, `None` until the window is full.
    pub fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.capacity as f64)
    }

    /// Sample (Bessel-corrected) standard deviation around `mean`.
    pub fn sample_std(&self, mean: f64) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let variance = self.values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>()
            / (self.values.len() - 1) as f64;
        variance.sqrt()
    }

    pub fn max(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn min(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.values.iter().copied().fold(f64::INFINITY, f64::min))
    }
}
