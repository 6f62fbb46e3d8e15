//! Delay history and Shannon-entropy estimate over it

use std::collections::VecDeque;

/// Maximum number of delays kept in the history buffer
pub const HISTORY_CAPACITY: usize = 1000;

/// Number of most recent samples the estimator looks at
pub const ENTROPY_WINDOW: usize = 100;

/// Histogram bins used by the estimator
pub const ENTROPY_BINS: usize = 20;

/// Below this many samples the estimate is 0
pub const MIN_ENTROPY_SAMPLES: usize = 20;

const LOG_EPSILON: f64 = 1e-10;

/// Bounded history of emitted delays
#[derive(Debug, Clone)]
pub struct DelayHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl DelayHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a delay, evicting the oldest one when full
    pub fn push(&mut self, seconds: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(seconds);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Shannon entropy (bits) of the most recent delays
    ///
    /// The last [`ENTROPY_WINDOW`] samples are bucketed into [`ENTROPY_BINS`]
    /// equal-width bins spanning their observed range. The result lies in
    /// `[0, log2(ENTROPY_BINS)]`; fewer than [`MIN_ENTROPY_SAMPLES`] samples
    /// give exactly 0.
    pub fn entropy(&self) -> f64 {
        if self.samples.len() < MIN_ENTROPY_SAMPLES {
            return 0.0;
        }

        let skip = self.samples.len().saturating_sub(ENTROPY_WINDOW);
        let window: Vec<f64> = self.samples.iter().skip(skip).copied().collect();

        let (min, max) = window
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });

        let range = max - min;
        if !range.is_finite() || range <= 0.0 {
            // Every sample falls into the same bin
            return 0.0;
        }

        let width = range / ENTROPY_BINS as f64;
        let mut bins = [0usize; ENTROPY_BINS];
        for x in &window {
            let idx = (((x - min) / width) as usize).min(ENTROPY_BINS - 1);
            bins[idx] += 1;
        }

        let total = window.len() as f64;
        let entropy: f64 = bins
            .iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let p = count as f64 / total;
                -p * (p + LOG_EPSILON).log2()
            })
            .sum();

        entropy.clamp(0.0, (ENTROPY_BINS as f64).log2())
    }
}

impl Default for DelayHistory {
    fn default() -> Self {
        Self::new()
    }
}
