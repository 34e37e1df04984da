use std::collections::VecDeque;

/// Buffer of observed values with descriptive statistics.
///
/// A bounded window evicts its oldest value once `capacity` is reached; an
/// unbounded one keeps everything until [`SlidingWindow::clear`]. Every statistic
/// of an empty window is `NaN`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    values: VecDeque<f64>,
    capacity: Option<usize>,
}

impl SlidingWindow {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.min(4096)),
            capacity: Some(capacity),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            values: VecDeque::new(),
            capacity: None,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn push(&mut self, value: f64) {
        if let Some(cap) = self.capacity {
            if cap == 0 {
                return;
            }
            while self.values.len() >= cap {
                self.values.pop_front();
            }
        }
        self.values.push_back(value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn percentile(&self, p: f64) -> f64 {
        percentile_of_sorted(&self.sorted(), p)
    }

    pub fn sorted(&self) -> Vec<f64> {
        let mut out: Vec<f64> = self.values.iter().copied().collect();
        out.sort_unstable_by(f64::total_cmp);
        out
    }
}

/// Percentile `p` (0..=100) of an ascending slice.
///
/// Uses the `p * (n + 1) / 100` position with linear interpolation between the
/// neighbouring ranks, clamping to the extremes outside the sample range.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 || p.is_nan() {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }

    let p = p.clamp(0.0, 100.0);
    let pos = p * (n as f64 + 1.0) / 100.0;
    if pos < 1.0 {
        return sorted[0];
    }
    if pos >= n as f64 {
        return sorted[n - 1];
    }

    let lower_rank = pos.floor();
    let fraction = pos - lower_rank;
    let idx = lower_rank as usize;
    let lower = sorted[idx - 1];
    let upper = sorted[idx];
    lower + fraction * (upper - lower)
}
