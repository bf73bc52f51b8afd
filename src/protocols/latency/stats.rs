//! Running latency statistics.

/// Append-only latency history with a running sample standard deviation.
///
/// Variance is maintained with Welford's update, so each sample costs O(1)
/// and long sessions do not accumulate the cancellation error of the
/// sum-of-squares formula. The full history is kept for the session.
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    samples: Vec<f64>,
    mean: f64,
    m2: f64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one round trip in milliseconds.
    pub fn push(&mut self, latency_ms: f64) {
        self.samples.push(latency_ms);
        let n = self.samples.len() as f64;
        let delta = latency_ms - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (latency_ms - self.mean);
    }

    /// Sample standard deviation of every latency recorded so far.
    ///
    /// Exactly 0 with fewer than two samples.
    pub fn jitter(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        (self.m2.max(0.0) / (n - 1) as f64).sqrt()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Recorded latencies in arrival order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::round_to;

    /// Two-pass sample standard deviation for comparison.
    fn reference_stddev(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (values.len() - 1) as f64;
        variance.sqrt()
    }

    #[test]
    fn test_jitter_zero_below_two_samples() {
        let mut stats = LatencyStats::new();
        assert_eq!(stats.jitter(), 0.0);

        stats.push(42.0);
        assert_eq!(stats.jitter(), 0.0);
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn test_jitter_three_samples() {
        let mut stats = LatencyStats::new();
        for latency in [10.0, 20.0, 30.0] {
            stats.push(latency);
        }
        assert!((stats.jitter() - 10.0).abs() < 1e-12);
        assert_eq!(round_to(stats.jitter(), 1), 10.0);
        assert_eq!(stats.mean(), 20.0);
    }

    #[test]
    fn test_jitter_matches_recomputation() {
        let values = [12.5, 3.25, 48.0, 7.75, 19.0, 19.0, 0.5, 101.25];
        let mut stats = LatencyStats::new();
        for (i, &v) in values.iter().enumerate() {
            stats.push(v);
            let expected = reference_stddev(&values[..=i]);
            assert!((stats.jitter() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_jitter_is_order_independent() {
        let mut forward = LatencyStats::new();
        let mut backward = LatencyStats::new();
        let values = [5.0, 9.0, 1.0, 14.0, 3.0];
        for &v in &values {
            forward.push(v);
        }
        for &v in values.iter().rev() {
            backward.push(v);
        }
        assert!((forward.jitter() - backward.jitter()).abs() < 1e-12);
    }

    #[test]
    fn test_stable_with_large_offset() {
        // Naive sum-of-squares loses all precision here
        let mut stats = LatencyStats::new();
        for i in 0..10_000 {
            stats.push(1e9 + (i % 2) as f64);
        }
        assert!((stats.jitter() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_samples_keep_arrival_order() {
        let mut stats = LatencyStats::new();
        stats.push(3.0);
        stats.push(1.0);
        stats.push(2.0);
        assert_eq!(stats.samples(), &[3.0, 1.0, 2.0]);
    }
}
