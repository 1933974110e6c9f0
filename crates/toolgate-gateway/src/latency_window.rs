//! Rolling window over remote-request latencies, backing the metrics
//! endpoint with median/p95/min/max.

// ─── Types ──────────────────────────────────────────────────────────

/// Summary of the samples currently inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: usize,
    pub median_ms: u64,
    pub p95_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LatencySample {
    latency_ms: u64,
    timestamp_ms: u64,
}

// ─── LatencyWindow ──────────────────────────────────────────────────

/// Rolling latency tracker. Samples older than the window are pruned on
/// evaluation, not by a background sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyWindow {
    /// Samples in chronological order.
    samples: Vec<LatencySample>,
    /// Window duration in milliseconds (default 600_000 = 10min).
    window_ms: u64,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::with_window(600_000)
    }

    pub fn with_window(window_ms: u64) -> Self {
        Self {
            samples: Vec::new(),
            window_ms,
        }
    }

    /// Record a latency observation.
    pub fn record(&mut self, latency_ms: u64, now_ms: u64) {
        self.samples.push(LatencySample {
            latency_ms,
            timestamp_ms: now_ms,
        });
    }

    /// Prune old samples and summarize the rest. `None` when the window
    /// is empty.
    pub fn stats(&mut self, now_ms: u64) -> Option<LatencyStats> {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.samples.retain(|s| s.timestamp_ms >= cutoff);

        if self.samples.is_empty() {
            return None;
        }

        let mut latencies: Vec<u64> = self.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_unstable();
        let count = latencies.len();

        Some(LatencyStats {
            count,
            median_ms: latencies[percentile_index(50, count)],
            p95_ms: latencies[percentile_index(95, count)],
            min_ms: latencies[0],
            max_ms: latencies[count - 1],
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// 0-based index of percentile `p` in a sorted slice of `count` items:
/// ceil(p/100 * count) - 1, integer arithmetic only.
fn percentile_index(p: usize, count: usize) -> usize {
    (p * count).div_ceil(100).saturating_sub(1)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── 1. empty_window_has_no_stats ────────────────────────────────

    #[test]
    fn empty_window_has_no_stats() {
        let mut lw = LatencyWindow::new();
        assert_eq!(lw.stats(1_000_000), None);
    }

    // ── 2. single_sample_stats ──────────────────────────────────────

    #[test]
    fn single_sample_stats() {
        let mut lw = LatencyWindow::new();
        lw.record(42, 1_000_000);
        let stats = lw.stats(1_000_001).expect("stats");
        assert_eq!(
            stats,
            LatencyStats {
                count: 1,
                median_ms: 42,
                p95_ms: 42,
                min_ms: 42,
                max_ms: 42,
            }
        );
    }

    // ── 3. percentiles_over_uniform_spread ──────────────────────────

    #[test]
    fn percentiles_over_uniform_spread() {
        // Latencies 1..=100: median index = ceil(50) - 1 = 49 → 50,
        // p95 index = ceil(95) - 1 = 94 → 95.
        let mut lw = LatencyWindow::new();
        let base = 1_000_000;
        for i in 1..=100 {
            lw.record(i, base + i);
        }
        let stats = lw.stats(base + 101).expect("stats");
        assert_eq!(stats.count, 100);
        assert_eq!(stats.median_ms, 50);
        assert_eq!(stats.p95_ms, 95);
        assert_eq!(stats.min_ms, 1);
        assert_eq!(stats.max_ms, 100);
    }

    // ── 4. old_samples_pruned_on_stats ──────────────────────────────

    #[test]
    fn old_samples_pruned_on_stats() {
        let mut lw = LatencyWindow::with_window(1_000);
        lw.record(500, 100);
        lw.record(60, 1_100);
        lw.record(70, 1_150);
        assert_eq!(lw.sample_count(), 3);

        let stats = lw.stats(1_200).expect("stats");
        assert_eq!(lw.sample_count(), 2);
        assert_eq!(stats.max_ms, 70);
        assert_eq!(stats.min_ms, 60);
    }

    // ── 5. all_samples_expire ───────────────────────────────────────

    #[test]
    fn all_samples_expire() {
        let mut lw = LatencyWindow::with_window(1_000);
        lw.record(50, 100);
        assert_eq!(lw.stats(5_000), None);
        assert_eq!(lw.sample_count(), 0);
    }

    // ── 6. unsorted_arrival_order ───────────────────────────────────

    #[test]
    fn unsorted_arrival_order() {
        let mut lw = LatencyWindow::new();
        let base = 1_000_000;
        for (i, latency) in [90u64, 10, 50, 70, 30].into_iter().enumerate() {
            lw.record(latency, base + i as u64);
        }
        let stats = lw.stats(base + 10).expect("stats");
        assert_eq!(stats.median_ms, 50);
        assert_eq!(stats.min_ms, 10);
        assert_eq!(stats.max_ms, 90);
    }
}
