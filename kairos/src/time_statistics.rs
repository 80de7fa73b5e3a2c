use std::{collections::VecDeque, time::Duration};

/// Rolling window of measured durations
#[derive(Debug, Clone)]
pub struct TimeStatistics {
    samples: VecDeque<Duration>,
    window: usize,
    total_count: u64,
}

impl TimeStatistics {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
            total_count: 0,
        }
    }

    pub fn add(&mut self, sample: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_count += 1;
    }

    /// Number of samples ever added, not only those in the window
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let sum = self.samples.iter().sum::<Duration>();
        Some(sum / self.samples.len() as u32)
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for TimeStatistics {
    fn default() -> Self {
        Self::new(120)
    }
}

/// Timings and counters of the update and the render activity
#[derive(Debug, Clone, Default)]
pub struct OrchestratorStatistics {
    pub update: TimeStatistics,
    pub render: TimeStatistics,
    /// Ticks that the pacer dropped because the update fell behind
    pub skipped_ticks: u64,
    pub failed_frames: u64,
    pub cancelled_frames: u64,
}

impl OrchestratorStatistics {
    pub(crate) fn record_update(&mut self, duration: Duration) {
        self.update.add(duration);
        kairos_shared::plot!("update_time_ms", duration.as_secs_f64() * 1000.0);
    }

    pub(crate) fn record_render(&mut self, duration: Duration) {
        self.render.add(duration);
        kairos_shared::plot!("render_time_ms", duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn empty() {
        let statistics = TimeStatistics::default();
        assert!(statistics.is_empty());
        assert_eq!(statistics.average(), None);
        assert_eq!(statistics.min(), None);
        assert_eq!(statistics.max(), None);
    }

    #[test]
    fn window_drops_oldest_sample() {
        let mut statistics = TimeStatistics::new(3);
        for millis in [10, 2, 4, 6] {
            statistics.add(ms(millis));
        }
        assert_eq!(statistics.len(), 3);
        assert_eq!(statistics.total_count(), 4);
        assert_eq!(statistics.average(), Some(ms(4)));
        assert_eq!(statistics.min(), Some(ms(2)));
        assert_eq!(statistics.max(), Some(ms(6)));
        assert_eq!(statistics.latest(), Some(ms(6)));
    }
}
