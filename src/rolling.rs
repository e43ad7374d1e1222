//! Rolling aggregation
//!
//! Bounded-memory running statistics per named metric: a trailing window for
//! recency-weighted means plus an unbounded sum/count for all-time means.
//! Memory is O(capacity x metrics) regardless of session length.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hash;

/// Default trailing window size in samples
pub const DEFAULT_WINDOW_CAPACITY: usize = 30;

/// Trailing window and lifetime totals of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWindow {
    values: VecDeque<f64>,
    capacity: usize,
    lifetime_sum: f64,
    lifetime_count: u64,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            lifetime_sum: 0.0,
            lifetime_count: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
        self.lifetime_sum += value;
        self.lifetime_count += 1;
    }

    /// Mean of the values currently in the window (0 when empty)
    pub fn recent_mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Mean of every value ever pushed (0 when none)
    pub fn lifetime_mean(&self) -> f64 {
        if self.lifetime_count == 0 {
            return 0.0;
        }
        self.lifetime_sum / self.lifetime_count as f64
    }

    pub fn lifetime_sum(&self) -> f64 {
        self.lifetime_sum
    }

    pub fn lifetime_count(&self) -> u64 {
        self.lifetime_count
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Running statistics for a set of named metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingAggregator {
    capacity: usize,
    metrics: BTreeMap<String, MetricWindow>,
    started_at: DateTime<Utc>,
}

impl RollingAggregator {
    /// Create an aggregator whose clock starts now
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        Self::starting_at(capacity, Utc::now())
    }

    /// Create an aggregator with an explicit start time
    pub fn starting_at(capacity: usize, started_at: DateTime<Utc>) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::invalid_config("window.capacity", "must be > 0"));
        }
        Ok(Self {
            capacity,
            metrics: BTreeMap::new(),
            started_at,
        })
    }

    /// Append a value to the metric's window and lifetime totals.
    ///
    /// Non-finite values are rejected and leave the metric untouched.
    pub fn push(&mut self, metric: &str, value: f64) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InputContract(format!(
                "metric `{metric}` received a non-finite value"
            )));
        }
        let capacity = self.capacity;
        self.metrics
            .entry(metric.to_string())
            .or_insert_with(|| MetricWindow::new(capacity))
            .push(value);
        Ok(())
    }

    /// Mean of the last <= capacity values of `metric` (0 if none)
    pub fn recent_mean(&self, metric: &str) -> f64 {
        self.metrics.get(metric).map_or(0.0, MetricWindow::recent_mean)
    }

    /// All-time mean of `metric` (0 if none)
    pub fn lifetime_mean(&self, metric: &str) -> f64 {
        self.metrics.get(metric).map_or(0.0, MetricWindow::lifetime_mean)
    }

    pub fn window(&self, metric: &str) -> Option<&MetricWindow> {
        self.metrics.get(metric)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock minutes since the aggregator was created
    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_minutes_at(Utc::now())
    }

    /// Minutes between the start time and `now` (never negative)
    pub fn elapsed_minutes_at(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.started_at).num_milliseconds().max(0);
        millis as f64 / 60_000.0
    }

    /// Move the start time, keeping every metric
    pub fn anchor_at(&mut self, started_at: DateTime<Utc>) {
        self.started_at = started_at;
    }

    /// Drop every metric and restart the clock
    pub fn reset_at(&mut self, started_at: DateTime<Utc>) {
        self.metrics.clear();
        self.started_at = started_at;
    }
}

/// Trailing window of categorical labels with a recency-aware mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeWindow<T> {
    labels: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy + Eq + Hash> ModeWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, label: T) {
        self.labels.push_back(label);
        while self.labels.len() > self.capacity {
            self.labels.pop_front();
        }
    }

    /// Most frequent label in the window.
    ///
    /// Ties go to the label whose latest occurrence is most recent.
    pub fn mode(&self) -> Option<T> {
        // label -> (count, index of last occurrence)
        let mut tally: HashMap<T, (usize, usize)> = HashMap::new();
        for (i, label) in self.labels.iter().enumerate() {
            let entry = tally.entry(*label).or_insert((0, i));
            entry.0 += 1;
            entry.1 = i;
        }
        tally
            .into_iter()
            .max_by_key(|(_, (count, last))| (*count, *last))
            .map(|(label, _)| label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GazeDirection;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 21, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_recent_mean_bounded_by_capacity() {
        let mut agg = RollingAggregator::starting_at(3, start()).unwrap();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            agg.push("eye", v).unwrap();
        }

        // Only 30, 40, 50 remain in the window
        assert!((agg.recent_mean("eye") - 40.0).abs() < 1e-12);
        assert_eq!(agg.window("eye").unwrap().len(), 3);
    }

    #[test]
    fn test_lifetime_mean_covers_all_values() {
        let mut agg = RollingAggregator::starting_at(2, start()).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            agg.push("tilt", v).unwrap();
        }

        assert!((agg.lifetime_mean("tilt") - 3.5).abs() < 1e-12);
        assert_eq!(agg.window("tilt").unwrap().lifetime_count(), 6);
    }

    #[test]
    fn test_unknown_metric_means_are_zero() {
        let agg = RollingAggregator::starting_at(5, start()).unwrap();
        assert_eq!(agg.recent_mean("missing"), 0.0);
        assert_eq!(agg.lifetime_mean("missing"), 0.0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            RollingAggregator::new(0),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_non_finite_push_rejected() {
        let mut agg = RollingAggregator::starting_at(5, start()).unwrap();
        agg.push("mouth", 2.0).unwrap();
        assert!(agg.push("mouth", f64::INFINITY).is_err());
        assert_eq!(agg.lifetime_mean("mouth"), 2.0);
    }

    #[test]
    fn test_elapsed_minutes() {
        let agg = RollingAggregator::starting_at(5, start()).unwrap();
        let later = start() + Duration::seconds(90);

        assert!((agg.elapsed_minutes_at(later) - 1.5).abs() < 1e-12);
        assert_eq!(agg.elapsed_minutes_at(start() - Duration::seconds(10)), 0.0);
    }

    #[test]
    fn test_gaze_mode_majority() {
        let mut window = ModeWindow::new(4);
        for g in [
            GazeDirection::Left,
            GazeDirection::Left,
            GazeDirection::Center,
            GazeDirection::Left,
        ] {
            window.push(g);
        }
        assert_eq!(window.mode(), Some(GazeDirection::Left));
    }

    #[test]
    fn test_mode_tie_goes_to_most_recent() {
        let mut window = ModeWindow::new(4);
        for g in [
            GazeDirection::Right,
            GazeDirection::Center,
            GazeDirection::Center,
            GazeDirection::Right,
        ] {
            window.push(g);
        }
        assert_eq!(window.mode(), Some(GazeDirection::Right));
    }

    #[test]
    fn test_mode_window_evicts_oldest() {
        let mut window = ModeWindow::new(2);
        window.push(GazeDirection::Left);
        window.push(GazeDirection::Left);
        window.push(GazeDirection::Right);
        window.push(GazeDirection::Right);
        assert_eq!(window.len(), 2);
        assert_eq!(window.mode(), Some(GazeDirection::Right));
    }

    #[test]
    fn test_empty_mode_is_none() {
        let window: ModeWindow<GazeDirection> = ModeWindow::new(3);
        assert_eq!(window.mode(), None);
    }
}
