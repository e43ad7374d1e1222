//! Behavioral state estimation
//!
//! Folds the current detector counts and recent rolling means into categorical
//! labels through a fixed rule table. The estimator owns nothing but its
//! thresholds: the same inputs always yield the same labels.

use crate::config::{EstimatorConfig, FaceConfig};
use crate::detectors::{DirectionalChangeDetector, EventDetector, ThresholdCrossingDetector};
use crate::rolling::{ModeWindow, RollingAggregator};
use crate::types::{BehaviorEstimate, GazeDirection, StateLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling metric holding per-frame mean eye openness
pub const EYE_OPENNESS: &str = "eye_openness";
/// Rolling metric holding per-frame mouth openness
pub const MOUTH_OPENNESS: &str = "mouth_openness";
/// Rolling metric holding per-frame absolute head tilt
pub const TILT_MAGNITUDE: &str = "tilt_magnitude";
/// Rolling metric holding per-frame smile score
pub const SMILE_SCORE: &str = "smile_score";

/// Classify one eye's iris ratio
pub fn classify_iris(ratio: f64, face: &FaceConfig) -> GazeDirection {
    if ratio < face.iris_left_max {
        GazeDirection::Left
    } else if ratio > face.iris_right_min {
        GazeDirection::Right
    } else {
        GazeDirection::Center
    }
}

/// Classify a frame's gaze from whichever iris ratios are present.
///
/// Disagreeing eyes yield `Uncertain`; no ratios yields `None` (no update).
pub fn classify_frame_gaze(
    left: Option<f64>,
    right: Option<f64>,
    face: &FaceConfig,
) -> Option<GazeDirection> {
    match (left, right) {
        (Some(l), Some(r)) => {
            let (l, r) = (classify_iris(l, face), classify_iris(r, face));
            Some(if l == r { l } else { GazeDirection::Uncertain })
        }
        (Some(v), None) | (None, Some(v)) => Some(classify_iris(v, face)),
        (None, None) => None,
    }
}

/// Detectors the estimator reads from a face session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetectors {
    pub blink: ThresholdCrossingDetector,
    pub tilt: DirectionalChangeDetector,
    pub gaze: ModeWindow<GazeDirection>,
}

impl FaceDetectors {
    pub fn new(face: &FaceConfig, gaze_window: usize) -> Self {
        Self {
            blink: ThresholdCrossingDetector::new(face.blink_threshold, face.blink_min_gap),
            tilt: DirectionalChangeDetector::new(
                face.tilt_threshold_deg,
                face.tilt_rearm_samples,
                face.tilt_min_gap,
            ),
            gaze: ModeWindow::new(gaze_window),
        }
    }

    pub fn reset(&mut self) {
        self.blink.reset();
        self.tilt.reset();
        self.gaze.clear();
    }
}

/// Event counts normalized by elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventRates {
    pub elapsed_min: f64,
    pub blink_rate_per_min: f64,
    pub tilt_rate_per_min: f64,
}

/// Rule-table estimator of confidence, engagement, nervousness and authenticity
#[derive(Debug, Clone)]
pub struct StateEstimator {
    rules: EstimatorConfig,
    epsilon_min: f64,
}

impl StateEstimator {
    pub fn new(rules: EstimatorConfig, epsilon_min: f64) -> Self {
        Self { rules, epsilon_min }
    }

    /// Per-minute event rates as of `now`
    pub fn rates_at(
        &self,
        aggregator: &RollingAggregator,
        detectors: &FaceDetectors,
        now: DateTime<Utc>,
    ) -> EventRates {
        let elapsed_min = aggregator.elapsed_minutes_at(now);
        let denom = elapsed_min + self.epsilon_min;
        EventRates {
            elapsed_min,
            blink_rate_per_min: detectors.blink.count() as f64 / denom,
            tilt_rate_per_min: detectors.tilt.count() as f64 / denom,
        }
    }

    /// Estimate labels against the wall clock
    pub fn estimate(
        &self,
        aggregator: &RollingAggregator,
        detectors: &FaceDetectors,
    ) -> BehaviorEstimate {
        self.estimate_at(aggregator, detectors, Utc::now())
    }

    /// Estimate labels as of `now`
    pub fn estimate_at(
        &self,
        aggregator: &RollingAggregator,
        detectors: &FaceDetectors,
        now: DateTime<Utc>,
    ) -> BehaviorEstimate {
        let r = &self.rules;
        let blink_rate = self.rates_at(aggregator, detectors, now).blink_rate_per_min;
        let eye = aggregator.recent_mean(EYE_OPENNESS);
        let mouth = aggregator.recent_mean(MOUTH_OPENNESS);
        let tilt = aggregator.recent_mean(TILT_MAGNITUDE);
        let gaze = detectors.gaze.mode().unwrap_or(GazeDirection::Uncertain);

        let confidence = level(
            tilt < r.confident_tilt_max && eye > r.open_eye_min && blink_rate < r.calm_blink_rate_max,
        );
        let engagement = level(
            eye > r.engaged_eye_min
                && blink_rate > r.engaged_blink_rate_min
                && gaze == GazeDirection::Center,
        );
        let nervousness = level(blink_rate > r.nervous_blink_rate_min || tilt > r.nervous_tilt_min);
        let authenticity = if mouth > r.authentic_mouth_min && eye > r.open_eye_min {
            StateLevel::High
        } else {
            StateLevel::Uncertain
        };

        BehaviorEstimate {
            confidence,
            engagement,
            nervousness,
            authenticity,
            gaze,
        }
    }
}

fn level(high: bool) -> StateLevel {
    if high {
        StateLevel::High
    } else {
        StateLevel::Low
    }
}

/// One throttled snapshot of a face session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub elapsed_sec: f64,
    pub blink_count: u64,
    pub head_tilt_count: u64,
    pub smiling: bool,
    pub estimate: BehaviorEstimate,
}

/// Estimate log that accepts at most one entry per interval.
///
/// Uncapped, it grows by one entry per interval for the whole session and
/// every encoded payload carries all of it. With a cap set, the oldest entry
/// is dropped once the log is full.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateTimeline {
    interval_sec: f64,
    max_entries: Option<usize>,
    last_recorded: Option<DateTime<Utc>>,
    entries: Vec<TimelineEntry>,
}

impl EstimateTimeline {
    pub fn new(interval_sec: f64) -> Self {
        Self {
            interval_sec,
            max_entries: None,
            last_recorded: None,
            entries: Vec::new(),
        }
    }

    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Whether an entry at `now` would be accepted
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_recorded {
            None => true,
            Some(last) => (now - last).num_milliseconds() as f64 / 1000.0 >= self.interval_sec,
        }
    }

    /// Record `entry` if the interval has elapsed; returns whether it was kept
    pub fn record(&mut self, now: DateTime<Utc>, entry: TimelineEntry) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_recorded = Some(now);
        if let Some(max) = self.max_entries {
            while self.entries.len() >= max.max(1) {
                self.entries.remove(0);
            }
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.last_recorded = None;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 21, 10, 0, 0).unwrap()
    }

    fn make_estimator() -> StateEstimator {
        StateEstimator::new(EstimatorConfig::default(), 1e-6)
    }

    fn make_detectors() -> FaceDetectors {
        FaceDetectors::new(&FaceConfig::default(), 4)
    }

    /// Aggregator with `frames` identical face readings
    fn make_aggregator(frames: usize, eye: f64, mouth: f64, tilt: f64) -> RollingAggregator {
        let mut agg = RollingAggregator::starting_at(30, start()).unwrap();
        for _ in 0..frames {
            agg.push(EYE_OPENNESS, eye).unwrap();
            agg.push(MOUTH_OPENNESS, mouth).unwrap();
            agg.push(TILT_MAGNITUDE, tilt).unwrap();
        }
        agg
    }

    /// Register `n` well-separated blinks
    fn add_blinks(detectors: &mut FaceDetectors, n: usize) {
        for _ in 0..n {
            detectors.blink.update(&1.0).unwrap();
            for _ in 0..5 {
                detectors.blink.update(&8.0).unwrap();
            }
        }
    }

    #[test]
    fn test_iris_classification_bands() {
        let face = FaceConfig::default();
        assert_eq!(classify_iris(0.2, &face), GazeDirection::Left);
        assert_eq!(classify_iris(0.35, &face), GazeDirection::Center);
        assert_eq!(classify_iris(0.5, &face), GazeDirection::Center);
        assert_eq!(classify_iris(0.65, &face), GazeDirection::Center);
        assert_eq!(classify_iris(0.8, &face), GazeDirection::Right);
    }

    #[test]
    fn test_disagreeing_eyes_are_uncertain() {
        let face = FaceConfig::default();
        assert_eq!(
            classify_frame_gaze(Some(0.2), Some(0.8), &face),
            Some(GazeDirection::Uncertain)
        );
        assert_eq!(
            classify_frame_gaze(Some(0.5), Some(0.6), &face),
            Some(GazeDirection::Center)
        );
        assert_eq!(classify_frame_gaze(None, Some(0.9), &face), Some(GazeDirection::Right));
        assert_eq!(classify_frame_gaze(None, None, &face), None);
    }

    #[test]
    fn test_confident_engaged_speaker() {
        let agg = make_aggregator(30, 6.0, 1.0, 3.0);
        let mut detectors = make_detectors();
        add_blinks(&mut detectors, 15);
        for _ in 0..4 {
            detectors.gaze.push(GazeDirection::Center);
        }

        // 15 blinks over one minute
        let estimate = make_estimator().estimate_at(&agg, &detectors, start() + Duration::minutes(1));

        assert_eq!(estimate.confidence, StateLevel::High);
        assert_eq!(estimate.engagement, StateLevel::High);
        assert_eq!(estimate.nervousness, StateLevel::Low);
        assert_eq!(estimate.authenticity, StateLevel::Uncertain);
        assert_eq!(estimate.gaze, GazeDirection::Center);
    }

    #[test]
    fn test_rapid_blinking_reads_nervous() {
        let agg = make_aggregator(30, 6.0, 3.0, 3.0);
        let mut detectors = make_detectors();
        add_blinks(&mut detectors, 40);

        let estimate = make_estimator().estimate_at(&agg, &detectors, start() + Duration::minutes(1));

        assert_eq!(estimate.nervousness, StateLevel::High);
        assert_eq!(estimate.confidence, StateLevel::Low);
        assert_eq!(estimate.authenticity, StateLevel::High);
    }

    #[test]
    fn test_large_tilt_reads_nervous() {
        let agg = make_aggregator(30, 6.0, 1.0, 20.0);
        let detectors = make_detectors();

        let estimate = make_estimator().estimate_at(&agg, &detectors, start() + Duration::minutes(2));
        assert_eq!(estimate.nervousness, StateLevel::High);
        assert_eq!(estimate.confidence, StateLevel::Low);
    }

    #[test]
    fn test_engagement_requires_center_gaze() {
        let agg = make_aggregator(30, 6.0, 1.0, 3.0);
        let mut detectors = make_detectors();
        add_blinks(&mut detectors, 15);
        for g in [GazeDirection::Left, GazeDirection::Left, GazeDirection::Center, GazeDirection::Left] {
            detectors.gaze.push(g);
        }

        let estimate = make_estimator().estimate_at(&agg, &detectors, start() + Duration::minutes(1));
        assert_eq!(estimate.gaze, GazeDirection::Left);
        assert_eq!(estimate.engagement, StateLevel::Low);
    }

    #[test]
    fn test_empty_session_estimate() {
        let agg = RollingAggregator::starting_at(30, start()).unwrap();
        let detectors = make_detectors();

        let estimate = make_estimator().estimate_at(&agg, &detectors, start());
        assert_eq!(estimate.confidence, StateLevel::Low);
        assert_eq!(estimate.engagement, StateLevel::Low);
        assert_eq!(estimate.nervousness, StateLevel::Low);
        assert_eq!(estimate.authenticity, StateLevel::Uncertain);
        assert_eq!(estimate.gaze, GazeDirection::Uncertain);
    }

    #[test]
    fn test_estimate_is_idempotent() {
        let agg = make_aggregator(10, 5.5, 2.5, 8.0);
        let mut detectors = make_detectors();
        add_blinks(&mut detectors, 3);
        let now = start() + Duration::seconds(45);
        let estimator = make_estimator();

        assert_eq!(
            estimator.estimate_at(&agg, &detectors, now),
            estimator.estimate_at(&agg, &detectors, now)
        );
    }

    #[test]
    fn test_rates_at_session_start_are_finite() {
        let agg = RollingAggregator::starting_at(30, start()).unwrap();
        let mut detectors = make_detectors();
        add_blinks(&mut detectors, 1);

        let rates = make_estimator().rates_at(&agg, &detectors, start());
        assert!(rates.blink_rate_per_min.is_finite());
        assert_eq!(rates.elapsed_min, 0.0);
    }

    #[test]
    fn test_timeline_throttles_entries() {
        let mut timeline = EstimateTimeline::new(1.0);
        let entry = TimelineEntry {
            elapsed_sec: 0.0,
            blink_count: 0,
            head_tilt_count: 0,
            smiling: false,
            estimate: BehaviorEstimate {
                confidence: StateLevel::Low,
                engagement: StateLevel::Low,
                nervousness: StateLevel::Low,
                authenticity: StateLevel::Uncertain,
                gaze: GazeDirection::Center,
            },
        };

        assert!(timeline.record(start(), entry.clone()));
        assert!(!timeline.record(start() + Duration::milliseconds(400), entry.clone()));
        assert!(timeline.record(start() + Duration::milliseconds(1000), entry));
        assert_eq!(timeline.entries().len(), 2);
    }

    #[test]
    fn test_capped_timeline_keeps_latest() {
        let mut timeline = EstimateTimeline::new(1.0).with_max_entries(Some(2));
        for i in 0..5 {
            let entry = TimelineEntry {
                elapsed_sec: i as f64,
                blink_count: 0,
                head_tilt_count: 0,
                smiling: false,
                estimate: BehaviorEstimate {
                    confidence: StateLevel::Low,
                    engagement: StateLevel::Low,
                    nervousness: StateLevel::Low,
                    authenticity: StateLevel::Uncertain,
                    gaze: GazeDirection::Center,
                },
            };
            timeline.record(start() + Duration::seconds(i), entry);
        }

        let kept: Vec<f64> = timeline.entries().iter().map(|e| e.elapsed_sec).collect();
        assert_eq!(kept, vec![3.0, 4.0]);
    }
}
