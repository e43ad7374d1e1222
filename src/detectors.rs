//! Event detectors
//!
//! Stateful single-purpose detectors that consume one scalar (or coordinate)
//! series and count discrete events. Debouncing is shared through
//! [`RefractoryGate`]; every threshold comes from the caller.

use crate::error::EngineError;
use crate::types::Point2;
use serde::{Deserialize, Serialize};

/// Common contract of every detector
pub trait EventDetector {
    type Sample: ?Sized;

    /// Feed one sample in temporal order.
    ///
    /// An error means the sample violated the detector's input contract; the
    /// detector stays usable and the caller decides whether to log and move on.
    fn update(&mut self, sample: &Self::Sample) -> Result<(), EngineError>;

    /// Number of events counted so far
    fn count(&self) -> u64;

    /// Number of samples accepted so far
    fn samples(&self) -> u64;

    /// Return to the freshly constructed state
    fn reset(&mut self);
}

/// Minimum sample gap between two triggers.
///
/// The gate starts open so the very first trigger always passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefractoryGate {
    min_gap: u64,
    last_trigger: Option<u64>,
}

impl RefractoryGate {
    pub fn new(min_gap: u64) -> Self {
        Self {
            min_gap,
            last_trigger: None,
        }
    }

    /// Whether a trigger at `index` would pass, without recording it
    pub fn is_open(&self, index: u64) -> bool {
        match self.last_trigger {
            None => true,
            Some(last) => index.saturating_sub(last) >= self.min_gap,
        }
    }

    /// Record a trigger at `index` if the gate is open; returns whether it passed.
    pub fn try_trigger(&mut self, index: u64) -> bool {
        if self.is_open(index) {
            self.last_trigger = Some(index);
            true
        } else {
            false
        }
    }

    pub fn last_trigger(&self) -> Option<u64> {
        self.last_trigger
    }

    pub fn reset(&mut self) {
        self.last_trigger = None;
    }
}

fn require_finite(name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::InputContract(format!("{name} sample is not finite")))
    }
}

// ============================================================================
// Threshold crossing (blink)
// ============================================================================

/// Counts downward crossings of a ratio metric below a threshold.
///
/// A crossing is a sample below the threshold whose predecessor was not. It
/// counts only if the refractory gate is open, so one sustained low reading is
/// one event and two dips closer than `min_gap` samples are one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCrossingDetector {
    threshold: f64,
    gate: RefractoryGate,
    below: bool,
    samples: u64,
    count: u64,
}

impl ThresholdCrossingDetector {
    pub fn new(threshold: f64, min_gap: u64) -> Self {
        Self {
            threshold,
            gate: RefractoryGate::new(min_gap),
            below: false,
            samples: 0,
            count: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl EventDetector for ThresholdCrossingDetector {
    type Sample = f64;

    fn update(&mut self, sample: &f64) -> Result<(), EngineError> {
        require_finite("threshold", *sample)?;
        let index = self.samples;
        self.samples += 1;

        let below = *sample < self.threshold;
        if below && !self.below && self.gate.try_trigger(index) {
            self.count += 1;
        }
        self.below = below;
        Ok(())
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn samples(&self) -> u64 {
        self.samples
    }

    fn reset(&mut self) {
        self.gate.reset();
        self.below = false;
        self.samples = 0;
        self.count = 0;
    }
}

// ============================================================================
// Directional change (head tilt, sway)
// ============================================================================

/// Sign of a value beyond the directional threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Negative,
    Positive,
}

/// Counts direction reversals of a signed series.
///
/// Values with `|v| > threshold` are classified by sign. A classification
/// counts when it differs from the last *triggered* direction. Once the series
/// has stayed inside the neutral band for `rearm_samples` consecutive samples,
/// the last triggered direction is cleared and the next excursion in either
/// direction counts again. Shorter dips into the band are boundary jitter and
/// do not re-arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionalChangeDetector {
    threshold: f64,
    rearm_samples: u64,
    gate: RefractoryGate,
    last_triggered: Option<Direction>,
    neutral_run: u64,
    samples: u64,
    count: u64,
}

impl DirectionalChangeDetector {
    pub fn new(threshold: f64, rearm_samples: u64, min_gap: u64) -> Self {
        Self {
            threshold,
            rearm_samples,
            gate: RefractoryGate::new(min_gap),
            last_triggered: None,
            neutral_run: 0,
            samples: 0,
            count: 0,
        }
    }

    /// Classify a value against the threshold
    pub fn classify(&self, value: f64) -> Option<Direction> {
        if value.abs() <= self.threshold {
            None
        } else if value < 0.0 {
            Some(Direction::Negative)
        } else {
            Some(Direction::Positive)
        }
    }

    pub fn last_triggered(&self) -> Option<Direction> {
        self.last_triggered
    }
}

impl EventDetector for DirectionalChangeDetector {
    type Sample = f64;

    fn update(&mut self, sample: &f64) -> Result<(), EngineError> {
        require_finite("directional", *sample)?;
        let index = self.samples;
        self.samples += 1;

        match self.classify(*sample) {
            Some(direction) => {
                self.neutral_run = 0;
                if self.last_triggered != Some(direction) && self.gate.try_trigger(index) {
                    self.count += 1;
                    self.last_triggered = Some(direction);
                }
            }
            None => {
                self.neutral_run += 1;
                if self.neutral_run >= self.rearm_samples {
                    self.last_triggered = None;
                }
            }
        }
        Ok(())
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn samples(&self) -> u64 {
        self.samples
    }

    fn reset(&mut self) {
        self.gate.reset();
        self.last_triggered = None;
        self.neutral_run = 0;
        self.samples = 0;
        self.count = 0;
    }
}

// ============================================================================
// Coupled limb (arm cross)
// ============================================================================

/// Elbow and shoulder positions of both arms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimbPairs {
    pub left_elbow: Point2,
    pub left_shoulder: Point2,
    pub right_elbow: Point2,
    pub right_shoulder: Point2,
}

impl LimbPairs {
    /// Both elbows pulled inward of their shoulders
    pub fn arms_crossed(&self) -> bool {
        self.left_elbow.x > self.left_shoulder.x && self.right_elbow.x < self.right_shoulder.x
    }
}

/// Counts every sample where the arm-cross predicate holds (no debounce)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoupledLimbDetector {
    samples: u64,
    count: u64,
}

impl CoupledLimbDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of samples where the predicate held (0 with no samples)
    pub fn ratio(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.count as f64 / self.samples as f64
        }
    }
}

impl EventDetector for CoupledLimbDetector {
    type Sample = LimbPairs;

    fn update(&mut self, sample: &LimbPairs) -> Result<(), EngineError> {
        self.samples += 1;
        if sample.arms_crossed() {
            self.count += 1;
        }
        Ok(())
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn samples(&self) -> u64 {
        self.samples
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Stillness
// ============================================================================

/// Norm used to measure displacement between consecutive coordinate sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementNorm {
    /// Square root of summed squared coordinate differences
    Euclidean,
    /// Summed absolute coordinate differences
    Manhattan,
}

impl DisplacementNorm {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let diffs = a.iter().zip(b).map(|(x, y)| x - y);
        match self {
            Self::Euclidean => diffs.map(|d| d * d).sum::<f64>().sqrt(),
            Self::Manhattan => diffs.map(f64::abs).sum(),
        }
    }
}

/// Flatten points into `[x0, y0, x1, y1, ...]`
pub fn flatten_points(points: &[Point2]) -> Vec<f64> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

/// Counts samples whose displacement from the previous sample is below a
/// movement threshold, and optionally samples above an activity threshold.
///
/// The first sample (and the first after a re-baseline) only establishes the
/// baseline and produces no judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StillnessDetector {
    threshold: f64,
    high_activity_threshold: Option<f64>,
    norm: DisplacementNorm,
    previous: Option<Vec<f64>>,
    samples: u64,
    judged: u64,
    still: u64,
    active: u64,
    last_displacement: Option<f64>,
    total_displacement: f64,
}

impl StillnessDetector {
    pub fn new(threshold: f64, norm: DisplacementNorm) -> Self {
        Self {
            threshold,
            high_activity_threshold: None,
            norm,
            previous: None,
            samples: 0,
            judged: 0,
            still: 0,
            active: 0,
            last_displacement: None,
            total_displacement: 0.0,
        }
    }

    /// Also count samples whose displacement exceeds `threshold`
    pub fn with_high_activity(mut self, threshold: f64) -> Self {
        self.high_activity_threshold = Some(threshold);
        self
    }

    /// Coordinate count of the current baseline, if any
    pub fn baseline_len(&self) -> Option<usize> {
        self.previous.as_ref().map(Vec::len)
    }

    /// Replace the baseline without judging the sample
    pub fn rebaseline(&mut self, coords: &[f64]) {
        self.previous = Some(coords.to_vec());
        self.last_displacement = None;
    }

    /// Samples that were compared against a baseline
    pub fn judged(&self) -> u64 {
        self.judged
    }

    pub fn active_count(&self) -> u64 {
        self.active
    }

    pub fn last_displacement(&self) -> Option<f64> {
        self.last_displacement
    }

    pub fn total_displacement(&self) -> f64 {
        self.total_displacement
    }
}

impl EventDetector for StillnessDetector {
    type Sample = [f64];

    /// A sample whose coordinate count differs from the baseline is a contract
    /// violation: it is not judged, becomes the new baseline, and an error is
    /// returned.
    fn update(&mut self, sample: &[f64]) -> Result<(), EngineError> {
        if sample.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InputContract(
                "keypoint set contains non-finite coordinates".to_string(),
            ));
        }
        self.samples += 1;

        let Some(previous) = self.previous.as_deref() else {
            self.rebaseline(sample);
            return Ok(());
        };

        if previous.len() != sample.len() {
            let expected = previous.len();
            self.rebaseline(sample);
            return Err(EngineError::InputContract(format!(
                "expected {expected} coordinates, got {}",
                sample.len()
            )));
        }

        let displacement = self.norm.distance(sample, previous);
        self.judged += 1;
        self.total_displacement += displacement;
        if displacement < self.threshold {
            self.still += 1;
        }
        if matches!(self.high_activity_threshold, Some(t) if displacement > t) {
            self.active += 1;
        }
        self.last_displacement = Some(displacement);
        self.previous = Some(sample.to_vec());
        Ok(())
    }

    fn count(&self) -> u64 {
        self.still
    }

    fn samples(&self) -> u64 {
        self.samples
    }

    fn reset(&mut self) {
        *self = Self {
            high_activity_threshold: self.high_activity_threshold,
            ..Self::new(self.threshold, self.norm)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed<D: EventDetector<Sample = f64>>(detector: &mut D, values: &[f64]) {
        for v in values {
            detector.update(v).unwrap();
        }
    }

    /// 100 open-eye frames with closed-eye readings at the given indices
    fn blink_series(closed_at: &[usize]) -> Vec<f64> {
        (0..100)
            .map(|i| if closed_at.contains(&i) { 1.0 } else { 8.0 })
            .collect()
    }

    #[test]
    fn test_refractory_gate_first_trigger_passes() {
        let mut gate = RefractoryGate::new(5);
        assert!(gate.try_trigger(0));
        assert!(!gate.try_trigger(4));
        assert!(gate.try_trigger(5));
        assert_eq!(gate.last_trigger(), Some(5));
    }

    #[test]
    fn test_blinks_within_min_gap_count_once() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 3);
        feed(&mut detector, &blink_series(&[10, 12]));
        assert_eq!(detector.count(), 1);
    }

    #[test]
    fn test_blinks_beyond_min_gap_count_twice() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 3);
        feed(&mut detector, &blink_series(&[10, 20]));
        assert_eq!(detector.count(), 2);
        assert_eq!(detector.samples(), 100);
    }

    #[test]
    fn test_blink_gap_exactly_min_gap_counts() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 3);
        feed(&mut detector, &blink_series(&[10, 13]));
        assert_eq!(detector.count(), 2);
    }

    #[test]
    fn test_sustained_closure_is_one_blink() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 3);
        feed(&mut detector, &blink_series(&(30..60).collect::<Vec<_>>()));
        assert_eq!(detector.count(), 1);
    }

    #[test]
    fn test_first_sample_below_threshold_counts() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 10);
        detector.update(&0.5).unwrap();
        assert_eq!(detector.count(), 1);
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 3);
        assert!(detector.update(&f64::NAN).is_err());
        assert_eq!(detector.samples(), 0);
    }

    #[test]
    fn test_directional_counts_reversals() {
        let mut detector = DirectionalChangeDetector::new(10.0, 3, 1);
        feed(&mut detector, &[15.0, 20.0, -15.0, -12.0, 14.0]);
        assert_eq!(detector.count(), 3);
        assert_eq!(detector.last_triggered(), Some(Direction::Positive));
    }

    #[test]
    fn test_directional_boundary_jitter_counts_once() {
        let mut detector = DirectionalChangeDetector::new(10.0, 3, 1);
        feed(&mut detector, &[11.0, 9.5, 10.5, 9.9, 12.0, 10.0, 11.0, 8.0, 13.0]);
        assert_eq!(detector.count(), 1);
    }

    #[test]
    fn test_directional_rearms_after_neutral_run() {
        let mut detector = DirectionalChangeDetector::new(10.0, 3, 1);
        feed(&mut detector, &[15.0, 0.0, 0.0, 0.0, 15.0]);
        assert_eq!(detector.count(), 2);
    }

    #[test]
    fn test_directional_respects_refractory_gap() {
        let mut detector = DirectionalChangeDetector::new(10.0, 3, 4);
        feed(&mut detector, &[15.0, -15.0, -15.0, -15.0, -15.0]);
        // The reversal at index 1 is inside the gap; index 4 is the first open slot
        assert_eq!(detector.count(), 2);
    }

    #[test]
    fn test_coupled_limb_ratio() {
        let crossed = LimbPairs {
            left_elbow: Point2::new(0.6, 0.5),
            left_shoulder: Point2::new(0.55, 0.3),
            right_elbow: Point2::new(0.4, 0.5),
            right_shoulder: Point2::new(0.45, 0.3),
        };
        let open = LimbPairs {
            left_elbow: Point2::new(0.5, 0.5),
            ..crossed
        };

        let mut detector = CoupledLimbDetector::new();
        assert_eq!(detector.ratio(), 0.0);
        for sample in [crossed, crossed, open, crossed] {
            detector.update(&sample).unwrap();
        }
        assert_eq!(detector.count(), 3);
        assert!((detector.ratio() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_stillness_first_sample_not_judged() {
        let mut detector = StillnessDetector::new(5.0, DisplacementNorm::Euclidean);
        detector.update(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        assert_eq!(detector.judged(), 0);
        assert_eq!(detector.count(), 0);
        assert_eq!(detector.samples(), 1);
    }

    #[test]
    fn test_stillness_euclidean_threshold() {
        let mut detector = StillnessDetector::new(5.0, DisplacementNorm::Euclidean);
        detector.update(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        detector.update(&[1.0, 1.0, 11.0, 11.0]).unwrap(); // norm 2.0
        detector.update(&[4.0, 5.0, 11.0, 11.0]).unwrap(); // norm 5.0, not still
        assert_eq!(detector.judged(), 2);
        assert_eq!(detector.count(), 1);
        assert!((detector.last_displacement().unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_stillness_manhattan_with_activity() {
        let mut detector =
            StillnessDetector::new(0.01, DisplacementNorm::Manhattan).with_high_activity(0.1);
        detector.update(&[0.5, 0.5]).unwrap();
        detector.update(&[0.505, 0.5]).unwrap();
        detector.update(&[0.7, 0.6]).unwrap();

        assert_eq!(detector.count(), 1);
        assert_eq!(detector.active_count(), 1);
        assert!((detector.total_displacement() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_stillness_shape_mismatch_rebaselines() {
        let mut detector = StillnessDetector::new(5.0, DisplacementNorm::Euclidean);
        detector.update(&[0.0, 0.0]).unwrap();

        let err = detector.update(&[0.0, 0.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, EngineError::InputContract(_)));
        assert_eq!(detector.baseline_len(), Some(4));

        detector.update(&[0.0, 0.0, 1.0, 1.0]).unwrap();
        assert_eq!(detector.count(), 1);
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut detector = ThresholdCrossingDetector::new(4.0, 3);
        feed(&mut detector, &[1.0, 8.0, 8.0, 8.0, 1.0]);
        assert_eq!(detector.count(), 2);

        detector.reset();
        assert_eq!(detector.count(), 0);
        assert_eq!(detector.samples(), 0);
        detector.update(&1.0).unwrap();
        assert_eq!(detector.count(), 1);
    }
}
