//! Engine configuration
//!
//! Every threshold, window size and weight the engine uses lives here, in one
//! structure injected at construction. Defaults reproduce the tuning the
//! trackers shipped with; callers override individual fields and must call
//! [`EngineConfig::validate`] (every constructor does) before processing samples.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tolerance applied when checking that a weight set sums to 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub face: FaceConfig,
    pub body: BodyConfig,
    pub hand: HandConfig,
    pub estimator: EstimatorConfig,
    pub scoring: ScoringConfig,
}

/// Rolling window sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of most recent samples kept per metric
    pub capacity: usize,
    /// Number of most recent gaze classifications used for the gaze mode
    pub gaze_window: usize,
    /// Added to elapsed minutes before dividing event counts into rates
    pub min_elapsed_epsilon_min: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            gaze_window: 30,
            min_elapsed_epsilon_min: 1e-6,
        }
    }
}

/// Facial detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Eye openness below which a frame counts as closed
    pub blink_threshold: f64,
    /// Minimum samples between two counted blinks
    pub blink_min_gap: u64,
    /// Absolute head tilt (degrees) beyond which a direction is classified
    pub tilt_threshold_deg: f64,
    /// Consecutive neutral samples before the tilt direction re-arms
    pub tilt_rearm_samples: u64,
    /// Minimum samples between two counted tilt changes
    pub tilt_min_gap: u64,
    /// Iris ratios below this look left
    pub iris_left_max: f64,
    /// Iris ratios above this look right
    pub iris_right_min: f64,
    /// Added to eye openness when computing the smile score
    pub smile_epsilon: f64,
    /// Smile scores in this open interval mark a frame as smiling
    pub smile_min: f64,
    pub smile_max: f64,
    /// Minimum spacing between two timeline entries
    pub timeline_interval_sec: f64,
    /// Keep only the most recent entries; `None` keeps the whole session
    pub timeline_max_entries: Option<usize>,
    /// Capture rate used to clock frames that carry no timestamp
    pub frames_per_second: f64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            blink_threshold: 4.0,
            blink_min_gap: 3,
            tilt_threshold_deg: 10.0,
            tilt_rearm_samples: 3,
            tilt_min_gap: 1,
            iris_left_max: 0.35,
            iris_right_min: 0.65,
            smile_epsilon: 1e-5,
            smile_min: 0.5,
            smile_max: 2.0,
            timeline_interval_sec: 1.0,
            timeline_max_entries: None,
            frames_per_second: 30.0,
        }
    }
}

/// Full body detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Keypoint displacement (pixels, Euclidean) below which a frame is still
    pub still_threshold: f64,
    /// Signed shoulder offset from frame center beyond which sway has a direction
    pub sway_threshold: f64,
    /// Consecutive centered samples before the sway direction re-arms
    pub sway_rearm_samples: u64,
    /// Minimum samples between two counted sway changes
    pub sway_min_gap: u64,
    /// Capture rate used to turn frame counts into durations
    pub frames_per_second: f64,
    /// Spine angle above which posture is upright
    pub upright_angle_deg: f64,
    /// Spine angle above which posture is acceptable
    pub slouch_angle_deg: f64,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            still_threshold: 5.0,
            sway_threshold: 0.05,
            sway_rearm_samples: 3,
            sway_min_gap: 1,
            frames_per_second: 30.0,
            upright_angle_deg: 160.0,
            slouch_angle_deg: 140.0,
        }
    }
}

/// Hand tracking thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandConfig {
    /// Centroid displacement (normalized, L1) below which a frame is still
    pub still_threshold: f64,
    /// Centroid displacement above which a frame is highly active
    pub high_activity_threshold: f64,
    pub frames_per_second: f64,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            still_threshold: 0.01,
            high_activity_threshold: 0.1,
            frames_per_second: 30.0,
        }
    }
}

/// Behavioral state rule thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Confident speakers keep mean tilt magnitude below this (degrees)
    pub confident_tilt_max: f64,
    /// Eyes count as open above this mean openness
    pub open_eye_min: f64,
    /// Confident speakers blink less often than this per minute
    pub calm_blink_rate_max: f64,
    /// Engaged speakers keep mean eye openness above this
    pub engaged_eye_min: f64,
    /// Engaged speakers blink at least this often per minute
    pub engaged_blink_rate_min: f64,
    /// Blink rate above which a speaker reads as nervous
    pub nervous_blink_rate_min: f64,
    /// Mean tilt magnitude above which a speaker reads as nervous
    pub nervous_tilt_min: f64,
    /// Mean mouth openness above which expressions read as authentic
    pub authentic_mouth_min: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            confident_tilt_max: 10.0,
            open_eye_min: 5.0,
            calm_blink_rate_max: 25.0,
            engaged_eye_min: 4.0,
            engaged_blink_rate_min: 8.0,
            nervous_blink_rate_min: 30.0,
            nervous_tilt_min: 15.0,
            authentic_mouth_min: 2.0,
        }
    }
}

/// Weights of the fluency sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluencyWeights {
    pub pace: f64,
    pub filler: f64,
    pub pause: f64,
}

impl Default for FluencyWeights {
    fn default() -> Self {
        Self {
            pace: 0.4,
            filler: 0.3,
            pause: 0.3,
        }
    }
}

impl FluencyWeights {
    fn sum(&self) -> f64 {
        self.pace + self.filler + self.pause
    }
}

/// Weights of the overall score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverallWeights {
    pub fluency: f64,
    pub vocabulary: f64,
    pub confidence: f64,
    pub melody: f64,
    pub pronunciation: f64,
}

impl Default for OverallWeights {
    fn default() -> Self {
        Self {
            fluency: 0.3,
            vocabulary: 0.2,
            confidence: 0.2,
            melody: 0.1,
            pronunciation: 0.2,
        }
    }
}

impl OverallWeights {
    fn sum(&self) -> f64 {
        self.fluency + self.vocabulary + self.confidence + self.melody + self.pronunciation
    }
}

/// Voice scoring transforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub ideal_wpm: f64,
    /// Points lost per word-per-minute away from the ideal pace
    pub pace_penalty_per_wpm: f64,
    /// Points lost per unit of filler ratio
    pub filler_penalty: f64,
    /// Points lost per unit of pause-to-duration ratio
    pub pause_penalty: f64,
    pub vocabulary_scale: f64,
    pub melody_scale: f64,
    pub anxiety_scale: f64,
    /// Fixed pronunciation score until a reference-based scorer exists
    pub pronunciation_placeholder: f64,
    pub fluency_weights: FluencyWeights,
    pub overall_weights: OverallWeights,
    /// Added to denominators so the formulas stay continuous at zero
    pub epsilon: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ideal_wpm: 150.0,
            pace_penalty_per_wpm: 0.5,
            filler_penalty: 400.0,
            pause_penalty: 200.0,
            vocabulary_scale: 3000.0,
            melody_scale: 10.0,
            anxiety_scale: 5000.0,
            pronunciation_placeholder: 80.0,
            fluency_weights: FluencyWeights::default(),
            overall_weights: OverallWeights::default(),
            epsilon: 1e-9,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from a JSON string.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Serialize the configuration to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every constant against its valid range.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.window.validate()?;
        self.face.validate()?;
        self.body.validate()?;
        self.hand.validate()?;
        self.estimator.validate()?;
        self.scoring.validate()
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.capacity == 0 {
            return Err(EngineError::invalid_config("window.capacity", "must be > 0"));
        }
        if self.gaze_window == 0 {
            return Err(EngineError::invalid_config("window.gaze_window", "must be > 0"));
        }
        positive("window.min_elapsed_epsilon_min", self.min_elapsed_epsilon_min)
    }
}

impl FaceConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        non_negative("face.blink_threshold", self.blink_threshold)?;
        if self.blink_min_gap == 0 {
            return Err(EngineError::invalid_config("face.blink_min_gap", "must be > 0"));
        }
        non_negative("face.tilt_threshold_deg", self.tilt_threshold_deg)?;
        if self.tilt_rearm_samples == 0 {
            return Err(EngineError::invalid_config("face.tilt_rearm_samples", "must be > 0"));
        }
        if self.tilt_min_gap == 0 {
            return Err(EngineError::invalid_config("face.tilt_min_gap", "must be > 0"));
        }
        unit_interval("face.iris_left_max", self.iris_left_max)?;
        unit_interval("face.iris_right_min", self.iris_right_min)?;
        if self.iris_left_max > self.iris_right_min {
            return Err(EngineError::invalid_config(
                "face.iris_left_max",
                "must not exceed face.iris_right_min",
            ));
        }
        positive("face.smile_epsilon", self.smile_epsilon)?;
        non_negative("face.smile_min", self.smile_min)?;
        positive("face.smile_max", self.smile_max)?;
        if self.smile_min >= self.smile_max {
            return Err(EngineError::invalid_config(
                "face.smile_min",
                "must be below face.smile_max",
            ));
        }
        non_negative("face.timeline_interval_sec", self.timeline_interval_sec)?;
        if self.timeline_max_entries == Some(0) {
            return Err(EngineError::invalid_config(
                "face.timeline_max_entries",
                "must be > 0 when set",
            ));
        }
        positive("face.frames_per_second", self.frames_per_second)
    }
}

impl BodyConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        non_negative("body.still_threshold", self.still_threshold)?;
        non_negative("body.sway_threshold", self.sway_threshold)?;
        if self.sway_rearm_samples == 0 {
            return Err(EngineError::invalid_config("body.sway_rearm_samples", "must be > 0"));
        }
        if self.sway_min_gap == 0 {
            return Err(EngineError::invalid_config("body.sway_min_gap", "must be > 0"));
        }
        positive("body.frames_per_second", self.frames_per_second)?;
        non_negative("body.slouch_angle_deg", self.slouch_angle_deg)?;
        non_negative("body.upright_angle_deg", self.upright_angle_deg)?;
        if self.slouch_angle_deg > self.upright_angle_deg || self.upright_angle_deg > 180.0 {
            return Err(EngineError::invalid_config(
                "body.upright_angle_deg",
                "must lie between body.slouch_angle_deg and 180",
            ));
        }
        Ok(())
    }
}

impl HandConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        non_negative("hand.still_threshold", self.still_threshold)?;
        non_negative("hand.high_activity_threshold", self.high_activity_threshold)?;
        if self.high_activity_threshold < self.still_threshold {
            return Err(EngineError::invalid_config(
                "hand.high_activity_threshold",
                "must not be below hand.still_threshold",
            ));
        }
        positive("hand.frames_per_second", self.frames_per_second)
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        non_negative("estimator.confident_tilt_max", self.confident_tilt_max)?;
        non_negative("estimator.open_eye_min", self.open_eye_min)?;
        non_negative("estimator.calm_blink_rate_max", self.calm_blink_rate_max)?;
        non_negative("estimator.engaged_eye_min", self.engaged_eye_min)?;
        non_negative("estimator.engaged_blink_rate_min", self.engaged_blink_rate_min)?;
        non_negative("estimator.nervous_blink_rate_min", self.nervous_blink_rate_min)?;
        non_negative("estimator.nervous_tilt_min", self.nervous_tilt_min)?;
        non_negative("estimator.authentic_mouth_min", self.authentic_mouth_min)
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        non_negative("scoring.ideal_wpm", self.ideal_wpm)?;
        non_negative("scoring.pace_penalty_per_wpm", self.pace_penalty_per_wpm)?;
        non_negative("scoring.filler_penalty", self.filler_penalty)?;
        non_negative("scoring.pause_penalty", self.pause_penalty)?;
        non_negative("scoring.vocabulary_scale", self.vocabulary_scale)?;
        non_negative("scoring.melody_scale", self.melody_scale)?;
        non_negative("scoring.anxiety_scale", self.anxiety_scale)?;
        if !(0.0..=100.0).contains(&self.pronunciation_placeholder) {
            return Err(EngineError::invalid_config(
                "scoring.pronunciation_placeholder",
                "must lie in [0, 100]",
            ));
        }
        positive("scoring.epsilon", self.epsilon)?;

        let fw = &self.fluency_weights;
        for (name, w) in [
            ("scoring.fluency_weights.pace", fw.pace),
            ("scoring.fluency_weights.filler", fw.filler),
            ("scoring.fluency_weights.pause", fw.pause),
        ] {
            non_negative(name, w)?;
        }
        weights_sum_to_one("scoring.fluency_weights", fw.sum())?;

        let ow = &self.overall_weights;
        for (name, w) in [
            ("scoring.overall_weights.fluency", ow.fluency),
            ("scoring.overall_weights.vocabulary", ow.vocabulary),
            ("scoring.overall_weights.confidence", ow.confidence),
            ("scoring.overall_weights.melody", ow.melody),
            ("scoring.overall_weights.pronunciation", ow.pronunciation),
        ] {
            non_negative(name, w)?;
        }
        weights_sum_to_one("scoring.overall_weights", ow.sum())
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), EngineError> {
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::invalid_config(field, "must be finite and >= 0"));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<(), EngineError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EngineError::invalid_config(field, "must be finite and > 0"));
    }
    Ok(())
}

fn unit_interval(field: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::invalid_config(field, "must lie in [0, 1]"));
    }
    Ok(())
}

fn weights_sum_to_one(field: &str, sum: f64) -> Result<(), EngineError> {
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(EngineError::invalid_config(
            field,
            format!("weights must sum to 1.0 (got {sum})"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_window_capacity_rejected() {
        let mut config = EngineConfig::default();
        config.window.capacity = 0;

        match config.validate() {
            Err(EngineError::InvalidConfig { field, .. }) => assert_eq!(field, "window.capacity"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_overall_weights_must_sum_to_one() {
        let mut config = EngineConfig::default();
        config.scoring.overall_weights.melody = 0.3;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scoring.overall_weights"));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.body.still_threshold = -1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.hand.still_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_range_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.body.upright_angle_deg = f64::NAN;
        match config.validate() {
            Err(EngineError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "body.upright_angle_deg")
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }

        let mut config = EngineConfig::default();
        config.face.smile_max = f64::NAN;
        match config.validate() {
            Err(EngineError::InvalidConfig { field, .. }) => assert_eq!(field, "face.smile_max"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }

        let mut config = EngineConfig::default();
        config.face.smile_max = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_gaps_and_caps_rejected() {
        let mut config = EngineConfig::default();
        config.body.sway_min_gap = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.face.timeline_max_entries = Some(0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.face.frames_per_second = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_iris_band_rejected() {
        let mut config = EngineConfig::default();
        config.face.iris_left_max = 0.7;
        config.face.iris_right_min = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "face": { "blink_min_gap": 5 } }"#).unwrap();

        assert_eq!(config.face.blink_min_gap, 5);
        assert_eq!(config.face.blink_threshold, 4.0);
        assert_eq!(config.window, WindowConfig::default());
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn test_invalid_json_config_rejected() {
        let result = EngineConfig::from_json(r#"{ "scoring": { "fluency_weights": { "pace": 0.9 } } }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = EngineConfig::default();
        config.window.capacity = 12;

        let json = config.to_json().unwrap();
        let loaded = EngineConfig::from_json(&json).unwrap();
        assert_eq!(loaded, config);
    }
}
