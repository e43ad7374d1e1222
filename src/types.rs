//! Core data types
//!
//! Per-modality frame records flowing into the engine, the labels it derives,
//! and the immutable summaries and reports it hands to persistence/reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Input records
// ============================================================================

/// A 2D landmark coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Midpoint between two points
    pub fn midpoint(a: Point2, b: Point2) -> Point2 {
        Point2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }
}

/// Facial measurements extracted from one frame.
///
/// Every field is optional: an absent field means the extractor produced no
/// value for that metric this frame, never zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub left_eye_openness: Option<f64>,
    #[serde(default)]
    pub right_eye_openness: Option<f64>,
    #[serde(default)]
    pub mouth_openness: Option<f64>,
    /// Signed head roll in degrees (negative = left)
    #[serde(default)]
    pub head_tilt_deg: Option<f64>,
    /// Iris position between the eye corners (0 = outer left, 1 = outer right)
    #[serde(default)]
    pub left_iris_ratio: Option<f64>,
    #[serde(default)]
    pub right_iris_ratio: Option<f64>,
}

impl FaceFrame {
    /// Mean openness of whichever eyes are present
    pub fn eye_openness(&self) -> Option<f64> {
        match (self.left_eye_openness, self.right_eye_openness) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }
}

/// Pose landmarks extracted from one frame.
///
/// `keypoints` is the full body keypoint set (face landmarks excluded) used for
/// stillness; the named joints drive the posture metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub keypoints: Option<Vec<Point2>>,
    #[serde(default)]
    pub left_shoulder: Option<Point2>,
    #[serde(default)]
    pub right_shoulder: Option<Point2>,
    #[serde(default)]
    pub left_hip: Option<Point2>,
    #[serde(default)]
    pub right_hip: Option<Point2>,
    #[serde(default)]
    pub left_elbow: Option<Point2>,
    #[serde(default)]
    pub right_elbow: Option<Point2>,
    #[serde(default)]
    pub wrists: Vec<Point2>,
}

impl BodyFrame {
    pub fn shoulder_mid(&self) -> Option<Point2> {
        Some(Point2::midpoint(self.left_shoulder?, self.right_shoulder?))
    }

    pub fn hip_mid(&self) -> Option<Point2> {
        Some(Point2::midpoint(self.left_hip?, self.right_hip?))
    }
}

/// Hand centroids detected in one frame (one entry per hand)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hands: Vec<Point2>,
}

/// Pause statistics from voice activity detection; absent fields read as 0
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseStats {
    #[serde(alias = "pause_count")]
    pub count: u32,
    /// Total pause time in seconds
    #[serde(alias = "total_pause")]
    pub total: f64,
    /// Longest single pause in seconds
    #[serde(alias = "longest_pause")]
    pub longest: f64,
}

/// Prosodic and voice-quality features
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prosody {
    #[serde(default)]
    pub pitch_mean: Option<f64>,
    #[serde(default)]
    pub pitch_std: Option<f64>,
    #[serde(default, alias = "jitter_abs")]
    pub jitter: Option<f64>,
    #[serde(default, alias = "shimmer_abs")]
    pub shimmer: Option<f64>,
    #[serde(default, alias = "loudness_mean")]
    pub loudness: Option<f64>,
}

/// Lexical richness metrics of the transcript
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lexical {
    #[serde(default)]
    pub type_token_ratio: Option<f64>,
    #[serde(default)]
    pub vocab_size: Option<u32>,
    #[serde(default)]
    pub total_words: Option<u32>,
}

/// One session's extracted audio features.
///
/// Fields stay optional so a missing measurement is reported as such by the
/// combiner instead of being scored as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoiceFeatures {
    #[serde(default)]
    pub audio_duration_sec: Option<f64>,
    #[serde(default)]
    pub speech_pace_wpm: Option<f64>,
    #[serde(default)]
    pub filler_ratio: Option<f64>,
    #[serde(default)]
    pub filler_count: Option<u32>,
    #[serde(default)]
    pub pause_stats: Option<PauseStats>,
    #[serde(default)]
    pub prosody: Option<Prosody>,
    #[serde(default)]
    pub lexical: Option<Lexical>,
    /// Emotion label to probability
    #[serde(default)]
    pub emotion_profile: BTreeMap<String, f64>,
    #[serde(default)]
    pub transcript: Option<String>,
}

/// A single record on the ingestion stream, tagged by modality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum StreamRecord {
    Face(FaceFrame),
    Body(BodyFrame),
    Hand(HandFrame),
    Voice(VoiceFeatures),
}

// ============================================================================
// Labels
// ============================================================================

/// Where the speaker is looking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Left,
    Center,
    Right,
    Uncertain,
}

impl GazeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
            Self::Uncertain => "uncertain",
        }
    }
}

/// Categorical level of a behavioral state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateLevel {
    High,
    Low,
    Uncertain,
}

/// Labels produced by the state estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorEstimate {
    pub confidence: StateLevel,
    pub engagement: StateLevel,
    pub nervousness: StateLevel,
    pub authenticity: StateLevel,
    pub gaze: GazeDirection,
}

// ============================================================================
// Session summaries
// ============================================================================

/// End-of-session facial summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceSummary {
    pub frames: u64,
    pub duration_min: f64,
    pub blink_count: u64,
    pub blink_rate_per_min: f64,
    pub head_tilt_count: u64,
    pub tilt_rate_per_min: f64,
    pub mean_eye_openness: f64,
    pub mean_mouth_openness: f64,
    pub mean_tilt_magnitude: f64,
    pub mean_smile_score: f64,
    pub smiling_ratio: f64,
    pub gaze_left_ratio: f64,
    pub gaze_center_ratio: f64,
    pub gaze_right_ratio: f64,
    pub gaze_uncertain_ratio: f64,
    /// Most frequent direction over the session; ties go to the direction
    /// seen most recently, as in the rolling gaze mode
    pub dominant_gaze: Option<GazeDirection>,
}

impl FaceSummary {
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        metric_map([
            ("frames", self.frames as f64),
            ("duration_min", self.duration_min),
            ("blink_count", self.blink_count as f64),
            ("blink_rate_per_min", self.blink_rate_per_min),
            ("head_tilt_count", self.head_tilt_count as f64),
            ("tilt_rate_per_min", self.tilt_rate_per_min),
            ("mean_eye_openness", self.mean_eye_openness),
            ("mean_mouth_openness", self.mean_mouth_openness),
            ("mean_tilt_magnitude", self.mean_tilt_magnitude),
            ("mean_smile_score", self.mean_smile_score),
            ("smiling_ratio", self.smiling_ratio),
            ("gaze_left_ratio", self.gaze_left_ratio),
            ("gaze_center_ratio", self.gaze_center_ratio),
            ("gaze_right_ratio", self.gaze_right_ratio),
            ("gaze_uncertain_ratio", self.gaze_uncertain_ratio),
        ])
    }
}

/// End-of-session full body summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BodySummary {
    pub frames: u64,
    pub duration_sec: f64,
    pub static_ratio: f64,
    /// Mean vertical shoulder offset from frame center (bounce)
    pub posture_score: f64,
    pub sway_score: f64,
    pub lean_score: f64,
    pub arm_expressiveness: f64,
    pub arm_cross_ratio: f64,
    pub sway_direction_changes: u64,
    /// Mean spine alignment score (30, 70 or 100 per frame)
    pub posture_alignment_score: f64,
    pub hand_raised_ratio: f64,
}

impl BodySummary {
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        metric_map([
            ("frames", self.frames as f64),
            ("duration_sec", self.duration_sec),
            ("static_ratio", self.static_ratio),
            ("posture_score", self.posture_score),
            ("sway_score", self.sway_score),
            ("lean_score", self.lean_score),
            ("arm_expressiveness", self.arm_expressiveness),
            ("arm_cross_ratio", self.arm_cross_ratio),
            ("sway_direction_changes", self.sway_direction_changes as f64),
            ("posture_alignment_score", self.posture_alignment_score),
            ("hand_raised_ratio", self.hand_raised_ratio),
        ])
    }
}

/// End-of-session hand tracking summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandSummary {
    pub frames: u64,
    pub duration_sec: f64,
    pub static_ratio: f64,
    pub total_movement: f64,
    pub high_activity_ratio: f64,
}

impl HandSummary {
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        metric_map([
            ("frames", self.frames as f64),
            ("duration_sec", self.duration_sec),
            ("static_ratio", self.static_ratio),
            ("total_movement", self.total_movement),
            ("high_activity_ratio", self.high_activity_ratio),
        ])
    }
}

impl VoiceFeatures {
    /// Numeric fields that are present, flattened for persistence
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: Option<f64>| {
            if let Some(v) = value {
                out.insert(key.to_string(), v);
            }
        };
        put("audio_duration_sec", self.audio_duration_sec);
        put("speech_pace_wpm", self.speech_pace_wpm);
        put("filler_ratio", self.filler_ratio);
        put("filler_count", self.filler_count.map(f64::from));
        if let Some(p) = &self.pause_stats {
            put("pause_count", Some(f64::from(p.count)));
            put("pause_total_sec", Some(p.total));
            put("pause_longest_sec", Some(p.longest));
        }
        if let Some(p) = &self.prosody {
            put("pitch_mean", p.pitch_mean);
            put("pitch_std", p.pitch_std);
            put("jitter", p.jitter);
            put("shimmer", p.shimmer);
            put("loudness", p.loudness);
        }
        if let Some(l) = &self.lexical {
            put("type_token_ratio", l.type_token_ratio);
            put("vocab_size", l.vocab_size.map(f64::from));
            put("total_words", l.total_words.map(f64::from));
        }
        for (label, prob) in &self.emotion_profile {
            out.insert(format!("emotion_{label}"), *prob);
        }
        out
    }
}

/// Immutable end-of-session snapshot across modalities
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<HandSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceFeatures>,
}

impl SessionSummary {
    /// Modality name to metric name to value
    pub fn to_flat_map(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        if let Some(face) = &self.face {
            out.insert("face".to_string(), face.metrics());
        }
        if let Some(body) = &self.body {
            out.insert("body".to_string(), body.metrics());
        }
        if let Some(hand) = &self.hand {
            out.insert("hand".to_string(), hand.metrics());
        }
        if let Some(voice) = &self.voice {
            out.insert("voice".to_string(), voice.metrics());
        }
        out
    }
}

// ============================================================================
// Score report
// ============================================================================

/// Voice sub-scores, each in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VoiceScores {
    pub pace_score: f64,
    pub filler_score: f64,
    pub pause_score: f64,
    pub fluency_score: f64,
    pub vocabulary_score: f64,
    pub melody_score: f64,
    pub anxiety_score: f64,
    pub confidence_score: f64,
    pub pronunciation_score: f64,
}

impl VoiceScores {
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        metric_map([
            ("pace_score", self.pace_score),
            ("filler_score", self.filler_score),
            ("pause_score", self.pause_score),
            ("fluency_score", self.fluency_score),
            ("vocabulary_score", self.vocabulary_score),
            ("melody_score", self.melody_score),
            ("anxiety_score", self.anxiety_score),
            ("confidence_score", self.confidence_score),
            ("pronunciation_score", self.pronunciation_score),
        ])
    }
}

/// Final bounded scores for a session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<BTreeMap<String, f64>>,
    pub overall_score: f64,
}

impl ScoreReport {
    /// Flatten to `"<modality>.<score>"` keys plus `overall_score`
    pub fn to_flat_map(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        if let Some(voice) = &self.voice {
            for (k, v) in voice.metrics() {
                out.insert(format!("voice.{k}"), v);
            }
        }
        for (modality, section) in [("face", &self.face), ("body", &self.body), ("hand", &self.hand)] {
            if let Some(scores) = section {
                for (k, v) in scores {
                    out.insert(format!("{modality}.{k}"), *v);
                }
            }
        }
        out.insert("overall_score".to_string(), self.overall_score);
        out
    }
}

fn metric_map<const N: usize>(entries: [(&str, f64); N]) -> BTreeMap<String, f64> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
