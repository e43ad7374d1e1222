//! Session score combiner
//!
//! Maps finished session summaries onto bounded [0, 100] scores. Voice
//! features feed the sub-scores and the weighted overall score; face, body and
//! hand ratios are reported as percentages alongside them without weight.
//!
//! Every transform is a pure function of the summary and the scoring
//! constants, so combining the same summary twice yields the same report.

use crate::config::ScoringConfig;
use crate::error::EngineError;
use crate::types::{
    BodySummary, FaceSummary, HandSummary, ScoreReport, SessionSummary, VoiceFeatures,
    VoiceScores,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Lower bound of every score
pub const SCORE_MIN: f64 = 0.0;
/// Upper bound of every score
pub const SCORE_MAX: f64 = 100.0;

/// Clamp a raw score into [0, 100]; NaN maps to 0
pub fn clip_score(value: f64) -> f64 {
    if value.is_nan() {
        SCORE_MIN
    } else {
        value.clamp(SCORE_MIN, SCORE_MAX)
    }
}

/// Pace score
///
/// Formula: 100 - |wpm - ideal_wpm| * pace_penalty_per_wpm
pub fn compute_pace_score(wpm: f64, config: &ScoringConfig) -> f64 {
    clip_score(SCORE_MAX - (wpm - config.ideal_wpm).abs() * config.pace_penalty_per_wpm)
}

/// Filler score
///
/// Formula: 100 - filler_ratio * filler_penalty
pub fn compute_filler_score(filler_ratio: f64, config: &ScoringConfig) -> f64 {
    clip_score(SCORE_MAX - filler_ratio * config.filler_penalty)
}

/// Pause score
///
/// Formula: 100 - (total_pause / (duration + epsilon)) * pause_penalty
pub fn compute_pause_score(total_pause_sec: f64, duration_sec: f64, config: &ScoringConfig) -> f64 {
    let ratio = total_pause_sec / (duration_sec + config.epsilon);
    clip_score(SCORE_MAX - ratio * config.pause_penalty)
}

/// Vocabulary score
///
/// Formula: type_token_ratio * vocabulary_scale
pub fn compute_vocabulary_score(type_token_ratio: f64, config: &ScoringConfig) -> f64 {
    clip_score(type_token_ratio * config.vocabulary_scale)
}

/// Melody score
///
/// Formula: pitch_std * melody_scale
pub fn compute_melody_score(pitch_std: f64, config: &ScoringConfig) -> f64 {
    clip_score(pitch_std * config.melody_scale)
}

/// Anxiety score; confidence is its complement
///
/// Formula: jitter * anxiety_scale
pub fn compute_anxiety_score(jitter: f64, config: &ScoringConfig) -> f64 {
    clip_score(jitter * config.anxiety_scale)
}

/// Fraction in [0, 1] as a clipped percentage
fn percent(ratio: f64) -> f64 {
    clip_score(ratio * SCORE_MAX)
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::MissingField(field.to_string()))
}

/// Combines session summaries into a [`ScoreReport`]
#[derive(Debug, Clone)]
pub struct ScoreCombiner {
    config: ScoringConfig,
}

impl ScoreCombiner {
    /// Create a combiner; invalid constants are rejected here
    pub fn new(config: ScoringConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a session.
    ///
    /// Fails with [`EngineError::MissingField`] when a voice record is present
    /// but lacks a field a score needs. Without voice the overall score is 0.
    pub fn combine(&self, summary: &SessionSummary) -> Result<ScoreReport, EngineError> {
        let voice = summary
            .voice
            .as_ref()
            .map(|v| self.score_voice(v))
            .transpose()?;

        let overall_score = voice.map_or(SCORE_MIN, |v| self.overall(&v));
        debug!(
            session_id = %summary.session_id,
            has_voice = voice.is_some(),
            overall_score,
            "session scored"
        );

        Ok(ScoreReport {
            voice,
            face: summary.face.as_ref().map(face_section),
            body: summary.body.as_ref().map(body_section),
            hand: summary.hand.as_ref().map(hand_section),
            overall_score,
        })
    }

    /// Voice sub-scores
    pub fn score_voice(&self, voice: &VoiceFeatures) -> Result<VoiceScores, EngineError> {
        let c = &self.config;
        let wpm = require(voice.speech_pace_wpm, "voice.speech_pace_wpm")?;
        let filler_ratio = require(voice.filler_ratio, "voice.filler_ratio")?;
        let pauses = require(voice.pause_stats, "voice.pause_stats")?;
        let duration = require(voice.audio_duration_sec, "voice.audio_duration_sec")?;
        let lexical = require(voice.lexical.as_ref(), "voice.lexical")?;
        let ttr = require(lexical.type_token_ratio, "voice.lexical.type_token_ratio")?;
        let prosody = require(voice.prosody.as_ref(), "voice.prosody")?;
        let pitch_std = require(prosody.pitch_std, "voice.prosody.pitch_std")?;
        let jitter = require(prosody.jitter, "voice.prosody.jitter")?;

        let pace_score = compute_pace_score(wpm, c);
        let filler_score = compute_filler_score(filler_ratio, c);
        let pause_score = compute_pause_score(pauses.total, duration, c);

        let fw = &c.fluency_weights;
        let fluency_score =
            clip_score(pace_score * fw.pace + filler_score * fw.filler + pause_score * fw.pause);

        let anxiety_score = compute_anxiety_score(jitter, c);

        Ok(VoiceScores {
            pace_score,
            filler_score,
            pause_score,
            fluency_score,
            vocabulary_score: compute_vocabulary_score(ttr, c),
            melody_score: compute_melody_score(pitch_std, c),
            anxiety_score,
            confidence_score: SCORE_MAX - anxiety_score,
            pronunciation_score: clip_score(c.pronunciation_placeholder),
        })
    }

    /// Weighted overall score from voice sub-scores
    fn overall(&self, v: &VoiceScores) -> f64 {
        let w = &self.config.overall_weights;
        clip_score(
            v.fluency_score * w.fluency
                + v.vocabulary_score * w.vocabulary
                + v.confidence_score * w.confidence
                + v.melody_score * w.melody
                + v.pronunciation_score * w.pronunciation,
        )
    }
}

fn section<const N: usize>(entries: [(&str, f64); N]) -> BTreeMap<String, f64> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), percent(v)))
        .collect()
}

fn face_section(face: &FaceSummary) -> BTreeMap<String, f64> {
    section([
        ("smiling_pct", face.smiling_ratio),
        ("eye_contact_pct", face.gaze_center_ratio),
        ("gaze_left_pct", face.gaze_left_ratio),
        ("gaze_right_pct", face.gaze_right_ratio),
        ("gaze_uncertain_pct", face.gaze_uncertain_ratio),
    ])
}

fn body_section(body: &BodySummary) -> BTreeMap<String, f64> {
    let mut scores = section([
        ("static_pct", body.static_ratio),
        ("bounce_pct", body.posture_score),
        ("sway_pct", body.sway_score),
        ("lean_pct", body.lean_score),
        ("arm_expressiveness_pct", body.arm_expressiveness),
        ("arm_cross_pct", body.arm_cross_ratio),
        ("hand_raised_pct", body.hand_raised_ratio),
    ]);
    // Already on a 0-100 scale
    scores.insert(
        "posture_alignment_score".to_string(),
        clip_score(body.posture_alignment_score),
    );
    scores
}

fn hand_section(hand: &HandSummary) -> BTreeMap<String, f64> {
    section([
        ("static_pct", hand.static_ratio),
        ("high_activity_pct", hand.high_activity_ratio),
    ])
}
