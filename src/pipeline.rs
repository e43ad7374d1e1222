//! Presence pipeline orchestration
//!
//! Routes tagged stream records to the per-modality sessions, then finalizes,
//! scores and encodes the session.

use crate::combiner::ScoreCombiner;
use crate::config::EngineConfig;
use crate::encoder::{PresencePayload, ReportEncoder};
use crate::error::EngineError;
use crate::session::{BodySession, FaceSession, HandSession};
use crate::types::{ScoreReport, SessionSummary, StreamRecord, VoiceFeatures};
use tracing::{debug, warn};
use uuid::Uuid;

/// Score an NDJSON stream of records with the default configuration
/// (stateless, one-shot).
///
/// # Returns
/// Presence payload JSON string
///
/// # Example
/// ```ignore
/// let report_json = presence_to_report(ndjson)?;
/// ```
pub fn presence_to_report(ndjson: &str) -> Result<String, EngineError> {
    presence_to_report_with_config(ndjson, EngineConfig::default())
}

/// Score an NDJSON stream of records with an explicit configuration
pub fn presence_to_report_with_config(
    ndjson: &str,
    config: EngineConfig,
) -> Result<String, EngineError> {
    let mut processor = PresenceProcessor::new(config)?;
    processor.ingest_ndjson(ndjson)?;
    processor.encode_json()
}

/// Stateful processor for one session fed record by record.
///
/// A modality appears in the summary once at least one of its records has
/// been ingested.
pub struct PresenceProcessor {
    config: EngineConfig,
    session_id: String,
    face: FaceSession,
    body: BodySession,
    hand: HandSession,
    voice: Option<VoiceFeatures>,
    combiner: ScoreCombiner,
    encoder: ReportEncoder,
}

impl PresenceProcessor {
    /// Create a processor with a random session id
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_session_id(config, Uuid::new_v4().to_string())
    }

    pub fn with_session_id(config: EngineConfig, session_id: String) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            face: FaceSession::new(&config)?,
            body: BodySession::new(&config)?,
            hand: HandSession::new(&config)?,
            voice: None,
            combiner: ScoreCombiner::new(config.scoring.clone())?,
            encoder: ReportEncoder::new(),
            session_id,
            config,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn face(&self) -> &FaceSession {
        &self.face
    }

    /// Route one record to its session
    pub fn ingest(&mut self, record: StreamRecord) {
        match record {
            StreamRecord::Face(frame) => {
                self.face.update(&frame);
                let now = self.face.session_time();
                self.face.record_timeline(now);
            }
            StreamRecord::Body(frame) => self.body.update(&frame),
            StreamRecord::Hand(frame) => self.hand.update(&frame),
            StreamRecord::Voice(mut features) => {
                if self.voice.is_some() {
                    warn!(session_id = %self.session_id, "replacing earlier voice record");
                }
                features.fill_from_transcript();
                self.voice = Some(features);
            }
        }
    }

    /// Parse and route one JSON record; blank lines are ignored
    pub fn ingest_json(&mut self, line: &str) -> Result<(), EngineError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let record: StreamRecord = serde_json::from_str(line)?;
        self.ingest(record);
        Ok(())
    }

    /// Ingest newline-delimited records; returns the number of records read.
    ///
    /// Stops at the first malformed line and reports its 1-based number.
    pub fn ingest_ndjson(&mut self, ndjson: &str) -> Result<usize, EngineError> {
        let mut records = 0;
        for (i, line) in ndjson.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            self.ingest_json(line)
                .map_err(|e| EngineError::ParseError(format!("line {}: {e}", i + 1)))?;
            records += 1;
        }
        debug!(records, session_id = %self.session_id, "ndjson ingested");
        Ok(records)
    }

    /// Snapshot every modality that received records
    pub fn finalize(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            face: (self.face.frames() > 0).then(|| self.face.finalize()),
            body: (self.body.frames() > 0).then(|| self.body.finalize()),
            hand: (self.hand.frames() > 0).then(|| self.hand.finalize()),
            voice: self.voice.clone(),
        }
    }

    /// Score the current snapshot
    pub fn score(&self) -> Result<ScoreReport, EngineError> {
        self.combiner.combine(&self.finalize())
    }

    /// Finalize, score and encode
    pub fn encode(&self) -> Result<PresencePayload, EngineError> {
        let summary = self.finalize();
        let scores = self.combiner.combine(&summary)?;
        Ok(self.encoder.encode(&summary, &scores, self.face.timeline()))
    }

    /// Finalize, score and encode to payload JSON
    pub fn encode_json(&self) -> Result<String, EngineError> {
        let summary = self.finalize();
        let scores = self.combiner.combine(&summary)?;
        self.encoder
            .encode_to_json(&summary, &scores, self.face.timeline())
    }

    /// Start a new session with the same configuration
    pub fn reset(&mut self) {
        self.face.reset();
        self.body.reset();
        self.hand.reset();
        self.voice = None;
        self.session_id = Uuid::new_v4().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::{compute_filler_score, compute_pace_score, compute_pause_score};
    use crate::types::GazeDirection;

    const VOICE_LINE: &str = r#"{"modality":"voice","audio_duration_sec":60.0,"speech_pace_wpm":150.0,"filler_ratio":0.0,"pause_stats":{"count":0,"total":0.0,"longest":0.0},"prosody":{"pitch_std":5.0,"jitter":0.002},"lexical":{"type_token_ratio":0.05}}"#;

    fn face_line(second: u32, eye: f64) -> String {
        format!(
            r#"{{"modality":"face","timestamp":"2025-06-21T10:00:{second:02}Z","left_eye_openness":{eye},"right_eye_openness":{eye},"mouth_openness":1.0,"head_tilt_deg":2.0,"left_iris_ratio":0.5,"right_iris_ratio":0.5}}"#
        )
    }

    fn make_stream() -> String {
        let mut lines: Vec<String> = (0..10)
            .map(|s| face_line(s, if s == 4 { 1.0 } else { 7.0 }))
            .collect();
        lines.push(r#"{"modality":"hand","hands":[{"x":0.5,"y":0.5}]}"#.to_string());
        lines.push(r#"{"modality":"hand","hands":[{"x":0.5,"y":0.5}]}"#.to_string());
        lines.push(String::new());
        lines.push(VOICE_LINE.to_string());
        lines.join("\n")
    }

    #[test]
    fn test_end_to_end_ndjson() {
        let mut processor =
            PresenceProcessor::with_session_id(EngineConfig::default(), "demo".to_string())
                .unwrap();
        assert_eq!(processor.ingest_ndjson(&make_stream()).unwrap(), 13);

        let summary = processor.finalize();
        let face = summary.face.as_ref().unwrap();
        assert_eq!(face.frames, 10);
        assert_eq!(face.blink_count, 1);
        assert_eq!(face.dominant_gaze, Some(GazeDirection::Center));
        assert!(summary.body.is_none());
        assert_eq!(summary.hand.as_ref().unwrap().static_ratio, 0.5);

        let report = processor.score().unwrap();
        assert!((report.overall_score - 89.0).abs() < 1e-9);
        assert_eq!(processor.face().timeline().len(), 10);
    }

    #[test]
    fn test_one_shot_report() {
        let json = presence_to_report(&make_stream()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["producer"]["name"], "presence-engine");
        assert_eq!(value["summary"]["face"]["blink_count"], 1);
        assert!(value["flat_scores"]["voice.pace_score"].as_f64().unwrap() > 99.0);
        assert_eq!(value["timeline"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_empty_stream_scores_zero() {
        let processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        let summary = processor.finalize();
        assert!(summary.to_flat_map().is_empty());

        let report = processor.score().unwrap();
        assert_eq!(report.overall_score, 0.0);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let mut processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        let input = format!("{}\n{{\"modality\":\"smell\"}}", face_line(0, 7.0));

        let err = processor.ingest_ndjson(&input).unwrap_err();
        match err {
            EngineError::ParseError(msg) => assert!(msg.starts_with("line 2:"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_voice_fails_scoring() {
        let mut processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        processor
            .ingest_json(r#"{"modality":"voice","audio_duration_sec":30.0}"#)
            .unwrap();

        assert!(matches!(
            processor.score(),
            Err(EngineError::MissingField(_))
        ));
    }

    #[test]
    fn test_untimestamped_face_stream_clocks_by_frame_rate() {
        let line = r#"{"modality":"face","left_eye_openness":7.0,"right_eye_openness":7.0,"head_tilt_deg":2.0}"#;
        let input = vec![line; 60].join("\n");
        let mut processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        processor.ingest_ndjson(&input).unwrap();

        let face = processor.finalize().face.unwrap();
        // 60 frames at 30 fps
        assert!((face.duration_min - 2.0 / 60.0).abs() < 1e-9);
        assert_eq!(face.blink_rate_per_min, 0.0);
        assert_eq!(processor.face().timeline().len(), 2);
    }

    #[test]
    fn test_minimal_voice_record_scores_perfect_fluency_inputs() {
        let mut processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        let input = format!(
            "{}\n{}",
            face_line(0, 7.0),
            r#"{"modality":"voice","speech_pace_wpm":150.0,"filler_ratio":0.0,"pause_stats":{"total":0.0},"audio_duration_sec":60.0}"#
        );
        assert_eq!(processor.ingest_ndjson(&input).unwrap(), 2);

        let voice = processor.finalize().voice.unwrap();
        let scoring = &processor.config().scoring;
        assert_eq!(compute_pace_score(voice.speech_pace_wpm.unwrap(), scoring), 100.0);
        assert_eq!(compute_filler_score(voice.filler_ratio.unwrap(), scoring), 100.0);
        assert_eq!(
            compute_pause_score(
                voice.pause_stats.unwrap().total,
                voice.audio_duration_sec.unwrap(),
                scoring
            ),
            100.0
        );
    }

    #[test]
    fn test_voice_transcript_fills_fields() {
        let mut processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        processor
            .ingest_json(
                r#"{"modality":"voice","audio_duration_sec":60.0,"transcript":"um hello there"}"#,
            )
            .unwrap();

        let voice = processor.finalize().voice.unwrap();
        assert_eq!(voice.filler_count, Some(1));
        assert!((voice.speech_pace_wpm.unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_starts_new_session() {
        let mut processor = PresenceProcessor::new(EngineConfig::default()).unwrap();
        let first_id = processor.session_id().to_string();
        processor.ingest_ndjson(&make_stream()).unwrap();
        processor.reset();

        assert_ne!(processor.session_id(), first_id);
        let summary = processor.finalize();
        assert!(summary.face.is_none());
        assert!(summary.voice.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.face.iris_left_max = 0.9;
        assert!(PresenceProcessor::new(config).is_err());
    }
}
