//! Presence report encoder
//!
//! Wraps a session summary and its score report into the serializable
//! payload handed to storage and reporting collaborators.

use crate::error::EngineError;
use crate::estimator::TimelineEntry;
use crate::types::{ScoreReport, SessionSummary};
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// Current payload schema version
pub const PAYLOAD_VERSION: &str = "1.0.0";

/// Who produced a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Persisted form of one scored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub payload_version: String,
    pub producer: Producer,
    pub session_id: String,
    pub computed_at_utc: String,
    pub summary: SessionSummary,
    pub scores: ScoreReport,
    /// `"<modality>.<score>"` view of `scores`
    pub flat_scores: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<TimelineEntry>,
}

/// Builds [`PresencePayload`]s
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Encode with the current time
    pub fn encode(
        &self,
        summary: &SessionSummary,
        scores: &ScoreReport,
        timeline: &[TimelineEntry],
    ) -> PresencePayload {
        self.encode_at(summary, scores, timeline, Utc::now())
    }

    /// Encode with an explicit computation time
    pub fn encode_at(
        &self,
        summary: &SessionSummary,
        scores: &ScoreReport,
        timeline: &[TimelineEntry],
        computed_at: DateTime<Utc>,
    ) -> PresencePayload {
        info!(
            session_id = %summary.session_id,
            overall_score = scores.overall_score,
            "encoding presence report"
        );
        PresencePayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            session_id: summary.session_id.clone(),
            computed_at_utc: computed_at.to_rfc3339(),
            summary: summary.clone(),
            scores: scores.clone(),
            flat_scores: scores.to_flat_map(),
            timeline: timeline.to_vec(),
        }
    }

    /// Encode to a pretty-printed JSON string
    pub fn encode_to_json(
        &self,
        summary: &SessionSummary,
        scores: &ScoreReport,
        timeline: &[TimelineEntry],
    ) -> Result<String, EngineError> {
        let payload = self.encode(summary, scores, timeline);
        serde_json::to_string_pretty(&payload).map_err(EngineError::JsonError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HandSummary, VoiceScores};
    use chrono::TimeZone;

    fn make_summary() -> SessionSummary {
        SessionSummary {
            session_id: "talk-42".to_string(),
            hand: Some(HandSummary {
                frames: 90,
                duration_sec: 3.0,
                static_ratio: 0.5,
                total_movement: 1.25,
                high_activity_ratio: 0.1,
            }),
            ..Default::default()
        }
    }

    fn make_report() -> ScoreReport {
        ScoreReport {
            voice: Some(VoiceScores {
                fluency_score: 88.0,
                ..Default::default()
            }),
            overall_score: 72.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_payload_metadata() {
        let encoder = ReportEncoder::with_instance_id("inst-1".to_string());
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let payload = encoder.encode_at(&make_summary(), &make_report(), &[], at);

        assert_eq!(payload.payload_version, PAYLOAD_VERSION);
        assert_eq!(payload.producer.name, PRODUCER_NAME);
        assert_eq!(payload.producer.version, ENGINE_VERSION);
        assert_eq!(payload.producer.instance_id, "inst-1");
        assert_eq!(payload.session_id, "talk-42");
        assert_eq!(payload.computed_at_utc, "2025-03-01T09:30:00+00:00");
        assert_eq!(payload.flat_scores["voice.fluency_score"], 88.0);
        assert_eq!(payload.flat_scores["overall_score"], 72.5);
    }

    #[test]
    fn test_encode_to_json_round_trips() {
        let encoder = ReportEncoder::new();
        let json = encoder
            .encode_to_json(&make_summary(), &make_report(), &[])
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["session_id"], "talk-42");
        assert_eq!(value["scores"]["overall_score"], 72.5);
        assert_eq!(value["summary"]["hand"]["frames"], 90);
        assert!(value.get("timeline").is_none());
        assert!(value["summary"].get("face").is_none());
    }

    #[test]
    fn test_instance_ids_are_unique() {
        assert_ne!(ReportEncoder::new().instance_id(), ReportEncoder::new().instance_id());
    }
}
