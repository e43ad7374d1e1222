//! Per-modality sessions
//!
//! Each session owns its detectors and rolling statistics for one modality and
//! exposes an explicit create / update / finalize lifecycle. Updates never
//! fail: a frame that violates a detector's input contract is logged and that
//! metric is skipped, so one bad frame never ends a session. Finalizing is
//! read-only and works on empty sessions (all ratios are zero).
//!
//! A face session clocks itself from frame timestamps, anchored on the first
//! frame that carries one. Until a timestamp arrives, session time advances by
//! `1 / frames_per_second` per frame, the same way body and hand durations are
//! measured.

use crate::config::{BodyConfig, EngineConfig, FaceConfig, HandConfig};
use crate::detectors::{
    flatten_points, CoupledLimbDetector, DirectionalChangeDetector, DisplacementNorm,
    EventDetector, LimbPairs, StillnessDetector,
};
use crate::error::EngineError;
use crate::estimator::{
    classify_frame_gaze, EstimateTimeline, FaceDetectors, StateEstimator, TimelineEntry,
    EYE_OPENNESS, MOUTH_OPENNESS, SMILE_SCORE, TILT_MAGNITUDE,
};
use crate::rolling::RollingAggregator;
use crate::types::{
    BehaviorEstimate, BodyFrame, BodySummary, FaceFrame, FaceSummary, GazeDirection, HandFrame,
    HandSummary, Point2,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Time covered by `frames` frames captured at `fps`
fn frames_duration(frames: u64, fps: f64) -> Duration {
    Duration::microseconds((frames as f64 / fps * 1e6).round() as i64)
}

fn push_metric(aggregator: &mut RollingAggregator, metric: &str, value: f64) {
    if let Err(e) = aggregator.push(metric, value) {
        warn!(metric, error = %e, "skipping metric update");
    }
}

fn ratio(count: u64, frames: u64) -> f64 {
    if frames == 0 {
        0.0
    } else {
        count as f64 / frames as f64
    }
}

// ============================================================================
// Face
// ============================================================================

/// Count and sequence number of the latest sighting
#[derive(Debug, Clone, Copy, Default)]
struct GazeTally {
    count: u64,
    last_seen: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct GazeCounts {
    left: GazeTally,
    center: GazeTally,
    right: GazeTally,
    uncertain: GazeTally,
    seen: u64,
}

impl GazeCounts {
    fn add(&mut self, gaze: GazeDirection) {
        self.seen += 1;
        let tally = match gaze {
            GazeDirection::Left => &mut self.left,
            GazeDirection::Center => &mut self.center,
            GazeDirection::Right => &mut self.right,
            GazeDirection::Uncertain => &mut self.uncertain,
        };
        tally.count += 1;
        tally.last_seen = self.seen;
    }

    /// Most frequent direction; ties go to the one seen most recently,
    /// matching the rolling gaze mode
    fn dominant(&self) -> Option<GazeDirection> {
        [
            (GazeDirection::Left, self.left),
            (GazeDirection::Center, self.center),
            (GazeDirection::Right, self.right),
            (GazeDirection::Uncertain, self.uncertain),
        ]
        .into_iter()
        .filter(|(_, t)| t.count > 0)
        .max_by_key(|(_, t)| (t.count, t.last_seen))
        .map(|(g, _)| g)
    }
}

/// Facial landmark session: blinks, head tilts, gaze and expression
#[derive(Debug, Clone)]
pub struct FaceSession {
    config: FaceConfig,
    aggregator: RollingAggregator,
    detectors: FaceDetectors,
    estimator: StateEstimator,
    timeline: EstimateTimeline,
    latest_timestamp: Option<DateTime<Utc>>,
    frames: u64,
    gaze_counts: GazeCounts,
    smiling_frames: u64,
    last_smiling: bool,
}

impl FaceSession {
    /// Create a session whose clock starts now; the first timestamped frame
    /// re-anchors it
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::starting_at(config, Utc::now())
    }

    pub fn starting_at(config: &EngineConfig, started_at: DateTime<Utc>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config: config.face.clone(),
            aggregator: RollingAggregator::starting_at(config.window.capacity, started_at)?,
            detectors: FaceDetectors::new(&config.face, config.window.gaze_window),
            estimator: StateEstimator::new(
                config.estimator.clone(),
                config.window.min_elapsed_epsilon_min,
            ),
            timeline: EstimateTimeline::new(config.face.timeline_interval_sec)
                .with_max_entries(config.face.timeline_max_entries),
            latest_timestamp: None,
            frames: 0,
            gaze_counts: GazeCounts::default(),
            smiling_frames: 0,
            last_smiling: false,
        })
    }

    /// Feed one frame. Absent fields leave their metrics untouched.
    pub fn update(&mut self, frame: &FaceFrame) {
        if let Some(ts) = frame.timestamp {
            if self.latest_timestamp.is_none() {
                self.aggregator.anchor_at(ts);
            }
            self.latest_timestamp = Some(ts);
        }
        self.frames += 1;

        let eye = frame.eye_openness();
        match eye {
            Some(eye) => {
                push_metric(&mut self.aggregator, EYE_OPENNESS, eye);
                if let Err(e) = self.detectors.blink.update(&eye) {
                    warn!(frame = self.frames, error = %e, "blink detector skipped frame");
                }
            }
            None => debug!(frame = self.frames, "no eye openness this frame"),
        }

        if let Some(mouth) = frame.mouth_openness {
            push_metric(&mut self.aggregator, MOUTH_OPENNESS, mouth);
        }

        if let Some(tilt) = frame.head_tilt_deg {
            push_metric(&mut self.aggregator, TILT_MAGNITUDE, tilt.abs());
            if let Err(e) = self.detectors.tilt.update(&tilt) {
                warn!(frame = self.frames, error = %e, "tilt detector skipped frame");
            }
        }

        self.last_smiling = false;
        if let (Some(eye), Some(mouth)) = (eye, frame.mouth_openness) {
            let smile = mouth / (eye + self.config.smile_epsilon);
            push_metric(&mut self.aggregator, SMILE_SCORE, smile);
            if smile > self.config.smile_min && smile < self.config.smile_max {
                self.smiling_frames += 1;
                self.last_smiling = true;
            }
        }

        if let Some(gaze) =
            classify_frame_gaze(frame.left_iris_ratio, frame.right_iris_ratio, &self.config)
        {
            self.detectors.gaze.push(gaze);
            self.gaze_counts.add(gaze);
        }
    }

    /// Session time of the latest frame: its timestamp once frames carry one,
    /// otherwise the start plus `frames / frames_per_second`
    pub fn session_time(&self) -> DateTime<Utc> {
        self.latest_timestamp.unwrap_or_else(|| {
            self.aggregator.started_at()
                + frames_duration(self.frames, self.config.frames_per_second)
        })
    }

    /// Current behavioral labels
    pub fn estimate(&self) -> BehaviorEstimate {
        self.estimator
            .estimate_at(&self.aggregator, &self.detectors, self.session_time())
    }

    /// Append a timeline entry for `now` unless one was recorded within the interval
    pub fn record_timeline(&mut self, now: DateTime<Utc>) -> bool {
        if !self.timeline.is_due(now) {
            return false;
        }
        let entry = TimelineEntry {
            elapsed_sec: self.aggregator.elapsed_minutes_at(now) * 60.0,
            blink_count: self.detectors.blink.count(),
            head_tilt_count: self.detectors.tilt.count(),
            smiling: self.last_smiling,
            estimate: self.estimator.estimate_at(&self.aggregator, &self.detectors, now),
        };
        self.timeline.record(now, entry)
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        self.timeline.entries()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn aggregator(&self) -> &RollingAggregator {
        &self.aggregator
    }

    pub fn detectors(&self) -> &FaceDetectors {
        &self.detectors
    }

    /// Snapshot the session
    pub fn finalize(&self) -> FaceSummary {
        let rates = self
            .estimator
            .rates_at(&self.aggregator, &self.detectors, self.session_time());
        let summary = FaceSummary {
            frames: self.frames,
            duration_min: rates.elapsed_min,
            blink_count: self.detectors.blink.count(),
            blink_rate_per_min: rates.blink_rate_per_min,
            head_tilt_count: self.detectors.tilt.count(),
            tilt_rate_per_min: rates.tilt_rate_per_min,
            mean_eye_openness: self.aggregator.lifetime_mean(EYE_OPENNESS),
            mean_mouth_openness: self.aggregator.lifetime_mean(MOUTH_OPENNESS),
            mean_tilt_magnitude: self.aggregator.lifetime_mean(TILT_MAGNITUDE),
            mean_smile_score: self.aggregator.lifetime_mean(SMILE_SCORE),
            smiling_ratio: ratio(self.smiling_frames, self.frames),
            gaze_left_ratio: ratio(self.gaze_counts.left.count, self.frames),
            gaze_center_ratio: ratio(self.gaze_counts.center.count, self.frames),
            gaze_right_ratio: ratio(self.gaze_counts.right.count, self.frames),
            gaze_uncertain_ratio: ratio(self.gaze_counts.uncertain.count, self.frames),
            dominant_gaze: self.gaze_counts.dominant(),
        };
        info!(
            frames = summary.frames,
            blinks = summary.blink_count,
            tilts = summary.head_tilt_count,
            "face session finalized"
        );
        summary
    }

    /// Restart the session with the same configuration
    pub fn reset(&mut self) {
        self.aggregator.reset_at(Utc::now());
        self.detectors.reset();
        self.timeline.clear();
        self.latest_timestamp = None;
        self.frames = 0;
        self.gaze_counts = GazeCounts::default();
        self.smiling_frames = 0;
        self.last_smiling = false;
        debug!("face session reset");
    }
}

// ============================================================================
// Body
// ============================================================================

const BOUNCE: &str = "bounce";
const SWAY: &str = "sway";
const LEAN: &str = "lean";
const ARM_EXPRESSIVENESS: &str = "arm_expressiveness";
const POSTURE_ALIGNMENT: &str = "posture_alignment";

/// Angle in degrees at vertex `b` between `a` and `c` (0 when degenerate)
pub fn joint_angle(a: Point2, b: Point2, c: Point2) -> f64 {
    let (abx, aby) = (a.x - b.x, a.y - b.y);
    let (cbx, cby) = (c.x - b.x, c.y - b.y);
    let mag = (abx * abx + aby * aby).sqrt() * (cbx * cbx + cby * cby).sqrt();
    if mag == 0.0 {
        return 0.0;
    }
    let cos = ((abx * cbx + aby * cby) / mag).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Full body pose session: stillness, sway, lean, arm use and posture
#[derive(Debug, Clone)]
pub struct BodySession {
    config: BodyConfig,
    aggregator: RollingAggregator,
    stillness: StillnessDetector,
    sway: DirectionalChangeDetector,
    arms: CoupledLimbDetector,
    frames: u64,
    hand_raised_frames: u64,
}

impl BodySession {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let body = config.body.clone();
        Ok(Self {
            aggregator: RollingAggregator::new(config.window.capacity)?,
            stillness: StillnessDetector::new(body.still_threshold, DisplacementNorm::Euclidean),
            sway: DirectionalChangeDetector::new(
                body.sway_threshold,
                body.sway_rearm_samples,
                body.sway_min_gap,
            ),
            arms: CoupledLimbDetector::new(),
            frames: 0,
            hand_raised_frames: 0,
            config: body,
        })
    }

    pub fn update(&mut self, frame: &BodyFrame) {
        self.frames += 1;

        if let Some(keypoints) = &frame.keypoints {
            if let Err(e) = self.stillness.update(&flatten_points(keypoints)) {
                warn!(frame = self.frames, error = %e, "stillness detector skipped frame");
            }
        }

        let shoulder_mid = frame.shoulder_mid();
        if let Some(mid) = shoulder_mid {
            push_metric(&mut self.aggregator, BOUNCE, (mid.y - 0.5).abs());
            push_metric(&mut self.aggregator, SWAY, (mid.x - 0.5).abs());
            if let Err(e) = self.sway.update(&(mid.x - 0.5)) {
                warn!(frame = self.frames, error = %e, "sway detector skipped frame");
            }
            if frame.wrists.iter().any(|w| w.y < mid.y) {
                self.hand_raised_frames += 1;
            }
        } else {
            debug!(frame = self.frames, "no shoulders this frame");
        }

        if let (Some(ls), Some(rs), Some(lh), Some(rh)) = (
            frame.left_shoulder,
            frame.right_shoulder,
            frame.left_hip,
            frame.right_hip,
        ) {
            let torso_y = (lh.y + rh.y + ls.y + rs.y) / 4.0;
            push_metric(&mut self.aggregator, LEAN, (torso_y - 0.5).abs());
        }

        if let (Some(le), Some(re)) = (frame.left_elbow, frame.right_elbow) {
            push_metric(&mut self.aggregator, ARM_EXPRESSIVENESS, (le.y - re.y).abs());
            if let (Some(ls), Some(rs)) = (frame.left_shoulder, frame.right_shoulder) {
                let pairs = LimbPairs {
                    left_elbow: le,
                    left_shoulder: ls,
                    right_elbow: re,
                    right_shoulder: rs,
                };
                if let Err(e) = self.arms.update(&pairs) {
                    warn!(frame = self.frames, error = %e, "arm cross detector skipped frame");
                }
            }
        }

        if let (Some(hip), Some(shoulder)) = (frame.hip_mid(), shoulder_mid) {
            let above = Point2::new(shoulder.x, shoulder.y - 0.1);
            let angle = joint_angle(hip, shoulder, above);
            let score = self.alignment_score(angle);
            push_metric(&mut self.aggregator, POSTURE_ALIGNMENT, score);
        }
    }

    fn alignment_score(&self, angle: f64) -> f64 {
        if angle > self.config.upright_angle_deg {
            100.0
        } else if angle > self.config.slouch_angle_deg {
            70.0
        } else {
            30.0
        }
    }

    /// Metric sum spread over every frame, including frames without landmarks
    fn per_frame(&self, metric: &str) -> f64 {
        let sum = self.aggregator.window(metric).map_or(0.0, |w| w.lifetime_sum());
        if self.frames == 0 {
            0.0
        } else {
            sum / self.frames as f64
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finalize(&self) -> BodySummary {
        let summary = BodySummary {
            frames: self.frames,
            duration_sec: self.frames as f64 / self.config.frames_per_second,
            static_ratio: ratio(self.stillness.count(), self.frames),
            posture_score: self.per_frame(BOUNCE),
            sway_score: self.per_frame(SWAY),
            lean_score: self.per_frame(LEAN),
            arm_expressiveness: self.per_frame(ARM_EXPRESSIVENESS),
            arm_cross_ratio: ratio(self.arms.count(), self.frames),
            sway_direction_changes: self.sway.count(),
            posture_alignment_score: self.aggregator.lifetime_mean(POSTURE_ALIGNMENT),
            hand_raised_ratio: ratio(self.hand_raised_frames, self.frames),
        };
        info!(
            frames = summary.frames,
            static_ratio = summary.static_ratio,
            "body session finalized"
        );
        summary
    }

    pub fn reset(&mut self) {
        self.aggregator.reset_at(Utc::now());
        self.stillness.reset();
        self.sway.reset();
        self.arms.reset();
        self.frames = 0;
        self.hand_raised_frames = 0;
        debug!("body session reset");
    }
}

// ============================================================================
// Hand
// ============================================================================

/// Hand tracking session: centroid stillness and activity
#[derive(Debug, Clone)]
pub struct HandSession {
    config: HandConfig,
    stillness: StillnessDetector,
    frames: u64,
}

impl HandSession {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let hand = config.hand.clone();
        Ok(Self {
            stillness: StillnessDetector::new(hand.still_threshold, DisplacementNorm::Manhattan)
                .with_high_activity(hand.high_activity_threshold),
            frames: 0,
            config: hand,
        })
    }

    /// Feed one frame. Frames without hands count towards the total only;
    /// a change in the number of hands re-baselines without a judgment.
    pub fn update(&mut self, frame: &HandFrame) {
        self.frames += 1;
        if frame.hands.is_empty() {
            return;
        }

        let coords = flatten_points(&frame.hands);
        match self.stillness.baseline_len() {
            Some(n) if n != coords.len() => {
                debug!(frame = self.frames, hands = frame.hands.len(), "hand count changed");
                self.stillness.rebaseline(&coords);
            }
            _ => {
                if let Err(e) = self.stillness.update(&coords) {
                    warn!(frame = self.frames, error = %e, "hand stillness skipped frame");
                }
            }
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finalize(&self) -> HandSummary {
        let summary = HandSummary {
            frames: self.frames,
            duration_sec: self.frames as f64 / self.config.frames_per_second,
            static_ratio: ratio(self.stillness.count(), self.frames),
            total_movement: self.stillness.total_displacement(),
            high_activity_ratio: ratio(self.stillness.active_count(), self.frames),
        };
        info!(frames = summary.frames, "hand session finalized");
        summary
    }

    pub fn reset(&mut self) {
        self.stillness.reset();
        self.frames = 0;
    }
}
