//! Presence Engine - nonverbal presence analysis for recorded or live talks
//!
//! The engine turns per-frame landmark measurements and a per-session voice
//! feature record into behavioral summaries and bounded scores through a
//! deterministic pipeline: event detection → rolling aggregation → state
//! estimation → session scoring → report encoding.
//!
//! ## Modules
//!
//! - **Sessions**: face, body and hand sessions with explicit create/update/finalize
//! - **Combiner**: voice sub-scores, modality percentages and the overall score
//! - **Pipeline**: NDJSON ingestion of tagged records into an encoded report

pub mod combiner;
pub mod config;
pub mod detectors;
pub mod encoder;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod rolling;
pub mod session;
pub mod types;
pub mod voice;

pub use combiner::ScoreCombiner;
pub use config::EngineConfig;
pub use encoder::{PresencePayload, ReportEncoder};
pub use error::EngineError;
pub use pipeline::{presence_to_report, presence_to_report_with_config, PresenceProcessor};
pub use session::{BodySession, FaceSession, HandSession};
pub use types::{ScoreReport, SessionSummary, StreamRecord};

/// Engine version embedded in every payload
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for payloads
pub const PRODUCER_NAME: &str = "presence-engine";
