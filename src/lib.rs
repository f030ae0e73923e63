//! Pumpkin · spaced-repetition core for a self-study flashcard app
//!
//! - Line-oriented topic file parser with line-numbered diagnostics
//! - Mastery state machine, review intervals and at-risk ranking
//! - Practice sessions (daily, review, learn, boss) over a pluggable key-value store
//!
//! The crate is embedded by a UI shell; it has no network surface.
//!
//! Important env variables:
//!   PUMPKIN_CONFIG_PATH : path to TOML config (scheduler tuning, session sizes, directories)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

pub mod config;
pub mod domain;
pub mod grading;
pub mod parser;
pub mod protocol;
pub mod scheduler;
pub mod seeds;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;

pub use config::{PumpkinConfig, SchedulerConfig, SessionConfig};
pub use domain::{Attempt, Concept, ConceptState, Mastery, ParseDiagnostic, ParsedTopic, Question, QuestionKind, Topic};
pub use grading::{grade, Grade, GradeError, Submission};
pub use parser::parse_topic_file;
pub use scheduler::{next_concept_state, rank_at_risk, select_question, RecentHistory};
pub use session::{build_queue, PracticeMode, PracticeSession, Progress, QueuePlan, SessionError, SubmitOutcome};
pub use state::{AppState, ContentLibrary};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
