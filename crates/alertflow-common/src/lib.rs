//! Shared domain types for the alertflow analysis engine.
//!
//! These types cross every boundary of the engine: the coordinator writes
//! them, the progress channel streams them, the feedback ledger validates
//! against them and the HTTP layer serializes them. They carry no behavior
//! beyond state classification and derivation.

mod event;
mod feedback;
mod run;
mod stage;

pub use event::ProgressEvent;
pub use feedback::{FeedbackRecord, Verdict};
pub use run::{AlertAnalysisRecord, OverallStatus, StageRun, StageState, TokenUsage};
pub use stage::{Stage, UnknownStage};
