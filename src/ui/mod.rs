pub mod icons;
pub mod stage_progress;

pub use stage_progress::{StageProgressUi, UiMode};
