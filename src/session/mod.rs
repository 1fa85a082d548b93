pub mod autoscan;
pub mod commands;
pub mod controller;
pub mod countdown;
pub mod state;

pub use controller::{CommitFeedback, SessionController, SourceFactory};
pub use countdown::{AUTO_COMMIT_DELAY, HIGH_CONFIDENCE_THRESHOLD};
pub use state::{
    ErrorStage, OutcomeSource, ScanStatus, SessionPhase, SessionSnapshot, SessionState,
};
