//! Human-in-the-loop checkpoints: holds, reviews and notifications.

pub mod handler;
pub mod resume;

pub use handler::{CheckpointAction, CheckpointHandler, HoldOpened, ResponseOutcome};
pub use resume::{
    DEFAULT_RESUME_PHASE, HoldReason, ResumeDecision, ResumeRouter, ResumeTarget,
    get_resume_phase,
};
