use thiserror::Error;

use crate::models::stage::StageId;

#[derive(Debug, Error)]
pub enum TutorError {
    #[error("invalid decimal number: {0}")]
    InvalidNumber(String),

    #[error("unsupported decimal place count {0}")]
    UnsupportedPlaces(u32),

    #[error("choice {0} is not part of the active question")]
    UnknownChoice(String),

    #[error("no active question found")]
    NoActiveQuestion,

    #[error(
        "ground truth mismatch for {number} at {decimal_places} dp: recomputed {recomputed}, question states {stated}"
    )]
    GroundTruthMismatch {
        number: String,
        decimal_places: u32,
        recomputed: String,
        stated: String,
    },

    #[error("stage {0} is not in the catalog")]
    UnknownStage(StageId),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("snapshot store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl TutorError {
    /// Programming-error class failures that must fail the turn loudly.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TutorError::GroundTruthMismatch { .. }
                | TutorError::InvariantViolation(_)
                | TutorError::UnknownStage(_)
        )
    }
}

pub type TutorResult<T> = Result<T, TutorError>;
