use serde::{Deserialize, Serialize};
use validator::Validate;

use super::profile::{EngagementLevel, LearnerContext, RecentSummary, ResponseTrend, TopicSummary};
use super::question::{ChoiceLetter, QuestionView};
use super::stage::StageId;
use super::verification::{MisconceptionKind, VerificationResult, VerificationSteps};
use crate::services::progression_service::AnswerOutcome;

/// Request to answer the active question
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 1, message = "Choice must be a single letter A-D"))]
    pub chosen_letter: String,

    /// Client-measured time; server-measured time from when the question was served is
    /// used when absent.
    #[validate(range(min = 0.0, max = 3600.0, message = "Response time must be between 0 and 3600 seconds"))]
    pub response_time_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkedExampleView {
    pub number: String,
    pub decimal_places: u32,
    pub steps: VerificationSteps,
}

/// What to show next. Serialized with a `mode` discriminator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StepResponse {
    Example {
        stage: StageId,
        stage_title: String,
        example_index: u32,
        example_count: u32,
        example: WorkedExampleView,
    },
    Practice {
        stage: StageId,
        stage_title: String,
        question: QuestionView,
    },
    Complete {
        questions_attempted: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTone {
    Celebratory,
    Encouraging,
    Supportive,
    Corrective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Template,
    Ai,
}

impl FeedbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSource::Template => "template",
            FeedbackSource::Ai => "ai",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub message: String,
    pub tone: FeedbackTone,
    pub source: FeedbackSource,
}

/// Body sent to the external feedback generator.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackPrompt {
    pub original_number: String,
    pub decimal_places: u32,
    pub chosen_value: String,
    pub correct_answer: String,
    pub misconception: MisconceptionKind,
    pub misconception_count: u32,
    pub tone: FeedbackTone,
    pub learner: LearnerContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub stage: StageId,
    pub stage_title: String,
    pub showing_example: bool,
    pub current_example_index: u32,
    pub consecutive_correct: u32,
    pub required_streak: Option<u32>,
    pub questions_attempted: u32,
    pub stage_attempted: u32,
    pub stage_correct: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub is_correct: bool,
    pub chosen_letter: ChoiceLetter,
    pub correct_letter: ChoiceLetter,
    pub verification: VerificationResult,
    pub outcome: AnswerOutcome,
    pub feedback: Feedback,
    pub progress: ProgressSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileResponse {
    pub total_questions: u32,
    pub total_correct: u32,
    pub accuracy: f64,
    pub consecutive_correct: u32,
    pub consecutive_incorrect: u32,
    pub is_struggling: bool,
    pub is_excelling: bool,
    pub engagement: EngagementLevel,
    pub response_trend: ResponseTrend,
    pub average_response_secs: f64,
    pub most_common_misconception: Option<MisconceptionKind>,
    pub recent: RecentSummary,
    pub topic: TopicSummary,
}
