use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::Config;
use crate::metrics::FEEDBACK_TOTAL;
use crate::models::lesson::{Feedback, FeedbackPrompt, FeedbackSource, FeedbackTone};
use crate::models::profile::{LearnerContext, StudentProfile};
use crate::models::question::Question;
use crate::models::verification::VerificationResult;

use super::progression_service::AnswerOutcome;

/// Repeats of one misconception before a wrong answer is sent to the AI generator.
pub const ESCALATION_THRESHOLD: u32 = 2;

const MAX_AI_WORDS: usize = 120;
const BANNED_PHRASES: &[&str] = &["magic", "trick", "simply", "just remember", "easy"];

pub struct FeedbackService {
    ai: Option<AiFeedbackClient>,
}

struct AiFeedbackClient {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl FeedbackService {
    pub fn new(config: &Config) -> Self {
        let timeout = Duration::from_millis(config.ai_feedback_timeout_ms.max(1));
        let ai = config.ai_feedback_url.as_ref().and_then(|url| {
            match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => Some(AiFeedbackClient {
                    url: url.clone(),
                    timeout,
                    client,
                }),
                Err(e) => {
                    tracing::warn!("AI feedback client unavailable, using templates: {}", e);
                    None
                }
            }
        });
        Self { ai }
    }

    pub fn templates_only() -> Self {
        Self { ai: None }
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.is_some()
    }

    pub fn tone(is_correct: bool, context: &LearnerContext) -> FeedbackTone {
        match (is_correct, context.is_excelling, context.is_struggling) {
            (true, true, _) => FeedbackTone::Celebratory,
            (true, false, _) => FeedbackTone::Encouraging,
            (false, _, true) => FeedbackTone::Supportive,
            (false, _, false) => FeedbackTone::Corrective,
        }
    }

    /// Repeated misconceptions go to the AI generator when one is configured.
    pub fn should_escalate(&self, result: &VerificationResult, profile: &StudentProfile) -> bool {
        if !self.ai_enabled() || result.is_correct {
            return false;
        }
        result
            .misconception
            .as_ref()
            .map(|m| profile.misconception_count(m.kind) >= ESCALATION_THRESHOLD)
            .unwrap_or(false)
    }

    /// Never fails: any AI error falls back to the template text.
    pub async fn feedback(
        &self,
        question: &Question,
        result: &VerificationResult,
        profile: &StudentProfile,
        outcome: &AnswerOutcome,
    ) -> Feedback {
        let context = profile.learner_context();
        let tone = Self::tone(result.is_correct, &context);

        if self.should_escalate(result, profile) {
            if let (Some(ai), Some(misconception)) = (&self.ai, &result.misconception) {
                let prompt = FeedbackPrompt {
                    original_number: question.original_number.clone(),
                    decimal_places: question.decimal_places,
                    chosen_value: result.chosen_value.clone(),
                    correct_answer: result.verification_steps.correct_answer.clone(),
                    misconception: misconception.kind,
                    misconception_count: profile.misconception_count(misconception.kind),
                    tone,
                    learner: context.clone(),
                };
                match ai.generate(&prompt).await {
                    Ok(message) => {
                        FEEDBACK_TOTAL.with_label_values(&[FeedbackSource::Ai.as_str()]).inc();
                        return Feedback {
                            message,
                            tone,
                            source: FeedbackSource::Ai,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(
                            "AI feedback failed for question {}, using template: {:#}",
                            question.id,
                            e
                        );
                    }
                }
            }
        }

        FEEDBACK_TOTAL
            .with_label_values(&[FeedbackSource::Template.as_str()])
            .inc();
        Feedback {
            message: template_message(result, tone, outcome),
            tone,
            source: FeedbackSource::Template,
        }
    }
}

impl AiFeedbackClient {
    async fn generate(&self, prompt: &FeedbackPrompt) -> Result<String> {
        let request = self.client.post(&self.url).json(prompt).send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| anyhow::anyhow!("AI feedback timed out after {:?}", self.timeout))?
            .context("Failed to call AI feedback service")?;

        if !response.status().is_success() {
            anyhow::bail!("AI feedback service returned status: {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Invalid AI feedback response body")?;
        let message = body["feedback"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid response format"))?
            .trim()
            .to_string();

        check_ai_message(&message)?;
        Ok(message)
    }
}

fn check_ai_message(message: &str) -> Result<()> {
    if message.len() < 10 {
        anyhow::bail!("AI feedback too short");
    }
    let words = message.split_whitespace().count();
    if words > MAX_AI_WORDS {
        anyhow::bail!("AI feedback too long: {} words", words);
    }
    let lower = message.to_lowercase();
    if let Some(phrase) = BANNED_PHRASES.iter().find(|p| lower.contains(*p)) {
        anyhow::bail!("AI feedback contains banned phrase: {}", phrase);
    }
    Ok(())
}

fn place_word(decimal_places: u32) -> &'static str {
    if decimal_places == 1 {
        "decimal place"
    } else {
        "decimal places"
    }
}

fn template_message(result: &VerificationResult, tone: FeedbackTone, outcome: &AnswerOutcome) -> String {
    let steps = &result.verification_steps;
    let direction = if steps.round_up {
        format!("{} is 5 or more, so the {} rounds up", steps.right_digit, steps.target_digit)
    } else {
        format!("{} is less than 5, so the {} stays the same", steps.right_digit, steps.target_digit)
    };

    let mut message = match (tone, &result.misconception) {
        (FeedbackTone::Celebratory, _) => format!(
            "Excellent! {} rounded to {} {} is {}.",
            steps.original_number,
            steps.decimal_places,
            place_word(steps.decimal_places),
            steps.correct_answer
        ),
        (_, None) => format!(
            "Correct. Look at the digit after the {}: {}.",
            steps.target_digit, direction
        ),
        (_, Some(misconception)) => {
            let opener = if tone == FeedbackTone::Supportive {
                "Not quite, and that's okay. Let's look at it together."
            } else {
                "Not quite."
            };
            format!(
                "{} You chose {}, which means you {}. {} rounded to {} {} is {}. Look at the digit after the {}: {}.",
                opener,
                misconception.chosen_value,
                misconception.kind.learner_action(),
                steps.original_number,
                steps.decimal_places,
                place_word(steps.decimal_places),
                steps.correct_answer,
                steps.target_digit,
                direction
            )
        }
    };

    match outcome {
        AnswerOutcome::Advanced { to, .. } => {
            message.push_str(&format!(" You've mastered this stage. On to stage {}!", to));
        }
        AnswerOutcome::Completed { .. } => {
            message.push_str(" You've completed the rounding lesson!");
        }
        AnswerOutcome::Stayed { .. } | AnswerOutcome::AlreadyComplete => {}
    }
    message
}
