use std::cmp::Ordering;

use crate::error::{TutorError, TutorResult};
use crate::metrics::{ANSWERS_VERIFIED_TOTAL, GROUND_TRUTH_MISMATCH_TOTAL, MISCONCEPTIONS_TOTAL};
use crate::models::question::{ChoiceLetter, Question};
use crate::models::verification::{
    Misconception, MisconceptionKind, VerificationResult, VerificationSteps,
};

use super::rounding::{compare_decimals, decimal_places_of, round_half_up};

/// Checks answers against independently recomputed ground truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, question: &Question, chosen: ChoiceLetter) -> TutorResult<VerificationResult> {
        let steps = round_half_up(&question.original_number, question.decimal_places)?;

        let stated_correct = match question.choice(question.correct_letter) {
            Some(choice) => choice.value.as_str(),
            None => {
                tracing::error!(
                    "Question {} marks {} correct but has no such choice",
                    question.id,
                    question.correct_letter
                );
                return Err(TutorError::InvariantViolation(format!(
                    "correct letter {} missing from question {}",
                    question.correct_letter, question.id
                )));
            }
        };
        if steps.correct_answer != question.correct_answer || steps.correct_answer != stated_correct {
            tracing::error!(
                "Ground truth mismatch on question {}: {} at {} dp recomputes to {}, question states {} (letter {} = {})",
                question.id,
                question.original_number,
                question.decimal_places,
                steps.correct_answer,
                question.correct_answer,
                question.correct_letter,
                stated_correct
            );
            GROUND_TRUTH_MISMATCH_TOTAL.inc();
            return Err(TutorError::GroundTruthMismatch {
                number: question.original_number.clone(),
                decimal_places: question.decimal_places,
                recomputed: steps.correct_answer,
                stated: question.correct_answer.clone(),
            });
        }

        let choice = question
            .choice(chosen)
            .ok_or_else(|| TutorError::UnknownChoice(chosen.to_string()))?;
        let is_correct = chosen == question.correct_letter;

        let misconception = if is_correct {
            None
        } else {
            let kind = classify(&choice.value, &steps, choice.misconception);
            MISCONCEPTIONS_TOTAL.with_label_values(&[kind.label()]).inc();
            Some(Misconception {
                kind,
                chosen_value: choice.value.clone(),
                chosen_decimal_places: decimal_places_of(&choice.value),
                distractor_tag: choice.misconception,
                expected_decimal_places: steps.decimal_places,
                should_round_up: steps.round_up,
                correct_answer: steps.correct_answer.clone(),
            })
        };

        ANSWERS_VERIFIED_TOTAL
            .with_label_values(&[if is_correct { "true" } else { "false" }])
            .inc();

        Ok(VerificationResult {
            is_correct,
            chosen_value: choice.value.clone(),
            verification_steps: steps,
            misconception,
        })
    }

    /// Trace for a worked example; same arithmetic as verification.
    pub fn worked_steps(&self, number: &str, decimal_places: u32) -> TutorResult<VerificationSteps> {
        round_half_up(number, decimal_places)
    }
}

/// Structural errors win over directional ones; the generator's tag is the last resort.
pub fn classify(
    chosen_value: &str,
    steps: &VerificationSteps,
    tag: Option<MisconceptionKind>,
) -> MisconceptionKind {
    let chosen_places = decimal_places_of(chosen_value);

    if steps.decimal_places > 0 && chosen_places == Some(0) {
        return MisconceptionKind::RoundedToWholeNumber;
    }

    if let Some(places) = chosen_places {
        if places != steps.decimal_places {
            return MisconceptionKind::WrongDecimalPlaces;
        }
        match compare_decimals(chosen_value, &steps.correct_answer) {
            Some(Ordering::Greater) => return MisconceptionKind::RoundedUpShouldRoundDown,
            Some(Ordering::Less) => return MisconceptionKind::RoundedDownShouldRoundUp,
            _ => {}
        }
    }

    tag.unwrap_or(MisconceptionKind::GeneralRoundingError)
}
