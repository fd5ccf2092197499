use rand::{seq::SliceRandom, Rng};
use std::{cmp::Ordering, collections::BTreeMap};
use uuid::Uuid;

use crate::error::{TutorError, TutorResult};
use crate::metrics::{GENERATION_NOVELTY_RELAXED_TOTAL, QUESTIONS_GENERATED_TOTAL};
use crate::models::question::{number_key, AnswerChoice, ChoiceLetter, Question};
use crate::models::sequence::SequenceState;
use crate::models::stage::{RoundingCase, Stage};
use crate::models::verification::{MisconceptionKind, VerificationSteps};

use super::rounding::{compare_decimals, round_half_up, DecimalDigits, MAX_DECIMAL_PLACES};

pub const DEFAULT_RETRY_BUDGET: u32 = 50;
const MIN_DISTRACTORS: usize = 2;
const MAX_DISTRACTORS: usize = 3;

/// Tried after the stage pool when it does not yield enough distinct distractors.
const SUPPLEMENTARY_KINDS: &[MisconceptionKind] = &[
    MisconceptionKind::RoundedToWholeNumber,
    MisconceptionKind::RoundedUpShouldRoundDown,
    MisconceptionKind::RoundedDownShouldRoundUp,
    MisconceptionKind::WrongDecimalPlaces,
    MisconceptionKind::TruncatedInsteadOfRounded,
    MisconceptionKind::LookedAtWrongDigit,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distractor {
    pub value: String,
    pub misconception: MisconceptionKind,
}

#[derive(Debug, Clone)]
pub struct GeneratedQuestion {
    pub stage: Stage,
    pub steps: VerificationSteps,
    pub distractors: Vec<Distractor>,
    /// False when the retry budget ran out and a repeat was accepted.
    pub novel: bool,
}

impl GeneratedQuestion {
    pub fn number_key(&self) -> String {
        number_key(&self.steps.original_number, self.steps.decimal_places)
    }
}

#[derive(Debug, Clone)]
pub struct QuestionGenerator {
    retry_budget: u32,
}

impl Default for QuestionGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BUDGET)
    }
}

impl QuestionGenerator {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn generate(&self, stage: &Stage, state: &SequenceState) -> TutorResult<GeneratedQuestion> {
        self.generate_with_rng(stage, state, &mut rand::rng())
    }

    pub fn generate_with_rng<R: Rng + ?Sized>(
        &self,
        stage: &Stage,
        state: &SequenceState,
        rng: &mut R,
    ) -> TutorResult<GeneratedQuestion> {
        if stage.decimal_places.is_empty() {
            return Err(TutorError::InvariantViolation(format!(
                "stage {} has no practice rules",
                stage.id
            )));
        }

        let mut repeat: Option<GeneratedQuestion> = None;

        for _ in 0..self.retry_budget {
            let (number, places) = draw_number(stage, rng);
            let Some(candidate) = build_candidate(stage, &number, places)? else {
                continue;
            };

            if !state.is_used(stage.id, &candidate.number_key()) {
                return Ok(candidate);
            }
            if repeat.is_none() {
                repeat = Some(candidate);
            }
        }

        match repeat {
            Some(mut candidate) => {
                tracing::warn!(
                    "No novel number for stage {} within {} draws, repeating {}",
                    stage.id,
                    self.retry_budget,
                    candidate.number_key()
                );
                GENERATION_NOVELTY_RELAXED_TOTAL
                    .with_label_values(&[stage.id.as_str()])
                    .inc();
                candidate.novel = false;
                Ok(candidate)
            }
            None => Err(TutorError::InvariantViolation(format!(
                "stage {} never produced {} distinct distractors",
                stage.id, MIN_DISTRACTORS
            ))),
        }
    }

    /// Shuffles the correct value and distractors into letters A-D, tagging wrong letters.
    pub fn format_multiple_choice<R: Rng + ?Sized>(
        &self,
        generated: &GeneratedQuestion,
        rng: &mut R,
    ) -> Question {
        let mut entries: Vec<AnswerChoice> = Vec::with_capacity(generated.distractors.len() + 1);
        entries.push(AnswerChoice {
            value: generated.steps.correct_answer.clone(),
            misconception: None,
        });
        entries.extend(generated.distractors.iter().map(|d| AnswerChoice {
            value: d.value.clone(),
            misconception: Some(d.misconception),
        }));
        entries.shuffle(rng);

        let mut correct_letter = ChoiceLetter::A;
        let mut choices = BTreeMap::new();
        for (letter, choice) in ChoiceLetter::ALL.into_iter().zip(entries) {
            if choice.misconception.is_none() {
                correct_letter = letter;
            }
            choices.insert(letter, choice);
        }

        Question {
            id: Uuid::new_v4().to_string(),
            stage: generated.stage.id,
            original_number: generated.steps.original_number.clone(),
            decimal_places: generated.steps.decimal_places,
            correct_answer: generated.steps.correct_answer.clone(),
            choices,
            correct_letter,
        }
    }

    /// Generates, formats and records the question as used for its stage.
    pub fn next_question(&self, stage: &Stage, state: &mut SequenceState) -> TutorResult<Question> {
        self.next_question_with_rng(stage, state, &mut rand::rng())
    }

    pub fn next_question_with_rng<R: Rng + ?Sized>(
        &self,
        stage: &Stage,
        state: &mut SequenceState,
        rng: &mut R,
    ) -> TutorResult<Question> {
        let generated = self.generate_with_rng(stage, state, rng)?;
        let question = self.format_multiple_choice(&generated, rng);
        state.mark_used(stage.id, generated.number_key());

        QUESTIONS_GENERATED_TOTAL
            .with_label_values(&[stage.id.as_str()])
            .inc();
        tracing::debug!(
            "Generated question {} for stage {}: {} @ {} dp ({} choices)",
            question.id,
            stage.id,
            question.original_number,
            question.decimal_places,
            question.choices.len()
        );

        Ok(question)
    }
}

fn draw_number<R: Rng + ?Sized>(stage: &Stage, rng: &mut R) -> (String, u32) {
    let places = stage.decimal_places[rng.random_range(0..stage.decimal_places.len())];
    let fraction_len = places + rng.random_range(1..=2u32);
    let carry = stage.carry_cases && stage.rounding_case.allows(true) && rng.random_bool(0.5);
    let round_up = carry
        || match stage.rounding_case {
            RoundingCase::DownOnly => false,
            RoundingCase::UpOnly => true,
            RoundingCase::Both => rng.random_bool(0.5),
        };

    let integer = rng.random_range(1..=99u32);
    let mut fraction = String::with_capacity(fraction_len as usize);
    for place in 1..=fraction_len {
        let last = place == fraction_len;
        let digit = if place == places && carry {
            9
        } else if place == places + 1 {
            match (round_up, last) {
                (true, _) => rng.random_range(5..=9u32),
                (false, true) => rng.random_range(1..=4u32),
                (false, false) => rng.random_range(0..=4u32),
            }
        } else if last {
            rng.random_range(1..=9u32)
        } else {
            rng.random_range(0..=9u32)
        };
        fraction.push(char::from_digit(digit, 10).unwrap_or('0'));
    }

    (format!("{}.{}", integer, fraction), places)
}

fn build_candidate(stage: &Stage, number: &str, places: u32) -> TutorResult<Option<GeneratedQuestion>> {
    let steps = round_half_up(number, places)?;
    let digits = DecimalDigits::parse(number)?;

    let mut distractors: Vec<Distractor> = Vec::with_capacity(MAX_DISTRACTORS);
    let mut tried: Vec<MisconceptionKind> = Vec::new();

    for kind in stage
        .misconception_pool
        .iter()
        .chain(SUPPLEMENTARY_KINDS.iter())
        .copied()
    {
        if distractors.len() == MAX_DISTRACTORS {
            break;
        }
        if tried.contains(&kind) {
            continue;
        }
        tried.push(kind);

        let Some(value) = apply_misconception(kind, &digits, &steps) else {
            continue;
        };
        let collides = std::iter::once(steps.correct_answer.as_str())
            .chain(distractors.iter().map(|d| d.value.as_str()))
            .any(|existing| {
                existing == value || compare_decimals(existing, &value) == Some(Ordering::Equal)
            });
        if !collides {
            distractors.push(Distractor {
                value,
                misconception: kind,
            });
        }
    }

    if distractors.len() < MIN_DISTRACTORS {
        return Ok(None);
    }

    Ok(Some(GeneratedQuestion {
        stage: stage.clone(),
        steps,
        distractors,
        novel: true,
    }))
}

/// The answer a learner holding `kind` would give, when the misconception applies.
fn apply_misconception(
    kind: MisconceptionKind,
    digits: &DecimalDigits,
    steps: &VerificationSteps,
) -> Option<String> {
    let places = steps.decimal_places;
    match kind {
        MisconceptionKind::RoundedToWholeNumber => {
            (places > 0).then(|| digits.round_at(0, digits.digit_at(1) >= 5))
        }
        MisconceptionKind::WrongDecimalPlaces => {
            if digits.fraction_len() > places && places < MAX_DECIMAL_PLACES {
                Some(digits.round_at(places + 1, digits.digit_at(places + 2) >= 5))
            } else if places >= 2 {
                Some(digits.round_at(places - 1, digits.digit_at(places) >= 5))
            } else {
                None
            }
        }
        MisconceptionKind::RoundedUpShouldRoundDown => {
            (!steps.round_up).then(|| digits.round_at(places, true))
        }
        MisconceptionKind::RoundedDownShouldRoundUp => {
            steps.round_up.then(|| digits.round_at(places, false))
        }
        MisconceptionKind::TruncatedInsteadOfRounded => Some(digits.round_at(places, false)),
        MisconceptionKind::LookedAtWrongDigit => {
            Some(digits.round_at(places, digits.digit_at(places + 2) >= 5))
        }
        MisconceptionKind::NinesCarryError => {
            if steps.round_up {
                digits.roll_without_carry(places)
            } else {
                None
            }
        }
        MisconceptionKind::GeneralRoundingError => None,
    }
}
