use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use super::stage::StageId;
use super::verification::MisconceptionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChoiceLetter {
    A,
    B,
    C,
    D,
}

impl ChoiceLetter {
    pub const ALL: [ChoiceLetter; 4] = [ChoiceLetter::A, ChoiceLetter::B, ChoiceLetter::C, ChoiceLetter::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceLetter::A => "A",
            ChoiceLetter::B => "B",
            ChoiceLetter::C => "C",
            ChoiceLetter::D => "D",
        }
    }
}

impl fmt::Display for ChoiceLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChoiceLetter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "A" => Ok(ChoiceLetter::A),
            "B" => Ok(ChoiceLetter::B),
            "C" => Ok(ChoiceLetter::C),
            "D" => Ok(ChoiceLetter::D),
            _ => Err(format!("Invalid choice letter: {}", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerChoice {
    pub value: String,
    /// Set on every distractor, never on the correct choice.
    pub misconception: Option<MisconceptionKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub stage: StageId,
    pub original_number: String,
    pub decimal_places: u32,
    pub correct_answer: String,
    pub choices: BTreeMap<ChoiceLetter, AnswerChoice>,
    pub correct_letter: ChoiceLetter,
}

impl Question {
    /// Key used for per-stage de-duplication.
    pub fn number_key(&self) -> String {
        number_key(&self.original_number, self.decimal_places)
    }

    pub fn choice(&self, letter: ChoiceLetter) -> Option<&AnswerChoice> {
        self.choices.get(&letter)
    }

    /// Learner-facing projection: no correct letter and no misconception tags.
    pub fn view(&self) -> QuestionView {
        QuestionView {
            question_id: self.id.clone(),
            stage: self.stage,
            original_number: self.original_number.clone(),
            decimal_places: self.decimal_places,
            choices: self
                .choices
                .iter()
                .map(|(letter, choice)| (*letter, choice.value.clone()))
                .collect(),
        }
    }
}

pub fn number_key(number: &str, decimal_places: u32) -> String {
    format!("{}@{}", number, decimal_places)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub question_id: String,
    pub stage: StageId,
    pub original_number: String,
    pub decimal_places: u32,
    pub choices: BTreeMap<ChoiceLetter, String>,
}

/// The question a learner is currently answering, as held by the snapshot store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveQuestion {
    pub question: Question,
    pub served_at: DateTime<Utc>,
}
