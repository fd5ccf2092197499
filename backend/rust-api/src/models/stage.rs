use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::verification::MisconceptionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageId {
    #[serde(rename = "1.1")]
    OneDpNoUp,
    #[serde(rename = "1.2")]
    OneDpWithUp,
    #[serde(rename = "1.3")]
    OneDpMixed,
    #[serde(rename = "2.1")]
    MultiDp,
    #[serde(rename = "stretch")]
    Stretch,
    #[serde(rename = "complete")]
    Complete,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::OneDpNoUp => "1.1",
            StageId::OneDpWithUp => "1.2",
            StageId::OneDpMixed => "1.3",
            StageId::MultiDp => "2.1",
            StageId::Stretch => "stretch",
            StageId::Complete => "complete",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "1.1" => Ok(StageId::OneDpNoUp),
            "1.2" => Ok(StageId::OneDpWithUp),
            "1.3" => Ok(StageId::OneDpMixed),
            "2.1" => Ok(StageId::MultiDp),
            "stretch" => Ok(StageId::Stretch),
            "complete" => Ok(StageId::Complete),
            _ => Err(format!("Invalid stage id: {}", value)),
        }
    }
}

/// Which side of the half-way point the digit right of the target may fall on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingCase {
    DownOnly,
    UpOnly,
    Both,
}

impl RoundingCase {
    pub fn allows(&self, round_up: bool) -> bool {
        match self {
            RoundingCase::DownOnly => !round_up,
            RoundingCase::UpOnly => round_up,
            RoundingCase::Both => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MasteryRule {
    ConsecutiveCorrect {
        consecutive: u32,
    },
    ConsecutiveCorrectWithMinAttempts {
        consecutive: u32,
        min_attempts: u32,
    },
    Terminal,
}

impl MasteryRule {
    /// `stage_attempts` counts answers given while in the stage, including the current one.
    pub fn is_satisfied(&self, consecutive_correct: u32, stage_attempts: u32) -> bool {
        match *self {
            MasteryRule::ConsecutiveCorrect { consecutive } => consecutive_correct >= consecutive,
            MasteryRule::ConsecutiveCorrectWithMinAttempts {
                consecutive,
                min_attempts,
            } => consecutive_correct >= consecutive && stage_attempts >= min_attempts,
            MasteryRule::Terminal => false,
        }
    }

    pub fn required_streak(&self) -> Option<u32> {
        match *self {
            MasteryRule::ConsecutiveCorrect { consecutive }
            | MasteryRule::ConsecutiveCorrectWithMinAttempts { consecutive, .. } => {
                Some(consecutive)
            }
            MasteryRule::Terminal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkedExample {
    pub number: &'static str,
    pub decimal_places: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub id: StageId,
    pub position: usize,
    pub title: &'static str,
    pub decimal_places: &'static [u32],
    pub rounding_case: RoundingCase,
    /// Forces a 9 in the target place that has to carry on some draws.
    pub carry_cases: bool,
    pub misconception_pool: &'static [MisconceptionKind],
    pub mastery: MasteryRule,
    pub worked_examples: &'static [WorkedExample],
    pub next: Option<StageId>,
}

impl Stage {
    pub fn opens_with_examples(&self) -> bool {
        !self.worked_examples.is_empty()
    }

    pub fn example_count(&self) -> u32 {
        self.worked_examples.len() as u32
    }

    /// Worked examples are numbered from 1.
    pub fn worked_example(&self, index: u32) -> Option<&WorkedExample> {
        index
            .checked_sub(1)
            .and_then(|i| self.worked_examples.get(i as usize))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.mastery, MasteryRule::Terminal)
    }
}

pub static STAGE_CATALOG: &[Stage] = &[
    Stage {
        id: StageId::OneDpNoUp,
        position: 0,
        title: "Round to 1 decimal place (no rounding up)",
        decimal_places: &[1],
        rounding_case: RoundingCase::DownOnly,
        carry_cases: false,
        misconception_pool: &[
            MisconceptionKind::RoundedUpShouldRoundDown,
            MisconceptionKind::RoundedToWholeNumber,
            MisconceptionKind::WrongDecimalPlaces,
        ],
        mastery: MasteryRule::ConsecutiveCorrect { consecutive: 1 },
        worked_examples: &[
            WorkedExample {
                number: "12.632",
                decimal_places: 1,
            },
            WorkedExample {
                number: "12.682",
                decimal_places: 1,
            },
        ],
        next: Some(StageId::OneDpWithUp),
    },
    Stage {
        id: StageId::OneDpWithUp,
        position: 1,
        title: "Round to 1 decimal place (rounding up)",
        decimal_places: &[1],
        rounding_case: RoundingCase::UpOnly,
        carry_cases: false,
        misconception_pool: &[
            MisconceptionKind::RoundedDownShouldRoundUp,
            MisconceptionKind::RoundedToWholeNumber,
            MisconceptionKind::WrongDecimalPlaces,
        ],
        mastery: MasteryRule::ConsecutiveCorrect { consecutive: 1 },
        worked_examples: &[],
        next: Some(StageId::OneDpMixed),
    },
    Stage {
        id: StageId::OneDpMixed,
        position: 2,
        title: "Round to 1 decimal place (mixed)",
        decimal_places: &[1],
        rounding_case: RoundingCase::Both,
        carry_cases: false,
        misconception_pool: &[
            MisconceptionKind::RoundedUpShouldRoundDown,
            MisconceptionKind::RoundedDownShouldRoundUp,
            MisconceptionKind::RoundedToWholeNumber,
            MisconceptionKind::WrongDecimalPlaces,
            MisconceptionKind::LookedAtWrongDigit,
        ],
        mastery: MasteryRule::ConsecutiveCorrect { consecutive: 2 },
        worked_examples: &[],
        next: Some(StageId::MultiDp),
    },
    Stage {
        id: StageId::MultiDp,
        position: 3,
        title: "Round to 2 and 3 decimal places",
        decimal_places: &[2, 3],
        rounding_case: RoundingCase::Both,
        carry_cases: false,
        misconception_pool: &[
            MisconceptionKind::RoundedUpShouldRoundDown,
            MisconceptionKind::RoundedDownShouldRoundUp,
            MisconceptionKind::WrongDecimalPlaces,
            MisconceptionKind::RoundedToWholeNumber,
            MisconceptionKind::LookedAtWrongDigit,
        ],
        mastery: MasteryRule::ConsecutiveCorrect { consecutive: 3 },
        worked_examples: &[
            WorkedExample {
                number: "12.632",
                decimal_places: 2,
            },
            WorkedExample {
                number: "12.6784",
                decimal_places: 3,
            },
        ],
        next: Some(StageId::Stretch),
    },
    Stage {
        id: StageId::Stretch,
        position: 4,
        title: "Stretch: carrying through nines",
        decimal_places: &[1, 2, 3],
        rounding_case: RoundingCase::Both,
        carry_cases: true,
        misconception_pool: &[
            MisconceptionKind::NinesCarryError,
            MisconceptionKind::RoundedDownShouldRoundUp,
            MisconceptionKind::RoundedUpShouldRoundDown,
            MisconceptionKind::WrongDecimalPlaces,
            MisconceptionKind::RoundedToWholeNumber,
        ],
        mastery: MasteryRule::ConsecutiveCorrectWithMinAttempts {
            consecutive: 3,
            min_attempts: 5,
        },
        worked_examples: &[
            WorkedExample {
                number: "9.96",
                decimal_places: 1,
            },
            WorkedExample {
                number: "3.995",
                decimal_places: 2,
            },
        ],
        next: Some(StageId::Complete),
    },
    Stage {
        id: StageId::Complete,
        position: 5,
        title: "Lesson complete",
        decimal_places: &[],
        rounding_case: RoundingCase::Both,
        carry_cases: false,
        misconception_pool: &[],
        mastery: MasteryRule::Terminal,
        worked_examples: &[],
        next: None,
    },
];
