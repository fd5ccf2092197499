use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of rounding errors. Produced once by the verifier (or attached to a
/// distractor by the generator) and passed downstream as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisconceptionKind {
    RoundedToWholeNumber,
    WrongDecimalPlaces,
    RoundedUpShouldRoundDown,
    RoundedDownShouldRoundUp,
    TruncatedInsteadOfRounded,
    LookedAtWrongDigit,
    NinesCarryError,
    GeneralRoundingError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisconceptionCategory {
    RoundingDirection,
    PlaceValue,
    DecimalPlace,
    Carrying,
    General,
}

impl MisconceptionKind {
    pub fn label(&self) -> &'static str {
        match self {
            MisconceptionKind::RoundedToWholeNumber => "rounded_to_whole_number",
            MisconceptionKind::WrongDecimalPlaces => "wrong_decimal_places",
            MisconceptionKind::RoundedUpShouldRoundDown => "rounded_up_should_round_down",
            MisconceptionKind::RoundedDownShouldRoundUp => "rounded_down_should_round_up",
            MisconceptionKind::TruncatedInsteadOfRounded => "truncated_instead_of_rounded",
            MisconceptionKind::LookedAtWrongDigit => "looked_at_wrong_digit",
            MisconceptionKind::NinesCarryError => "nines_carry_error",
            MisconceptionKind::GeneralRoundingError => "general_rounding_error",
        }
    }

    pub fn category(&self) -> MisconceptionCategory {
        match self {
            MisconceptionKind::RoundedUpShouldRoundDown
            | MisconceptionKind::RoundedDownShouldRoundUp
            | MisconceptionKind::TruncatedInsteadOfRounded
            | MisconceptionKind::LookedAtWrongDigit => MisconceptionCategory::RoundingDirection,
            MisconceptionKind::RoundedToWholeNumber => MisconceptionCategory::PlaceValue,
            MisconceptionKind::WrongDecimalPlaces => MisconceptionCategory::DecimalPlace,
            MisconceptionKind::NinesCarryError => MisconceptionCategory::Carrying,
            MisconceptionKind::GeneralRoundingError => MisconceptionCategory::General,
        }
    }

    /// What choosing a value with this misconception says the learner did.
    pub fn learner_action(&self) -> &'static str {
        match self {
            MisconceptionKind::RoundedToWholeNumber => "rounded to a whole number",
            MisconceptionKind::WrongDecimalPlaces => "rounded to the wrong number of decimal places",
            MisconceptionKind::RoundedUpShouldRoundDown => "rounded up when the digit should stay the same",
            MisconceptionKind::RoundedDownShouldRoundUp => "kept the digit when it should round up",
            MisconceptionKind::TruncatedInsteadOfRounded => "cut off the extra digits instead of rounding",
            MisconceptionKind::LookedAtWrongDigit => "decided using the wrong digit",
            MisconceptionKind::NinesCarryError => "rolled a 9 over to 0 without carrying",
            MisconceptionKind::GeneralRoundingError => "made a rounding error",
        }
    }
}

impl fmt::Display for MisconceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Numeric trace justifying the correct answer. `target_digit` and `right_digit` are
/// always derivable from `original_number` and `decimal_places`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSteps {
    pub original_number: String,
    pub decimal_places: u32,
    pub target_digit: u8,
    pub right_digit: u8,
    pub round_up: bool,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misconception {
    pub kind: MisconceptionKind,
    pub chosen_value: String,
    /// `None` when the chosen value is not a plain decimal.
    pub chosen_decimal_places: Option<u32>,
    /// The tag the generator attached to the chosen distractor, if any.
    pub distractor_tag: Option<MisconceptionKind>,
    pub expected_decimal_places: u32,
    pub should_round_up: bool,
    pub correct_answer: String,
}

impl Misconception {
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_correct: bool,
    pub chosen_value: String,
    pub verification_steps: VerificationSteps,
    pub misconception: Option<Misconception>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_serde_names() {
        let kinds = [
            MisconceptionKind::RoundedToWholeNumber,
            MisconceptionKind::WrongDecimalPlaces,
            MisconceptionKind::RoundedUpShouldRoundDown,
            MisconceptionKind::RoundedDownShouldRoundUp,
            MisconceptionKind::TruncatedInsteadOfRounded,
            MisconceptionKind::LookedAtWrongDigit,
            MisconceptionKind::NinesCarryError,
            MisconceptionKind::GeneralRoundingError,
        ];
        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.label()));
        }
    }

    #[test]
    fn direction_errors_share_a_category() {
        assert_eq!(
            MisconceptionKind::RoundedUpShouldRoundDown.category(),
            MisconceptionKind::RoundedDownShouldRoundUp.category()
        );
        assert_eq!(
            MisconceptionKind::RoundedToWholeNumber.category(),
            MisconceptionCategory::PlaceValue
        );
    }
}
