use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;

use crate::error::{TutorError, TutorResult};
use crate::models::verification::VerificationSteps;

/// Deepest place the curriculum ever asks about.
pub const MAX_DECIMAL_PLACES: u32 = 6;

lazy_static! {
    static ref DECIMAL_RE: Regex = Regex::new(r"^([0-9]+)(?:\.([0-9]+))?$").unwrap();
}

/// Non-negative decimal held as digit vectors so rounding is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalDigits {
    integer: Vec<u8>,
    fraction: Vec<u8>,
}

impl DecimalDigits {
    pub fn parse(value: &str) -> TutorResult<Self> {
        let caps = DECIMAL_RE
            .captures(value.trim())
            .ok_or_else(|| TutorError::InvalidNumber(value.to_string()))?;

        let to_digits = |s: &str| s.bytes().map(|b| b - b'0').collect::<Vec<u8>>();
        let mut integer = to_digits(&caps[1]);
        while integer.len() > 1 && integer[0] == 0 {
            integer.remove(0);
        }
        let fraction = caps.get(2).map(|m| to_digits(m.as_str())).unwrap_or_default();

        Ok(Self { integer, fraction })
    }

    /// Number of digits written after the decimal point.
    pub fn fraction_len(&self) -> u32 {
        self.fraction.len() as u32
    }

    /// Place 0 is the units digit, place `k` the k-th digit after the point.
    /// Places beyond the written digits read as 0.
    pub fn digit_at(&self, place: u32) -> u8 {
        if place == 0 {
            return self.integer.last().copied().unwrap_or(0);
        }
        self.fraction
            .get(place as usize - 1)
            .copied()
            .unwrap_or(0)
    }

    /// Cuts after `places` digits and optionally adds one unit in the last kept place.
    /// The result always carries exactly `places` decimals.
    pub fn round_at(&self, places: u32, up: bool) -> String {
        let places = places as usize;
        let mut digits = self.integer.clone();
        digits.extend((0..places).map(|i| self.fraction.get(i).copied().unwrap_or(0)));

        if up {
            let mut carry = true;
            for digit in digits.iter_mut().rev() {
                if *digit == 9 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    carry = false;
                    break;
                }
            }
            if carry {
                digits.insert(0, 1);
            }
        }

        let split = digits.len() - places;
        render(&digits[..split], &digits[split..])
    }

    /// The "nines" slip: the target 9 becomes 0 and nothing carries left.
    pub fn roll_without_carry(&self, places: u32) -> Option<String> {
        if places == 0 || self.digit_at(places) != 9 {
            return None;
        }
        let mut fraction: Vec<u8> = (0..places as usize)
            .map(|i| self.fraction.get(i).copied().unwrap_or(0))
            .collect();
        if let Some(last) = fraction.last_mut() {
            *last = 0;
        }
        Some(render(&self.integer, &fraction))
    }
}

fn render(integer: &[u8], fraction: &[u8]) -> String {
    let mut start = 0;
    while start + 1 < integer.len() && integer[start] == 0 {
        start += 1;
    }
    let mut out: String = integer[start..].iter().map(|d| (b'0' + d) as char).collect();
    if out.is_empty() {
        out.push('0');
    }
    if !fraction.is_empty() {
        out.push('.');
        out.extend(fraction.iter().map(|d| (b'0' + d) as char));
    }
    out
}

/// Standard round-half-up at `decimal_places`, with the digit trace that justifies it.
pub fn round_half_up(number: &str, decimal_places: u32) -> TutorResult<VerificationSteps> {
    if decimal_places > MAX_DECIMAL_PLACES {
        return Err(TutorError::UnsupportedPlaces(decimal_places));
    }
    let digits = DecimalDigits::parse(number)?;
    let target_digit = digits.digit_at(decimal_places);
    let right_digit = digits.digit_at(decimal_places + 1);
    let round_up = right_digit >= 5;

    Ok(VerificationSteps {
        original_number: number.trim().to_string(),
        decimal_places,
        target_digit,
        right_digit,
        round_up,
        correct_answer: digits.round_at(decimal_places, round_up),
    })
}

/// Decimal places written in a plain decimal string; `None` if it is not one.
pub fn decimal_places_of(value: &str) -> Option<u32> {
    DecimalDigits::parse(value).ok().map(|d| d.fraction_len())
}

pub fn compare_decimals(left: &str, right: &str) -> Option<Ordering> {
    let a = DecimalDigits::parse(left).ok()?;
    let b = DecimalDigits::parse(right).ok()?;

    let ordering = a
        .integer
        .len()
        .cmp(&b.integer.len())
        .then_with(|| a.integer.cmp(&b.integer))
        .then_with(|| {
            let width = a.fraction.len().max(b.fraction.len());
            let pad = |f: &[u8]| -> Vec<u8> {
                (0..width).map(|i| f.get(i).copied().unwrap_or(0)).collect()
            };
            pad(&a.fraction).cmp(&pad(&b.fraction))
        });
    Some(ordering)
}
