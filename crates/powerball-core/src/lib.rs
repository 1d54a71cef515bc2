use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, Duration};

pub const MAIN_NUMBER_COUNT: usize = 5;
pub const MAIN_NUMBER_MIN: u8 = 1;
pub const MAIN_NUMBER_MAX: u8 = 50;
pub const POWERBALL_MIN: u8 = 1;
pub const POWERBALL_MAX: u8 = 20;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DrawError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("date error: {0}")]
    Date(String),
}

/// The five main numbers of a draw, kept in ascending order.
///
/// Sorting happens on every construction path (including deserialization),
/// so two draws with the same numbers always compare equal regardless of the
/// order they were drawn in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(from = "[u8; 5]", into = "[u8; 5]")]
pub struct MainNumbers([u8; MAIN_NUMBER_COUNT]);

impl MainNumbers {
    #[must_use]
    pub fn new(mut numbers: [u8; MAIN_NUMBER_COUNT]) -> Self {
        numbers.sort_unstable();
        Self(numbers)
    }

    /// Builds a sorted set from an arbitrary-length slice.
    ///
    /// # Errors
    /// Returns [`DrawError::Validation`] when the slice does not hold exactly
    /// five numbers.
    pub fn from_slice(values: &[u8]) -> Result<Self, DrawError> {
        let numbers: [u8; MAIN_NUMBER_COUNT] = values.try_into().map_err(|_| {
            DrawError::Validation(format!(
                "exactly {MAIN_NUMBER_COUNT} main numbers are required, got {}",
                values.len()
            ))
        })?;
        Ok(Self::new(numbers))
    }

    #[must_use]
    pub fn as_array(&self) -> [u8; MAIN_NUMBER_COUNT] {
        self.0
    }

    /// Checks range and uniqueness of the main numbers.
    ///
    /// # Errors
    /// Returns [`DrawError::Validation`] when a number falls outside
    /// `1..=50` or appears more than once.
    pub fn validate(&self) -> Result<(), DrawError> {
        if let Some(out_of_range) = self
            .0
            .iter()
            .find(|value| !(MAIN_NUMBER_MIN..=MAIN_NUMBER_MAX).contains(*value))
        {
            return Err(DrawError::Validation(format!(
                "main numbers MUST be between {MAIN_NUMBER_MIN} and {MAIN_NUMBER_MAX}, got {out_of_range}"
            )));
        }

        let distinct: BTreeSet<u8> = self.0.iter().copied().collect();
        if distinct.len() != MAIN_NUMBER_COUNT {
            return Err(DrawError::Validation(format!(
                "main numbers MUST be distinct, got {self}"
            )));
        }

        Ok(())
    }
}

impl From<[u8; MAIN_NUMBER_COUNT]> for MainNumbers {
    fn from(value: [u8; MAIN_NUMBER_COUNT]) -> Self {
        Self::new(value)
    }
}

impl From<MainNumbers> for [u8; MAIN_NUMBER_COUNT] {
    fn from(value: MainNumbers) -> Self {
        value.0
    }
}

impl Display for MainNumbers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e] = self.0;
        write!(f, "[{a}, {b}, {c}, {d}, {e}]")
    }
}

/// Checks that a powerball number is within `1..=20`.
///
/// # Errors
/// Returns [`DrawError::Validation`] for out-of-range values.
pub fn validate_powerball(value: u8) -> Result<(), DrawError> {
    if (POWERBALL_MIN..=POWERBALL_MAX).contains(&value) {
        Ok(())
    } else {
        Err(DrawError::Validation(format!(
            "powerball number MUST be between {POWERBALL_MIN} and {POWERBALL_MAX}, got {value}"
        )))
    }
}

/// Target of a frequency lookup. `powerball: None` matches on main numbers only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Combination {
    pub main: MainNumbers,
    pub powerball: Option<u8>,
}

impl Combination {
    #[must_use]
    pub fn new(main: MainNumbers, powerball: Option<u8>) -> Self {
        Self { main, powerball }
    }
}

impl Display for Combination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.powerball {
            Some(powerball) => write!(f, "{} + {powerball}", self.main),
            None => write!(f, "{} + any", self.main),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DrawInput {
    #[serde(with = "iso_date")]
    pub draw_date: Date,
    pub is_powerball_plus: bool,
    pub draw_sequence_num: Option<u32>,
    pub main_numbers: MainNumbers,
    pub powerball: u8,
}

impl DrawInput {
    /// Validates a human-entered draw before it reaches the store.
    ///
    /// The store does not call this; schema constraints are the only check
    /// applied at insert time.
    ///
    /// # Errors
    /// Returns [`DrawError::Validation`] when a number is out of range or the
    /// main numbers repeat.
    pub fn validate(&self) -> Result<(), DrawError> {
        self.main_numbers.validate()?;
        validate_powerball(self.powerball)
    }
}

/// One row of the `dates` table.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DrawDate {
    pub id: i64,
    #[serde(with = "iso_date")]
    pub draw_date: Date,
    pub is_powerball_plus: bool,
    pub draw_sequence_num: Option<u32>,
}

/// A stored draw joined across `dates` and `draws`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Draw {
    pub draw_id: i64,
    pub date_id: i64,
    #[serde(with = "iso_date")]
    pub draw_date: Date,
    pub is_powerball_plus: bool,
    pub draw_sequence_num: Option<u32>,
    pub main_numbers: MainNumbers,
    pub powerball: u8,
}

/// Which uniqueness rule rejected an insert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DrawConflict {
    DuplicateDate,
    DuplicateSequence,
    DuplicateNumbers,
}

impl DrawConflict {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateDate => "duplicate_date",
            Self::DuplicateSequence => "duplicate_sequence",
            Self::DuplicateNumbers => "duplicate_numbers",
        }
    }
}

impl Display for DrawConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frequency {
    pub combination: Combination,
    pub occurrences: u64,
    pub total_draws: u64,
    pub ratio: f64,
}

impl Frequency {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(combination: Combination, occurrences: u64, total_draws: u64) -> Self {
        let ratio = if total_draws == 0 {
            0.0
        } else {
            occurrences as f64 / total_draws as f64
        };

        Self {
            combination,
            occurrences,
            total_draws,
            ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SimulationPlan {
    pub count: usize,
    pub start_date: Date,
    pub first_sequence_num: u32,
}

/// Generates `plan.count` random draws on consecutive days.
///
/// Main numbers are five distinct values in `1..=50`, the powerball is in
/// `1..=20`. Sequence numbers count up from `plan.first_sequence_num`.
///
/// Both ranges are checked before anything is generated, so an oversized
/// `count` fails without allocating.
///
/// # Errors
/// Returns [`DrawError::Date`] when the date range overflows and
/// [`DrawError::Validation`] when sequence numbers run past `u32::MAX`.
pub fn simulate_draws<R: Rng>(
    plan: &SimulationPlan,
    rng: &mut R,
) -> Result<Vec<DrawInput>, DrawError> {
    let Some(last_offset) = plan.count.checked_sub(1) else {
        return Ok(Vec::new());
    };
    let last_offset = u32::try_from(last_offset)
        .ok()
        .filter(|value| plan.first_sequence_num.checked_add(*value).is_some())
        .ok_or_else(|| {
            DrawError::Validation(format!(
                "cannot simulate {} draws: sequence numbers starting at {} run past {}",
                plan.count,
                plan.first_sequence_num,
                u32::MAX
            ))
        })?;
    if plan
        .start_date
        .checked_add(Duration::days(i64::from(last_offset)))
        .is_none()
    {
        return Err(DrawError::Date(format!(
            "cannot simulate {} draws: dates starting at {} run past {}",
            plan.count,
            plan.start_date,
            Date::MAX
        )));
    }

    let mut draws = Vec::with_capacity(plan.count);
    let mut draw_date = plan.start_date;
    for offset in 0..=last_offset {
        if offset > 0 {
            draw_date = draw_date.next_day().ok_or_else(|| {
                DrawError::Date(format!("simulated date overflows after {draw_date}"))
            })?;
        }
        draws.push(DrawInput {
            draw_date,
            is_powerball_plus: rng.random_bool(0.5),
            draw_sequence_num: Some(plan.first_sequence_num + offset),
            main_numbers: random_main_numbers(rng)?,
            powerball: rng.random_range(POWERBALL_MIN..=POWERBALL_MAX),
        });
    }

    Ok(draws)
}

fn random_main_numbers<R: Rng>(rng: &mut R) -> Result<MainNumbers, DrawError> {
    let picked = index::sample(rng, usize::from(MAIN_NUMBER_MAX), MAIN_NUMBER_COUNT)
        .into_iter()
        .map(|idx| {
            u8::try_from(idx + 1)
                .map_err(|_| DrawError::Validation(format!("sampled index {idx} out of range")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    MainNumbers::from_slice(&picked)
}

/// Parses a `YYYY-MM-DD` draw date.
///
/// # Errors
/// Returns [`DrawError::Date`] when the value is not a valid calendar date.
pub fn parse_draw_date(value: &str) -> Result<Date, DrawError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| DrawError::Date(format!("invalid draw date {value:?}: {err}")))
}

/// Formats a draw date as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`DrawError::Date`] when formatting fails.
pub fn format_draw_date(value: Date) -> Result<String, DrawError> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| DrawError::Date(format!("failed to format draw date: {err}")))
}

/// Parses a comma-separated list such as `46,2,41,18,35`.
///
/// # Errors
/// Returns [`DrawError::Validation`] when an entry is not a number or the
/// list does not hold exactly five entries.
pub fn parse_main_numbers(raw: &str) -> Result<MainNumbers, DrawError> {
    let values = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u8>()
                .map_err(|err| DrawError::Validation(format!("invalid main number {part:?}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    MainNumbers::from_slice(&values)
}

#[must_use]
pub fn parse_yes_no(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// True only for an explicit `n`/`no`; blank or unrecognised answers are not a refusal.
#[must_use]
pub fn parse_no(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "n" | "no")
}

pub mod iso_date {
    //! Serde adapter writing [`time::Date`] as `YYYY-MM-DD`.

    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// # Errors
    /// Propagates formatting failures as serializer errors.
    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = super::format_draw_date(*value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    /// # Errors
    /// Fails when the input is not a `YYYY-MM-DD` string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_draw_date(&raw).map_err(serde::de::Error::custom)
    }
}
