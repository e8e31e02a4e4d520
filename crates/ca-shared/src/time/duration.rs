//! This module contains a common [`Duration`] struct which is able to parse
//! human-readable duration formats, like `1h`, `1h30m` or `2d 12h 30s`. It
//! additionally implements [`Deserialize`](serde::Deserialize) and
//! [`Serialize`](serde::Serialize), so it can be used directly in
//! configuration payloads.
//!
//! Furthermore, it implements [`Deref`], which enables us to use all associated
//! functions of [`std::time::Duration`] without re-implementing the public
//! functions on our own type.
use std::{fmt::Display, num::ParseIntError, ops::Deref, str::FromStr};

use snafu::{OptionExt, ResultExt, Snafu, ensure};

#[derive(Debug, PartialEq, Snafu)]
pub enum DurationParseError {
    #[snafu(display("empty input"))]
    EmptyInput,

    #[snafu(display("expected a number at position {position}, found {character:?}"))]
    ExpectedNumber { position: usize, character: char },

    #[snafu(display("expected a unit after the number {value}"))]
    ExpectedUnit { value: u64 },

    #[snafu(display("found invalid character {character:?} at position {position}"))]
    InvalidCharacter { position: usize, character: char },

    #[snafu(display("failed to parse {value:?} as number"))]
    ParseInt { source: ParseIntError, value: String },

    #[snafu(display("found invalid unit {unit:?}"))]
    InvalidUnit { unit: String },

    #[snafu(display("number overflow"))]
    NumberOverflow,
}

/// A [`Duration`] which is capable of parsing human-readable duration formats,
/// like `1h`, `90s`, `1h30m` or `2d 12h`. Fragments can either be written
/// directly after each other or separated by whitespace.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Duration(std::time::Duration);

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty(), EmptyInputSnafu);

        let mut chars = input.char_indices().peekable();
        let mut duration = std::time::Duration::ZERO;

        while let Some(&(start, character)) = chars.peek() {
            if character.is_whitespace() {
                chars.next();
                continue;
            }

            if !character.is_ascii_digit() {
                return if character.is_alphabetic() {
                    ExpectedNumberSnafu {
                        position: start,
                        character,
                    }
                    .fail()
                } else {
                    InvalidCharacterSnafu {
                        position: start,
                        character,
                    }
                    .fail()
                };
            }

            let mut value_end = start;
            while let Some(&(index, c)) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }

                value_end = index + 1;
                chars.next();
            }

            let value = &input[start..value_end];
            let value = value.parse::<u64>().context(ParseIntSnafu { value })?;

            let mut unit_end = value_end;
            while let Some(&(index, c)) = chars.peek() {
                if !c.is_ascii_alphabetic() {
                    break;
                }

                unit_end = index + 1;
                chars.next();
            }

            ensure!(unit_end > value_end, ExpectedUnitSnafu { value });

            let fragment = parse_fragment(value, &input[value_end..unit_end])?;
            duration = duration
                .checked_add(fragment)
                .context(NumberOverflowSnafu)?;
        }

        Ok(Self(duration))
    }
}

fn parse_fragment(value: u64, unit: &str) -> Result<std::time::Duration, DurationParseError> {
    let factor = match unit {
        "milliseconds" | "millisecond" | "millis" | "ms" => {
            return Ok(std::time::Duration::from_millis(value));
        }
        "seconds" | "second" | "secs" | "sec" | "s" => 1,
        "minutes" | "minute" | "mins" | "min" | "m" => 60,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600,
        "days" | "day" | "d" => 86400,
        "weeks" | "week" | "w" => 86400 * 7,
        _ => return InvalidUnitSnafu { unit }.fail(),
    };

    let secs = value.checked_mul(factor).context(NumberOverflowSnafu)?;
    Ok(std::time::Duration::from_secs(secs))
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_zero() {
            return write!(f, "0s");
        }

        let mut secs = self.0.as_secs();
        let millis = self.0.subsec_millis();

        for (factor, unit) in [(86400, "d"), (3600, "h"), (60, "m"), (1, "s")] {
            let value = secs / factor;
            if value > 0 {
                write!(f, "{value}{unit}")?;
                secs %= factor;
            }
        }

        if millis > 0 {
            write!(f, "{millis}ms")?;
        }

        Ok(())
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Self(value)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        value.0
    }
}

impl Duration {
    /// Creates a new [`Duration`] from the specified number of whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    /// Creates a new [`Duration`] from the specified number of milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    /// Creates a new [`Duration`] from the specified number of whole minutes.
    /// Panics if the number of minutes overflows when converted to seconds.
    pub const fn from_minutes_unchecked(minutes: u64) -> Self {
        Self::from_secs(minutes * 60)
    }

    /// Creates a new [`Duration`] from the specified number of whole hours.
    /// Panics if the number of hours overflows when converted to seconds.
    pub const fn from_hours_unchecked(hours: u64) -> Self {
        Self::from_minutes_unchecked(hours * 60)
    }

    /// Creates a new [`Duration`] from the specified number of whole days.
    /// Panics if the number of days overflows when converted to seconds.
    pub const fn from_days_unchecked(days: u64) -> Self {
        Self::from_hours_unchecked(days * 24)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("1h", 3600)]
    #[case("90s", 90)]
    #[case("1h30m", 5400)]
    #[case("1h 30m", 5400)]
    #[case("2d12h", 216_000)]
    #[case("15d 2m 2s", 1_296_122)]
    #[case("1w", 604_800)]
    #[case(" 10minutes ", 600)]
    fn parse_as_secs(#[case] input: &str, #[case] output: u64) {
        let duration: Duration = input.parse().unwrap();
        assert_eq!(duration.as_secs(), output);
    }

    #[test]
    fn parse_millis() {
        let duration: Duration = "1s 250ms".parse().unwrap();
        assert_eq!(duration.as_millis(), 1250);
    }

    #[rstest]
    #[case("", DurationParseError::EmptyInput)]
    #[case("h", DurationParseError::ExpectedNumber { position: 0, character: 'h' })]
    #[case("10", DurationParseError::ExpectedUnit { value: 10 })]
    #[case("1h-", DurationParseError::InvalidCharacter { position: 2, character: '-' })]
    #[case("5y", DurationParseError::InvalidUnit { unit: "y".to_owned() })]
    #[case("18446744073709551615w", DurationParseError::NumberOverflow)]
    fn parse_invalid(#[case] input: &str, #[case] expected: DurationParseError) {
        let err = input.parse::<Duration>().unwrap_err();
        assert_eq!(err, expected);
    }

    #[rstest]
    #[case(Duration::from_secs(0), "0s")]
    #[case(Duration::from_hours_unchecked(1), "1h")]
    #[case(Duration::from_secs(5400), "1h30m")]
    #[case(Duration::from_millis(90_500), "1m30s500ms")]
    #[case(Duration::from_days_unchecked(2), "2d")]
    fn display(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(duration.to_string(), expected);
        assert_eq!(expected.parse::<Duration>().unwrap(), duration);
    }
}
