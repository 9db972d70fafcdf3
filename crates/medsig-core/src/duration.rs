//! ISO-8601 duration parsing for intake periods and regimen lengths.
//!
//! Sigs express both "how often" (`intake_period`) and "for how long"
//! (`duration`) as ISO-8601 durations:
//!
//! - `P1D` once per day, `PT8H` every 8 hours, `P1W` weekly
//! - `P5D` five days, `P3M` three months
//! - Combined: `P1DT12H` = a day and a half
//!
//! Only the designator form is accepted (`PnYnMnWnDTnHnMnS`); the alternative
//! `PYYYY-MM-DD` form never shows up in dosing text.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("duration must start with 'P': {0:?}")]
    MissingPrefix(String),

    #[error("duration has no components: {0:?}")]
    Empty(String),

    #[error("duration has a 'T' with no time components: {0:?}")]
    EmptyTime(String),

    #[error("unexpected character {ch:?} in duration {input:?}")]
    Unexpected { input: String, ch: char },

    #[error("designator {designator:?} out of order or repeated in {input:?}")]
    OutOfOrder { input: String, designator: char },

    #[error("number without designator in {0:?}")]
    DanglingNumber(String),

    #[error("{designator:?} component out of range in {input:?}")]
    OutOfRange { input: String, designator: char },
}

/// A parsed ISO-8601 duration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IsoDuration {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: f64,
}

const HOURS_PER_DAY: f64 = 24.0;
const DAYS_PER_MONTH: f64 = 30.0;
const DAYS_PER_YEAR: f64 = 365.0;

impl IsoDuration {
    /// Parse a designator-form duration such as `P1D`, `PT4H` or `P1DT12H`.
    ///
    /// Leading and trailing whitespace is ignored; designators are matched
    /// case-insensitively. Fractions are accepted on the seconds field only.
    pub fn parse(input: &str) -> Result<Self, DurationError> {
        let s = input.trim().to_ascii_uppercase();
        let rest = s
            .strip_prefix('P')
            .ok_or_else(|| DurationError::MissingPrefix(input.to_string()))?;

        let (date_part, time_part) = match rest.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (rest, None),
        };

        let mut out = IsoDuration::default();
        let mut components = 0usize;

        components += parse_fields(input, date_part, &['Y', 'M', 'W', 'D'], |d, n| match d {
            'Y' => out.years = n as u32,
            'M' => out.months = n as u32,
            'W' => out.weeks = n as u32,
            _ => out.days = n as u32,
        })?;

        if let Some(time) = time_part {
            let n = parse_fields(input, time, &['H', 'M', 'S'], |d, n| match d {
                'H' => out.hours = n as u32,
                'M' => out.minutes = n as u32,
                _ => out.seconds = n,
            })?;
            if n == 0 {
                return Err(DurationError::EmptyTime(input.to_string()));
            }
            components += n;
        }

        if components == 0 {
            return Err(DurationError::Empty(input.to_string()));
        }
        Ok(out)
    }

    /// Approximate length in hours (months are 30 days, years 365).
    pub fn approx_hours(&self) -> f64 {
        let days = self.years as f64 * DAYS_PER_YEAR
            + self.months as f64 * DAYS_PER_MONTH
            + self.weeks as f64 * 7.0
            + self.days as f64;
        days * HOURS_PER_DAY + self.hours as f64 + self.minutes as f64 / 60.0 + self.seconds / 3600.0
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("P")?;
        for (n, d) in [
            (self.years, 'Y'),
            (self.months, 'M'),
            (self.weeks, 'W'),
            (self.days, 'D'),
        ] {
            if n > 0 {
                write!(f, "{n}{d}")?;
            }
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds > 0.0 {
            f.write_str("T")?;
            if self.hours > 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes > 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds > 0.0 {
                write!(f, "{}S", self.seconds)?;
            }
        } else if self.years + self.months + self.weeks + self.days == 0 {
            f.write_str("T0S")?;
        }
        Ok(())
    }
}

/// Parse `<number><designator>` pairs, requiring designators in `order`.
///
/// Returns the number of components found.
fn parse_fields(
    input: &str,
    part: &str,
    order: &[char],
    mut set: impl FnMut(char, f64),
) -> Result<usize, DurationError> {
    let mut next = 0usize;
    let mut number = String::new();
    let mut count = 0usize;

    for ch in part.chars() {
        if ch.is_ascii_digit() || ((ch == '.' || ch == ',') && order.contains(&'S')) {
            number.push(if ch == ',' { '.' } else { ch });
            continue;
        }

        let pos = order
            .iter()
            .position(|&d| d == ch)
            .ok_or_else(|| DurationError::Unexpected {
                input: input.to_string(),
                ch,
            })?;
        if pos < next {
            return Err(DurationError::OutOfOrder {
                input: input.to_string(),
                designator: ch,
            });
        }
        if number.is_empty() {
            return Err(DurationError::Unexpected {
                input: input.to_string(),
                ch,
            });
        }
        // Fractions only make sense on seconds.
        if number.contains('.') && ch != 'S' {
            return Err(DurationError::Unexpected {
                input: input.to_string(),
                ch: '.',
            });
        }
        let value: f64 = number.parse().map_err(|_| DurationError::Unexpected {
            input: input.to_string(),
            ch,
        })?;

        if ch != 'S' && value > u32::MAX as f64 {
            return Err(DurationError::OutOfRange {
                input: input.to_string(),
                designator: ch,
            });
        }

        set(ch, value);
        number.clear();
        next = pos + 1;
        count += 1;
    }

    if !number.is_empty() {
        return Err(DurationError::DanglingNumber(input.to_string()));
    }
    Ok(count)
}
