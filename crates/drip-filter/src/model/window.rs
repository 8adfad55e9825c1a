//! Trailing time windows for activity conditions.

use std::fmt;
use std::str::FromStr;

use jiff::{SignedDuration, Timestamp};

use crate::error::FilterError;

/// Seconds in one day.
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A trailing window literal of the form `"<unit>_<n>"`, e.g. `"days_30"`.
///
/// The numeric suffix is the window length in days; the unit label is kept
/// for display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    unit: String,
    days: u32,
}

impl TimeWindow {
    /// Creates a window of `days` days.
    pub fn days(days: u32) -> Self {
        Self {
            unit: "days".to_owned(),
            days,
        }
    }

    /// Returns the window length in days.
    #[inline]
    pub fn len_days(&self) -> u32 {
        self.days
    }

    /// Returns the unit label as written.
    #[inline]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Returns the inclusive `[since, until]` bounds ending at `now`.
    pub fn bounds(&self, now: Timestamp) -> Result<(Timestamp, Timestamp), FilterError> {
        let span = SignedDuration::from_secs(i64::from(self.days) * SECONDS_PER_DAY);
        let since = now
            .checked_sub(span)
            .map_err(|_| FilterError::InvalidTimeWindow(self.to_string()))?;
        Ok((since, now))
    }
}

impl FromStr for TimeWindow {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FilterError::InvalidTimeWindow(s.to_owned());

        let (unit, amount) = s.rsplit_once('_').ok_or_else(invalid)?;
        if unit.is_empty() || !unit.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        let days = amount.parse::<u32>().map_err(|_| invalid())?;

        Ok(Self {
            unit: unit.to_owned(),
            days,
        })
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.unit, self.days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let window: TimeWindow = "days_7".parse().unwrap();
        assert_eq!(window.len_days(), 7);
        assert_eq!(window.unit(), "days");
        assert_eq!(window.to_string(), "days_7");
    }

    #[test]
    fn test_suffix_is_day_count() {
        let window: TimeWindow = "weeks_2".parse().unwrap();
        assert_eq!(window.len_days(), 2);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for literal in ["7", "days_", "_7", "days_-1", "days_x", "", "da ys_3"] {
            assert!(literal.parse::<TimeWindow>().is_err(), "{literal}");
        }
    }

    #[test]
    fn test_bounds() {
        let now: Timestamp = "2024-03-10T12:00:00Z".parse().unwrap();
        let (since, until) = TimeWindow::days(3).bounds(now).unwrap();
        assert_eq!(since, "2024-03-07T12:00:00Z".parse::<Timestamp>().unwrap());
        assert_eq!(until, now);
    }
}
