//! Minute/hour/weekday schedules
//!
//! Each field is either a fixed value or a wildcard. A schedule matches a time
//! when every fixed field equals the corresponding component of that time.

use crate::error::{FlowrunError, Result};
use chrono::{Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer encoding of a wildcard field
pub const WILDCARD: i32 = -1;

/// When a flow should be triggered; `None` fields match anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub minute: Option<u32>,
    pub hour: Option<u32>,
    pub day: Option<Weekday>,
}

impl Schedule {
    /// Build a schedule from integer fields, `-1` meaning wildcard.
    ///
    /// `day` counts from Sunday: `0` is Sunday, `6` is Saturday.
    ///
    /// # Errors
    ///
    /// * `FlowrunError::Validation` - If a field is out of range
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::Weekday;
    /// use flowrun::schedule::Schedule;
    ///
    /// let schedule = Schedule::from_parts(30, 9, 1)?;
    /// assert_eq!(schedule.day, Some(Weekday::Mon));
    /// assert_eq!(schedule.to_string(), "M30 H9 DMon");
    ///
    /// let hourly = Schedule::from_parts(0, -1, -1)?;
    /// assert_eq!(hourly.to_string(), "M0 H* D*");
    /// # Ok::<(), flowrun::error::FlowrunError>(())
    /// ```
    pub fn from_parts(minute: i32, hour: i32, day: i32) -> Result<Self> {
        Ok(Self {
            minute: field("minute", minute, 59)?,
            hour: field("hour", hour, 23)?,
            day: field("day", day, 6)?.map(weekday_from_sunday),
        })
    }

    /// Integer encoding of the fields, `-1` for wildcards
    pub fn to_parts(&self) -> (i32, i32, i32) {
        (
            self.minute.map_or(WILDCARD, |m| m as i32),
            self.hour.map_or(WILDCARD, |h| h as i32),
            self.day
                .map_or(WILDCARD, |d| d.num_days_from_sunday() as i32),
        )
    }

    /// Check whether `now` satisfies every fixed field
    pub fn matches<T: Datelike + Timelike>(&self, now: &T) -> bool {
        self.day.map_or(true, |d| d == now.weekday())
            && self.hour.map_or(true, |h| h == now.hour())
            && self.minute.map_or(true, |m| m == now.minute())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part<T: fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "*".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "M{} H{} D{}",
            part(self.minute),
            part(self.hour),
            part(self.day)
        )
    }
}

fn field(name: &str, value: i32, max: i32) -> Result<Option<u32>> {
    match value {
        WILDCARD => Ok(None),
        v if (0..=max).contains(&v) => Ok(Some(v as u32)),
        v => Err(FlowrunError::Validation(format!(
            "Schedule {} must be between 0 and {} or {} for any, got {}",
            name, max, WILDCARD, v
        ))),
    }
}

fn weekday_from_sunday(day: u32) -> Weekday {
    match day {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}
