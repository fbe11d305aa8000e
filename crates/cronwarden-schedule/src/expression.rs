//! Five-field schedule expressions.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;

use crate::error::{FieldError, ScheduleError};
use crate::field::{CronField, Field};
use crate::presets;

/// A parsed schedule: five fields, a timezone and an optional holiday calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleExpression {
    pub(crate) minute: CronField,
    pub(crate) hour: CronField,
    pub(crate) day_of_month: CronField,
    pub(crate) month: CronField,
    pub(crate) day_of_week: CronField,
    pub(crate) timezone: Tz,
    pub(crate) holiday_calendar: Option<String>,
}

impl ScheduleExpression {
    /// Parse a five-field expression evaluated in UTC.
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let fields = split_fields(text)?;
        let mut parsed = Vec::with_capacity(5);
        let mut errors = Vec::new();

        for (field, raw) in Field::ALL.into_iter().zip(fields) {
            match CronField::parse(field, raw) {
                Ok(f) => parsed.push(f),
                Err(mut e) => errors.append(&mut e),
            }
        }

        if !errors.is_empty() {
            return Err(ScheduleError::InvalidScheduleExpression { errors });
        }

        let found = parsed.len();
        let [minute, hour, day_of_month, month, day_of_week]: [CronField; 5] =
            parsed.try_into().map_err(|_| ScheduleError::WrongFieldCount {
                expression: text.to_string(),
                found,
            })?;
        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
            timezone: Tz::UTC,
            holiday_calendar: None,
        })
    }

    /// Parse an expression together with its timezone and calendar reference.
    pub fn parse_with(
        text: &str,
        timezone: &str,
        holiday_calendar: Option<&str>,
    ) -> Result<Self, ScheduleError> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;
        let mut expr = Self::parse(text)?;
        expr.timezone = timezone;
        expr.holiday_calendar = holiday_calendar.map(str::to_string);
        Ok(expr)
    }

    /// Replace the timezone.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Attach a holiday calendar reference.
    pub fn with_holiday_calendar(mut self, name: impl Into<String>) -> Self {
        self.holiday_calendar = Some(name.into());
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn holiday_calendar(&self) -> Option<&str> {
        self.holiday_calendar.as_deref()
    }

    /// Get a field by position.
    pub fn field(&self, field: Field) -> &CronField {
        match field {
            Field::Minute => &self.minute,
            Field::Hour => &self.hour,
            Field::DayOfMonth => &self.day_of_month,
            Field::Month => &self.month,
            Field::DayOfWeek => &self.day_of_week,
        }
    }

    /// Whether a local calendar date satisfies the month and day fields.
    ///
    /// When both day-of-month and day-of-week are restricted a date matches
    /// if either one does.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.month.contains(date.month()) {
            return false;
        }
        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.day_of_month.is_restricted() && self.day_of_week.is_restricted() {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for ScheduleExpression {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders the canonical numeric form of the five fields.
impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

/// Validate expression text, returning every field error found.
pub fn validate(text: &str) -> Vec<FieldError> {
    match ScheduleExpression::parse(text) {
        Ok(_) => Vec::new(),
        Err(ScheduleError::InvalidScheduleExpression { errors }) => errors,
        Err(ScheduleError::WrongFieldCount { expression, found }) => vec![FieldError::new(
            Field::Minute,
            expression,
            format!("expected 5 fields, found {}", found),
        )],
        Err(other) => vec![FieldError::new(Field::Minute, text, other.to_string())],
    }
}

fn split_fields(text: &str) -> Result<Vec<&str>, ScheduleError> {
    let trimmed = text.trim();
    let expanded = presets::expand_macro(trimmed).unwrap_or(trimmed);
    let fields: Vec<&str> = expanded.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::WrongFieldCount {
            expression: text.to_string(),
            found: fields.len(),
        });
    }
    Ok(fields)
}

#[cfg(test)]
#[path = "expression_tests.rs"]
mod tests;
