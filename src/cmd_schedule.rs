//! Schedule expression subcommands.

use std::error::Error;

use chrono::{DateTime, Utc};

use cronwarden_config::Config;
use cronwarden_schedule::{validate, HolidaySet, ScheduleExpression};

use crate::adapters::ConfigHolidayCalendar;

/// Validate an expression; fails when it has field errors.
pub(crate) fn validate_expression(expression: &str) -> Result<(), Box<dyn Error>> {
    let errors = validate(expression);
    if errors.is_empty() {
        let parsed = ScheduleExpression::parse(expression)?;
        println!("OK: {}", parsed);
        return Ok(());
    }

    println!("Invalid expression '{}':", expression);
    for error in &errors {
        println!("  - {}", error);
    }
    Err(format!("{} field error(s)", errors.len()).into())
}

/// Print the next `count` fire times.
pub(crate) fn next_fire_times(
    config: &Config,
    expression: &str,
    timezone: &str,
    after: Option<DateTime<Utc>>,
    count: usize,
    calendar: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let parsed = ScheduleExpression::parse_with(expression, timezone, calendar)?;
    let holidays = match calendar {
        Some(name) => ConfigHolidayCalendar::new(&config.calendars)
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown holiday calendar '{}'", name))?,
        None => HolidaySet::new(),
    };

    let after = after.unwrap_or_else(Utc::now);
    let times = parsed.upcoming(after, count, &holidays)?;
    let tz = parsed.timezone();

    println!("{} ({})", parsed, tz);
    for at in times {
        println!("  {}  ({})", at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"), at);
    }
    Ok(())
}
