//! Common schedule presets.

use crate::error::ScheduleError;
use crate::expression::ScheduleExpression;

/// Every minute.
pub const EVERY_MINUTE: &str = "* * * * *";

/// Every 5 minutes.
pub const EVERY_5_MINUTES: &str = "*/5 * * * *";

/// Every 15 minutes.
pub const EVERY_15_MINUTES: &str = "*/15 * * * *";

/// Every hour.
pub const HOURLY: &str = "0 * * * *";

/// Every day at midnight.
pub const DAILY: &str = "0 0 * * *";

/// Weekdays at 9 AM.
pub const WEEKDAYS_9AM: &str = "0 9 * * 1-5";

/// Every Sunday at midnight.
pub const WEEKLY: &str = "0 0 * * 0";

/// First day of each month at midnight.
pub const MONTHLY: &str = "0 0 1 * *";

/// January 1st at midnight.
pub const YEARLY: &str = "0 0 1 1 *";

/// Expand an `@name` macro to its five-field form.
pub fn expand_macro(text: &str) -> Option<&'static str> {
    match text.to_ascii_lowercase().as_str() {
        "@hourly" => Some(HOURLY),
        "@daily" | "@midnight" => Some(DAILY),
        "@weekly" => Some(WEEKLY),
        "@monthly" => Some(MONTHLY),
        "@yearly" | "@annually" => Some(YEARLY),
        _ => None,
    }
}

/// Fire every N minutes.
pub fn every_minutes(minutes: u32) -> Result<ScheduleExpression, ScheduleError> {
    ScheduleExpression::parse(&format!("*/{} * * * *", minutes))
}

/// Fire every N hours, on the hour.
pub fn every_hours(hours: u32) -> Result<ScheduleExpression, ScheduleError> {
    ScheduleExpression::parse(&format!("0 */{} * * *", hours))
}

/// Fire daily at a specific hour and minute.
pub fn daily_at(hour: u32, minute: u32) -> Result<ScheduleExpression, ScheduleError> {
    ScheduleExpression::parse(&format!("{} {} * * *", minute, hour))
}
