//! # Cronwarden Schedule
//!
//! Schedule expression engine for cronwarden jobs.
//!
//! ## Expression Format
//!
//! Five whitespace separated fields:
//! `minute hour day_of_month month day_of_week`
//!
//! Each field accepts `*`, a value, a list `a,b`, a range `a-b` and a step
//! `*/s`, `n/s` or `a-b/s`. Month and day-of-week accept three letter
//! aliases (`JAN`..`DEC`, `SUN`..`SAT`). The `@hourly`, `@daily`,
//! `@weekly`, `@monthly` and `@yearly` macros are expanded before parsing.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use cronwarden_schedule::{HolidaySet, ScheduleExpression};
//!
//! let expr = ScheduleExpression::parse("*/15 9-17 * * MON-FRI").unwrap();
//! let after = Utc.with_ymd_and_hms(2024, 1, 1, 9, 7, 0).unwrap();
//! let next = expr.next_fire_time(after, &HolidaySet::new()).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap());
//! ```

pub mod calendar;
pub mod error;
pub mod expression;
pub mod field;
pub mod presets;
pub mod search;

pub use calendar::HolidaySet;
pub use error::{FieldError, ScheduleError};
pub use expression::{validate, ScheduleExpression};
pub use field::{CronField, Field, FieldItem, StepBase};
pub use search::DEFAULT_HORIZON_DAYS;
