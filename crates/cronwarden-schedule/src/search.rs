//! Fire time search.

use chrono::{DateTime, Days, LocalResult, NaiveDate, TimeZone, Utc};
use tracing::debug;

use crate::calendar::HolidaySet;
use crate::error::ScheduleError;
use crate::expression::ScheduleExpression;

/// Default search horizon: four years.
pub const DEFAULT_HORIZON_DAYS: u32 = 1461;

impl ScheduleExpression {
    /// Earliest fire time strictly after `after`, skipping holiday dates.
    pub fn next_fire_time(
        &self,
        after: DateTime<Utc>,
        holidays: &HolidaySet,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_fire_time_within(after, holidays, DEFAULT_HORIZON_DAYS)
    }

    /// Like [`next_fire_time`](Self::next_fire_time) with an explicit horizon.
    pub fn next_fire_time_within(
        &self,
        after: DateTime<Utc>,
        holidays: &HolidaySet,
        horizon_days: u32,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let exceeded = || ScheduleError::HorizonExceeded {
            from: after,
            horizon_days,
        };
        let start = after.with_timezone(&self.timezone).date_naive();
        let end = start
            .checked_add_days(Days::new(u64::from(horizon_days)))
            .ok_or_else(exceeded)?;

        let mut date = start;
        while date <= end {
            if self.fires_on(date, holidays) {
                for hour in self.hour.values() {
                    for minute in self.minute.values() {
                        if let Some(at) = self.resolve(date, hour, minute) {
                            if at > after {
                                return Ok(at);
                            }
                        }
                    }
                }
            }
            date = match date.succ_opt() {
                Some(d) => d,
                None => break,
            };
        }

        debug!("No fire time for '{}' within {} days", self, horizon_days);
        Err(exceeded())
    }

    /// Latest fire time strictly before `before`, skipping holiday dates.
    pub fn previous_fire_time(
        &self,
        before: DateTime<Utc>,
        holidays: &HolidaySet,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        self.previous_fire_time_within(before, holidays, DEFAULT_HORIZON_DAYS)
    }

    /// Like [`previous_fire_time`](Self::previous_fire_time) with an explicit horizon.
    pub fn previous_fire_time_within(
        &self,
        before: DateTime<Utc>,
        holidays: &HolidaySet,
        horizon_days: u32,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let exceeded = || ScheduleError::HorizonExceeded {
            from: before,
            horizon_days,
        };
        let start = before.with_timezone(&self.timezone).date_naive();
        let end = start
            .checked_sub_days(Days::new(u64::from(horizon_days)))
            .ok_or_else(exceeded)?;

        let mut date = start;
        while date >= end {
            if self.fires_on(date, holidays) {
                for hour in self.hour.values().rev() {
                    for minute in self.minute.values().rev() {
                        if let Some(at) = self.resolve(date, hour, minute) {
                            if at < before {
                                return Ok(at);
                            }
                        }
                    }
                }
            }
            date = match date.pred_opt() {
                Some(d) => d,
                None => break,
            };
        }

        Err(exceeded())
    }

    /// The next `count` fire times after `after`.
    pub fn upcoming(
        &self,
        after: DateTime<Utc>,
        count: usize,
        holidays: &HolidaySet,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        for _ in 0..count {
            cursor = self.next_fire_time(cursor, holidays)?;
            times.push(cursor);
        }
        Ok(times)
    }

    fn fires_on(&self, date: NaiveDate, holidays: &HolidaySet) -> bool {
        self.matches_date(date) && !holidays.contains(&date)
    }

    /// Map a local wall-clock time to UTC.
    ///
    /// Times inside a DST gap do not exist and are skipped. Ambiguous times
    /// resolve to their earliest instant only, so a fold never fires twice.
    fn resolve(&self, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
        let local = date.and_hms_opt(hour, minute, 0)?;
        match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => None,
        }
    }
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
