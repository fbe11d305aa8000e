//! Holiday calendar port.

use async_trait::async_trait;
use cronwarden_schedule::HolidaySet;

use crate::error::PortError;

/// Resolves a calendar reference into a set of excluded dates.
#[async_trait]
pub trait HolidayCalendarPort: Send + Sync {
    async fn holidays(&self, calendar: &str) -> Result<HolidaySet, PortError>;
}
