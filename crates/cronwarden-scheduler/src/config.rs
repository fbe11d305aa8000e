//! Scheduler configuration.

use std::time::Duration;

use cronwarden_schedule::DEFAULT_HORIZON_DAYS;

/// Tick cadence and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Runs started per tick at most.
    pub max_concurrent_triggers: usize,
    pub search_horizon_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            max_concurrent_triggers: 4,
            search_horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_max_concurrent_triggers(mut self, slots: usize) -> Self {
        self.max_concurrent_triggers = slots;
        self
    }

    pub fn with_search_horizon_days(mut self, days: u32) -> Self {
        self.search_horizon_days = days;
        self
    }
}
