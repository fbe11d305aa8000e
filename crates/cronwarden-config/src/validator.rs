//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(e) => Err(ConfigError::InvalidValue {
                field: e.path,
                message: e.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const BACKENDS: [&str; 2] = ["file", "memory"];
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_gating(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_calendars(config, &mut result);

        result
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if !BACKENDS.contains(&config.store.backend.as_str()) {
            result.add_error(ValidationError::new(
                "store.backend",
                format!(
                    "Unknown store backend '{}', valid values: {:?}",
                    config.store.backend, BACKENDS
                ),
            ));
        }

        if config.store.backend == "memory" {
            result.add_warning(ValidationWarning::new(
                "store.backend",
                "Memory backend does not survive restarts",
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if scheduler.tick_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.tick_interval_secs",
                "tick_interval_secs must be greater than 0",
            ));
        }

        if scheduler.tick_interval_secs > 60 {
            result.add_warning(ValidationWarning::new(
                "scheduler.tick_interval_secs",
                "Ticks longer than a minute delay minute-level fire times",
            ));
        }

        if scheduler.max_concurrent_triggers == 0 {
            result.add_error(ValidationError::new(
                "scheduler.max_concurrent_triggers",
                "max_concurrent_triggers must be greater than 0",
            ));
        }

        if scheduler.search_horizon_days == 0 {
            result.add_error(ValidationError::new(
                "scheduler.search_horizon_days",
                "search_horizon_days must be greater than 0",
            ));
        }

        if scheduler.search_horizon_days > 3653 {
            result.add_warning(ValidationWarning::new(
                "scheduler.search_horizon_days",
                "Horizons over ten years make unsatisfiable schedules slow to reject",
            ));
        }
    }

    fn validate_gating(config: &Config, result: &mut ValidationResult) {
        if config.gating.approval_poll_secs == 0 {
            result.add_error(ValidationError::new(
                "gating.approval_poll_secs",
                "approval_poll_secs must be greater than 0",
            ));
        }

        if config.gating.dependency_retry_secs == 0 {
            result.add_error(ValidationError::new(
                "gating.dependency_retry_secs",
                "dependency_retry_secs must be greater than 0",
            ));
        }

        if config.gating.port_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "gating.port_timeout_secs",
                "port_timeout_secs must be greater than 0",
            ));
        }

        if config.gating.port_timeout_secs > config.scheduler.tick_interval_secs {
            result.add_warning(ValidationWarning::new(
                "gating.port_timeout_secs",
                "A collaborator call may outlast the scheduler tick",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "'{}' is not a plain level, it will be used as a filter directive",
                    config.logging.level
                ),
            ));
        }
    }

    fn validate_calendars(config: &Config, result: &mut ValidationResult) {
        for (name, calendar) in &config.calendars {
            if name.trim().is_empty() {
                result.add_error(ValidationError::new("calendars", "Calendar name cannot be empty"));
            }
            if calendar.dates.is_empty() {
                result.add_warning(ValidationWarning::new(
                    format!("calendars.{}.dates", name),
                    "Calendar has no dates",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
