//! Job spec validation.

use cronwarden_protocols::{DependencyCondition, JobSpec, ScheduleSpec};
use cronwarden_schedule::ScheduleExpression;

use crate::error::StoreError;

/// Parse the schedule of a spec, binding its timezone and calendar.
pub fn parse_schedule(schedule: &ScheduleSpec) -> Result<ScheduleExpression, StoreError> {
    Ok(ScheduleExpression::parse_with(
        &schedule.expression,
        &schedule.timezone,
        schedule.holiday_calendar.as_deref(),
    )?)
}

/// Validate a whole spec. Schedule errors win over the other checks.
pub fn validate_spec(spec: &JobSpec) -> Result<ScheduleExpression, StoreError> {
    let expression = parse_schedule(&spec.schedule)?;

    let mut problems = Vec::new();
    if spec.name.trim().is_empty() {
        problems.push("name is empty".to_string());
    }
    if spec.execution.command.trim().is_empty() {
        problems.push("execution.command is empty".to_string());
    }
    if spec.execution.timeout_secs == 0 {
        problems.push("execution.timeout_secs must be greater than 0".to_string());
    }
    if !(1..=100).contains(&spec.gating.queue_priority) {
        problems.push(format!(
            "gating.queue_priority {} is outside 1..=100",
            spec.gating.queue_priority
        ));
    }
    for dependency in &spec.gating.data_dependencies {
        if dependency.source.trim().is_empty() {
            problems.push(format!("data dependency {} has an empty source", dependency));
        }
        if dependency.condition == DependencyCondition::LastModifiedAfterDate
            && dependency.value.is_none()
        {
            problems.push(format!("data dependency {} needs a date value", dependency));
        }
    }

    if problems.is_empty() {
        Ok(expression)
    } else {
        Err(StoreError::InvalidDefinition(problems))
    }
}
