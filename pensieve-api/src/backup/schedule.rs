///! Schedule expression parsing and next-trigger computation
///!
///! All computations use UTC so the same expression always yields a
///! deterministic next instant for a given reference time.

use chrono::{DateTime, Utc};
use cron::Schedule;
use pensieve_common::{Error, Result};
use std::str::FromStr;

/// Computes trigger instants from a recurrence expression.
///
/// Kept behind a trait so the concrete parser/engine can be swapped without
/// touching the orchestrator.
pub trait ScheduleCalculator: Send + Sync {
    /// Reject malformed expressions synchronously
    fn validate(&self, expression: &str) -> Result<()>;

    /// Compute the next trigger strictly after `from`
    fn next_trigger(&self, expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>>;
}

/// Cron-based calculator.
///
/// Operator-facing expressions use the standard 5-field form
/// (`minute hour day month weekday`); the underlying engine wants a seconds
/// field, so 5-field input is normalized by prepending `0`. 6- and 7-field
/// expressions pass through unchanged.
pub struct CronCalculator;

impl CronCalculator {
    pub fn new() -> Self {
        Self
    }

    fn parse(&self, expression: &str) -> Result<Schedule> {
        let normalized = normalize(expression)?;
        Schedule::from_str(&normalized)
            .map_err(|e| Error::Validation(format!("Invalid cron expression: {}", e)))
    }
}

impl Default for CronCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleCalculator for CronCalculator {
    fn validate(&self, expression: &str) -> Result<()> {
        self.parse(expression).map(|_| ())
    }

    fn next_trigger(&self, expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let schedule = self.parse(expression)?;
        schedule
            .after(&from)
            .next()
            .ok_or_else(|| Error::Validation("Cron expression never fires".to_string()))
    }
}

fn normalize(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    let field_count = trimmed.split_whitespace().count();

    match field_count {
        5 => Ok(format!("0 {}", trimmed)),
        6 | 7 => Ok(trimmed.to_string()),
        _ => Err(Error::Validation(format!(
            "Invalid cron expression: expected 5 to 7 fields, got {}",
            field_count
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_five_field_expression_accepted() {
        let calc = CronCalculator::new();
        assert!(calc.validate("0 2 * * *").is_ok());
        assert!(calc.validate("*/15 * * * *").is_ok());
    }

    #[test]
    fn test_six_field_expression_accepted() {
        let calc = CronCalculator::new();
        assert!(calc.validate("*/5 * * * * *").is_ok());
    }

    #[test]
    fn test_malformed_expression_rejected() {
        let calc = CronCalculator::new();
        assert!(calc.validate("not-a-cron").is_err());
        assert!(calc.validate("").is_err());
        assert!(calc.validate("99 99 * * *").is_err());
    }

    #[test]
    fn test_next_trigger_is_strictly_future() {
        let calc = CronCalculator::new();
        let from = DateTime::from_timestamp(1_704_067_200, 0).unwrap(); // 2024-01-01 00:00:00 UTC
        let next = calc.next_trigger("0 2 * * *", from).unwrap();

        assert!(next > from);
        assert_eq!(next.hour(), 2);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_next_trigger_is_deterministic() {
        let calc = CronCalculator::new();
        let from = DateTime::from_timestamp(1_704_067_200, 0).unwrap();

        let a = calc.next_trigger("30 4 * * *", from).unwrap();
        let b = calc.next_trigger("30 4 * * *", from).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_daily_expression_rolls_past_today() {
        let calc = CronCalculator::new();
        // 2024-01-01 03:00:00 UTC, after the daily 02:00 slot
        let from = DateTime::from_timestamp(1_704_078_000, 0).unwrap();
        let next = calc.next_trigger("0 2 * * *", from).unwrap();

        // Next 02:00 is on January 2nd
        assert_eq!(next.timestamp(), 1_704_160_800);
    }
}
