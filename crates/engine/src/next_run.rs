//! Next-fire-time computation for time-based trigger types.

use botsched_cron::CronExpression;
use chrono::{DateTime, Duration, Utc};

use botsched_core::SchedError;

use crate::model::{CalendarTrigger, IntervalTrigger, TriggerConfig};

/// First firing instant strictly after `after`, or `None` for trigger
/// types that are not tick-driven (event, webhook) and for calendars
/// with no future dates left.
pub fn next_run_for(
    trigger: &TriggerConfig,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SchedError> {
    match trigger {
        TriggerConfig::Cron(cron) => {
            let expr = CronExpression::parse(&cron.expression, &cron.timezone)
                .map_err(|e| SchedError::InvalidCron(e.to_string()))?;
            Ok(Some(expr.next_run(after)))
        }
        TriggerConfig::Interval(iv) => Ok(Some(next_interval_run(iv, after)?)),
        TriggerConfig::Calendar(cal) => Ok(next_calendar_run(cal, after)),
        TriggerConfig::Event | TriggerConfig::Webhook => Ok(None),
    }
}

/// Next slot on the interval grid anchored at `start_at`.
///
/// When the anchor is in the future, the anchor itself is the next run.
fn next_interval_run(
    trigger: &IntervalTrigger,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedError> {
    if trigger.every_minutes < 1 {
        return Err(SchedError::InvalidTrigger(format!(
            "interval must be >= 1 minute, got {}",
            trigger.every_minutes
        )));
    }
    let step = Duration::minutes(trigger.every_minutes);
    let anchor = trigger.start_at.unwrap_or(after);
    if anchor > after {
        return Ok(anchor);
    }
    // Number of whole steps from the anchor past `after`, then one more
    // so the result is strictly after.
    let elapsed = after - anchor;
    let steps = elapsed.num_seconds() / step.num_seconds() + 1;
    Ok(anchor + step * (steps as i32))
}

fn next_calendar_run(trigger: &CalendarTrigger, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    trigger.dates.iter().copied().filter(|d| *d > after).min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CronTrigger;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn interval_advances_on_the_anchor_grid() {
        let iv = IntervalTrigger {
            every_minutes: 30,
            start_at: Some(utc(2025, 1, 1, 0, 0)),
        };
        let next = next_interval_run(&iv, utc(2025, 1, 1, 0, 45)).unwrap();
        assert_eq!(next, utc(2025, 1, 1, 1, 0));

        // Exactly on a slot: strictly after.
        let next = next_interval_run(&iv, utc(2025, 1, 1, 1, 0)).unwrap();
        assert_eq!(next, utc(2025, 1, 1, 1, 30));
    }

    #[test]
    fn future_anchor_is_the_first_run() {
        let iv = IntervalTrigger {
            every_minutes: 60,
            start_at: Some(utc(2025, 6, 1, 12, 0)),
        };
        let next = next_interval_run(&iv, utc(2025, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2025, 6, 1, 12, 0));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let iv = IntervalTrigger {
            every_minutes: 0,
            start_at: None,
        };
        assert!(next_interval_run(&iv, Utc::now()).is_err());
    }

    #[test]
    fn calendar_picks_earliest_future_date() {
        let cal = CalendarTrigger {
            dates: vec![
                utc(2025, 3, 1, 9, 0),
                utc(2025, 1, 15, 9, 0),
                utc(2025, 2, 1, 9, 0),
            ],
        };
        assert_eq!(
            next_calendar_run(&cal, utc(2025, 1, 20, 0, 0)),
            Some(utc(2025, 2, 1, 9, 0))
        );
        assert_eq!(next_calendar_run(&cal, utc(2025, 4, 1, 0, 0)), None);
    }

    #[test]
    fn event_and_webhook_have_no_next_run() {
        assert_eq!(next_run_for(&TriggerConfig::Event, Utc::now()).unwrap(), None);
        assert_eq!(next_run_for(&TriggerConfig::Webhook, Utc::now()).unwrap(), None);
    }

    #[test]
    fn cron_delegates_to_parser() {
        let trigger = TriggerConfig::Cron(CronTrigger {
            expression: "0 9 * * 1-5".into(),
            timezone: "UTC".into(),
        });
        // 2025-03-08 is a Saturday; next weekday 09:00 is Monday the 10th.
        let next = next_run_for(&trigger, utc(2025, 3, 8, 10, 0)).unwrap();
        assert_eq!(next, Some(utc(2025, 3, 10, 9, 0)));
    }
}
