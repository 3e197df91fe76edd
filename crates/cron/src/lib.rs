//! 5-field cron expression parsing and next-fire computation.
//!
//! Fields are `minute hour day-of-month month day-of-week` with standard
//! tokens: `*`, numbers, ranges (`1-5`), steps (`*/5`, `10-50/10`), and
//! comma lists. Evaluation happens in the expression's IANA timezone.
//!
//! Next-run computation is a bounded forward scan capped at one year,
//! falling back to "one day later" when nothing matches. Day-of-week
//! treats 0 and 7 both as Sunday, on the pattern and the value alike.

mod field;

pub use field::{CronField, FieldKind};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Errors from cron expression parsing.
#[derive(Debug, Error)]
pub enum CronParseError {
    #[error("cron expression must have exactly 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),

    #[error("invalid {kind} field '{token}': {reason}")]
    InvalidField {
        kind: FieldKind,
        token: String,
        reason: String,
    },

    #[error("unknown timezone: {0}")]
    Timezone(String),
}

/// A parsed 5-field cron expression bound to an IANA timezone.
#[derive(Debug, Clone)]
pub struct CronExpression {
    minutes: CronField,
    hours: CronField,
    days_of_month: CronField,
    months: CronField,
    days_of_week: CronField,
    timezone: Tz,
    source: String,
}

/// Upper bound on the forward scan: one year of days.
const MAX_SCAN_DAYS: i64 = 366;

impl CronExpression {
    /// Parse a 5-field expression in the given IANA timezone.
    pub fn parse(expr: &str, timezone: &str) -> Result<Self, CronParseError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| CronParseError::Timezone(timezone.to_string()))?;

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount(fields.len()));
        }

        Ok(Self {
            minutes: CronField::parse(fields[0], FieldKind::Minute)?,
            hours: CronField::parse(fields[1], FieldKind::Hour)?,
            days_of_month: CronField::parse(fields[2], FieldKind::DayOfMonth)?,
            months: CronField::parse(fields[3], FieldKind::Month)?,
            days_of_week: CronField::parse(fields[4], FieldKind::DayOfWeek)?,
            timezone: tz,
            source: expr.to_string(),
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The timezone this expression is evaluated in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether the expression matches the given instant (minute precision).
    pub fn should_run_at(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        self.matches_date(local.date_naive())
            && self.hours.matches(local.hour())
            && self.minutes.matches(local.minute())
    }

    /// First minute-aligned instant strictly after `after` matching all
    /// fields. Scans forward day by day, capped at one year; when nothing
    /// matches within the cap, returns `after + 1 day` as an approximation.
    pub fn next_run(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let local_after = after.with_timezone(&self.timezone);
        let start_date = local_after.date_naive();

        for day_offset in 0..MAX_SCAN_DAYS {
            let date = match start_date.checked_add_signed(Duration::days(day_offset)) {
                Some(d) => d,
                None => break,
            };
            if !self.matches_date(date) {
                continue;
            }
            for hour in self.hours.values() {
                for minute in self.minutes.values() {
                    let naive = match date.and_hms_opt(hour, minute, 0) {
                        Some(n) => n,
                        None => continue,
                    };
                    // Skip instants that do not exist in this timezone
                    // (DST spring-forward gap).
                    let candidate = match self.timezone.from_local_datetime(&naive).earliest() {
                        Some(c) => c,
                        None => continue,
                    };
                    let candidate_utc = candidate.with_timezone(&Utc);
                    if candidate_utc > after {
                        return candidate_utc;
                    }
                }
            }
        }

        // No match within a year (e.g. "0 0 30 2 *"). Approximate with
        // one day later rather than scanning unboundedly.
        after + Duration::days(1)
    }

    /// Whether the date portion (day-of-month, month, day-of-week) matches.
    fn matches_date(&self, date: NaiveDate) -> bool {
        // chrono: Sunday=0 via num_days_from_sunday; field normalizes 7 to 0.
        let dow = date.weekday().num_days_from_sunday();
        self.months.matches(date.month())
            && self.days_of_month.matches(date.day())
            && self.days_of_week.matches(dow)
    }
}

/// Validate a 5-field cron expression without binding a timezone.
pub fn validate(expr: &str) -> Result<(), CronParseError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CronParseError::FieldCount(fields.len()));
    }
    CronField::parse(fields[0], FieldKind::Minute)?;
    CronField::parse(fields[1], FieldKind::Hour)?;
    CronField::parse(fields[2], FieldKind::DayOfMonth)?;
    CronField::parse(fields[3], FieldKind::Month)?;
    CronField::parse(fields[4], FieldKind::DayOfWeek)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parse_accepts_standard_tokens() {
        assert!(CronExpression::parse("* * * * *", "UTC").is_ok());
        assert!(CronExpression::parse("*/15 0-6 1,15 * 1-5", "UTC").is_ok());
        assert!(CronExpression::parse("0 9 * * 1-5", "Asia/Manila").is_ok());
        assert!(CronExpression::parse("10-50/10 */2 * * *", "UTC").is_ok());
    }

    #[test]
    fn parse_rejects_bad_arity_and_bounds() {
        assert!(matches!(
            CronExpression::parse("* * * *", "UTC"),
            Err(CronParseError::FieldCount(4))
        ));
        assert!(CronExpression::parse("60 * * * *", "UTC").is_err());
        assert!(CronExpression::parse("* 24 * * *", "UTC").is_err());
        assert!(CronExpression::parse("* * 0 * *", "UTC").is_err());
        assert!(CronExpression::parse("* * 32 * *", "UTC").is_err());
        assert!(CronExpression::parse("* * * 13 *", "UTC").is_err());
        assert!(CronExpression::parse("* * * * 8", "UTC").is_err());
        assert!(CronExpression::parse("* * * * *", "Not/AZone").is_err());
    }

    #[test]
    fn next_run_is_strictly_after_and_matches() {
        let cron = CronExpression::parse("*/5 * * * *", "UTC").unwrap();
        let t = utc(2025, 3, 10, 14, 2);
        let next = cron.next_run(t);
        assert!(next > t);
        assert!(cron.should_run_at(next));
        assert_eq!(next, utc(2025, 3, 10, 14, 5));

        // Exactly on a match: strictly after means the following slot.
        let on_slot = utc(2025, 3, 10, 14, 5);
        assert_eq!(cron.next_run(on_slot), utc(2025, 3, 10, 14, 10));
    }

    #[test]
    fn weekday_nine_am_from_saturday_is_monday() {
        let cron = CronExpression::parse("0 9 * * 1-5", "UTC").unwrap();
        // 2025-03-08 is a Saturday.
        let sat = utc(2025, 3, 8, 10, 0);
        let next = cron.next_run(sat);
        assert_eq!(next, utc(2025, 3, 10, 9, 0)); // Monday
    }

    #[test]
    fn dow_zero_and_seven_are_both_sunday() {
        let zero = CronExpression::parse("0 12 * * 0", "UTC").unwrap();
        let seven = CronExpression::parse("0 12 * * 7", "UTC").unwrap();
        // 2025-03-09 is a Sunday.
        let sunday_noon = utc(2025, 3, 9, 12, 0);
        assert!(zero.should_run_at(sunday_noon));
        assert!(seven.should_run_at(sunday_noon));

        let from = utc(2025, 3, 5, 0, 0); // Wednesday
        assert_eq!(zero.next_run(from), seven.next_run(from));
        assert_eq!(zero.next_run(from), sunday_noon);
    }

    #[test]
    fn should_run_at_ignores_seconds_granularity_fields() {
        let cron = CronExpression::parse("30 8 15 6 *", "UTC").unwrap();
        assert!(cron.should_run_at(utc(2025, 6, 15, 8, 30)));
        assert!(!cron.should_run_at(utc(2025, 6, 15, 8, 31)));
        assert!(!cron.should_run_at(utc(2025, 6, 16, 8, 30)));
    }

    #[test]
    fn impossible_date_falls_back_to_one_day_later() {
        // February 30th never exists.
        let cron = CronExpression::parse("0 0 30 2 *", "UTC").unwrap();
        let t = utc(2025, 1, 1, 0, 0);
        assert_eq!(cron.next_run(t), t + Duration::days(1));
    }

    #[test]
    fn evaluates_in_configured_timezone() {
        // 09:00 in Manila is 01:00 UTC.
        let cron = CronExpression::parse("0 9 * * *", "Asia/Manila").unwrap();
        let t = utc(2025, 3, 10, 0, 0);
        assert_eq!(cron.next_run(t), utc(2025, 3, 10, 1, 0));
        assert!(cron.should_run_at(utc(2025, 3, 10, 1, 0)));
        assert!(!cron.should_run_at(utc(2025, 3, 10, 9, 0)));
    }

    #[test]
    fn comma_lists_and_steps_combine() {
        let cron = CronExpression::parse("0,30 9,17 * * *", "UTC").unwrap();
        let t = utc(2025, 3, 10, 9, 0);
        assert_eq!(cron.next_run(t), utc(2025, 3, 10, 9, 30));
        assert_eq!(cron.next_run(utc(2025, 3, 10, 9, 30)), utc(2025, 3, 10, 17, 0));
    }

    #[test]
    fn validate_matches_parse_behavior() {
        assert!(validate("*/10 * * * *").is_ok());
        assert!(validate("bad").is_err());
        assert!(validate("* * * * * *").is_err());
    }
}
