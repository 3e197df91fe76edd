//! Policy evaluation: blackout windows, quota caps, overlap handling,
//! and catchup planning. Everything here is pure over the model types so
//! the tick loop and the trigger chokepoint share one implementation and
//! the rules are testable without a database.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use botsched_core::SchedError;

use crate::model::{
    BlackoutWindow, CatchupConfig, CatchupPolicy, ConcurrencyConfig, OverlapPolicy,
    QuotaCounters, QuotaLimits, TriggerConfig,
};
use crate::next_run::next_run_for;

// ── Blackout ─────────────────────────────────────────────────────────

/// Name of the first blackout window covering `now`, if any.
///
/// Start is inclusive, end exclusive. A window whose start is after its
/// end (e.g. 22:00-06:00) wraps midnight. Day-of-week sets apply to the
/// day the window *started* on for wrapped windows.
pub fn in_blackout(windows: &[BlackoutWindow], now: DateTime<Utc>) -> Option<String> {
    windows
        .iter()
        .find(|w| window_covers(w, now))
        .map(|w| w.name.clone())
}

fn window_covers(window: &BlackoutWindow, now: DateTime<Utc>) -> bool {
    let tz: Tz = match window.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return false, // bad timezone never blacks out
    };
    let local = now.with_timezone(&tz);

    let (start, end) = match (parse_hhmm(&window.start_time), parse_hhmm(&window.end_time)) {
        (Some(s), Some(e)) => (s, e),
        _ => return false,
    };

    let time = local.time();
    let wrapped = start > end;
    let in_range = if wrapped {
        time >= start || time < end
    } else {
        time >= start && time < end
    };
    if !in_range {
        return false;
    }

    // For a wrapped window already past midnight, date and weekday checks
    // refer to the day the window started.
    let effective_date = if wrapped && time < end {
        local.date_naive().pred_opt().unwrap_or(local.date_naive())
    } else {
        local.date_naive()
    };

    if let Some(days) = &window.days_of_week {
        if !days.is_empty() {
            let dow = effective_date.weekday().num_days_from_sunday() as u8;
            if !days.contains(&dow) {
                return false;
            }
        }
    }

    if let Some(from) = window.date_from {
        if effective_date < from {
            return false;
        }
    }
    if let Some(to) = window.date_to {
        if effective_date > to {
            return false;
        }
    }

    true
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

// ── Quota ────────────────────────────────────────────────────────────

/// Which rolling granularity a quota decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaGranularity {
    Hour,
    Day,
    Week,
    Month,
    Lifetime,
}

impl QuotaGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Lifetime => "lifetime",
        }
    }
}

/// Start of the rolling window containing `now` for a granularity.
pub fn window_start(granularity: QuotaGranularity, now: DateTime<Utc>) -> DateTime<Utc> {
    match granularity {
        QuotaGranularity::Hour => now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now),
        QuotaGranularity::Day => Utc
            .from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default()),
        QuotaGranularity::Week => {
            let days_from_monday = now.date_naive().weekday().num_days_from_monday() as i64;
            let monday = now.date_naive() - Duration::days(days_from_monday);
            Utc.from_utc_datetime(&monday.and_hms_opt(0, 0, 0).unwrap_or_default())
        }
        QuotaGranularity::Month => {
            let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
            Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0).unwrap_or_default())
        }
        QuotaGranularity::Lifetime => DateTime::<Utc>::MIN_UTC,
    }
}

/// Counter value for a window, treating a counter whose stored window
/// start predates the current window as rolled over (i.e. zero).
fn effective_count(
    count: i64,
    stored_window_start: Option<DateTime<Utc>>,
    granularity: QuotaGranularity,
    now: DateTime<Utc>,
) -> i64 {
    match stored_window_start {
        Some(start) if start >= window_start(granularity, now) => count,
        _ if granularity == QuotaGranularity::Lifetime => count,
        _ => 0,
    }
}

/// Evaluate all quota granularities; returns the first breached one.
///
/// A limit is breached when the effective counter has already reached it,
/// i.e. one more firing would exceed the cap.
pub fn check_quota(
    limits: &QuotaLimits,
    counters: &QuotaCounters,
    now: DateTime<Utc>,
) -> Option<QuotaGranularity> {
    let checks = [
        (
            limits.max_per_hour,
            effective_count(
                counters.runs_this_hour,
                counters.hour_window_start,
                QuotaGranularity::Hour,
                now,
            ),
            QuotaGranularity::Hour,
        ),
        (
            limits.max_per_day,
            effective_count(
                counters.runs_today,
                counters.day_window_start,
                QuotaGranularity::Day,
                now,
            ),
            QuotaGranularity::Day,
        ),
        (
            limits.max_per_week,
            effective_count(
                counters.runs_this_week,
                counters.week_window_start,
                QuotaGranularity::Week,
                now,
            ),
            QuotaGranularity::Week,
        ),
        (
            limits.max_per_month,
            effective_count(
                counters.runs_this_month,
                counters.month_window_start,
                QuotaGranularity::Month,
                now,
            ),
            QuotaGranularity::Month,
        ),
        (
            limits.max_total,
            counters.total_runs,
            QuotaGranularity::Lifetime,
        ),
    ];

    for (limit, count, granularity) in checks {
        if let Some(max) = limit {
            if count >= max {
                return Some(granularity);
            }
        }
    }
    None
}

// ── Overlap ──────────────────────────────────────────────────────────

/// What to do when a schedule is due while prior runs are outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapDecision {
    /// No outstanding runs (or policy = allow): fire normally.
    Fire,
    /// Record `skipped_overlap` and recompute the next run.
    Skip,
    /// Enqueue an additional firing to run once capacity frees up.
    Enqueue,
    /// Cancel the outstanding runs, then fire.
    CancelRunningThenFire,
    /// Recompute the next run without firing or recording a skip status
    /// beyond `skipped_overlap` (cancel_new drops the new firing).
    DropNew,
}

/// Apply the overlap policy to the schedule's current running count.
pub fn overlap_decision(
    concurrency: &ConcurrencyConfig,
    current_running: i32,
) -> OverlapDecision {
    if current_running < concurrency.max_concurrent_runs {
        return OverlapDecision::Fire;
    }
    match concurrency.overlap_policy {
        OverlapPolicy::Allow => OverlapDecision::Fire,
        OverlapPolicy::Skip => OverlapDecision::Skip,
        OverlapPolicy::Queue => OverlapDecision::Enqueue,
        OverlapPolicy::CancelPrevious => OverlapDecision::CancelRunningThenFire,
        OverlapPolicy::CancelNew => OverlapDecision::DropNew,
    }
}

// ── Catchup ──────────────────────────────────────────────────────────

/// Hard cap on missed-slot replay regardless of configuration.
pub const MISSED_SLOT_CAP: usize = 100;

/// Slots the trigger should have fired at in `(last_run, now]`, oldest
/// first, bounded by the catchup window and [`MISSED_SLOT_CAP`].
pub fn missed_slots(
    trigger: &TriggerConfig,
    last_run: DateTime<Utc>,
    now: DateTime<Utc>,
    window_secs: i64,
) -> Result<Vec<DateTime<Utc>>, SchedError> {
    let window_floor = if window_secs > 0 {
        now - Duration::seconds(window_secs)
    } else {
        DateTime::<Utc>::MIN_UTC
    };

    let mut slots = Vec::new();
    let mut cursor = last_run;
    while slots.len() < MISSED_SLOT_CAP {
        let next = match next_run_for(trigger, cursor)? {
            Some(n) => n,
            None => break,
        };
        if next > now {
            break;
        }
        // A trigger that fails to advance would loop forever.
        if next <= cursor {
            break;
        }
        if next >= window_floor {
            slots.push(next);
        }
        cursor = next;
    }
    Ok(slots)
}

/// The slots to fire this tick after applying the catchup policy.
///
/// Exactly one firing always happens synchronously; `all` replays the
/// remaining missed slots inline, bounded by `max_catchup_runs`.
pub fn catchup_plan(config: &CatchupConfig, missed: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
    match missed {
        [] => Vec::new(),
        [only] => vec![*only],
        many @ [.., last] => match config.policy {
            // No replay: fire the most recent slot only.
            CatchupPolicy::None | CatchupPolicy::One | CatchupPolicy::Latest => vec![*last],
            CatchupPolicy::All => {
                let cap = config.max_catchup_runs.max(1) as usize;
                many.iter().copied().take(cap).collect()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CronTrigger, IntervalTrigger};
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn overnight_window() -> BlackoutWindow {
        BlackoutWindow {
            name: "nightly".into(),
            start_time: "22:00".into(),
            end_time: "06:00".into(),
            days_of_week: None,
            date_from: None,
            date_to: None,
            timezone: "UTC".into(),
        }
    }

    #[test]
    fn overnight_blackout_wraps_midnight() {
        let windows = vec![overnight_window()];
        assert!(in_blackout(&windows, utc(2025, 3, 10, 23, 30)).is_some());
        assert!(in_blackout(&windows, utc(2025, 3, 11, 1, 0)).is_some());
        assert!(in_blackout(&windows, utc(2025, 3, 10, 12, 0)).is_none());
        // Boundaries: start inclusive, end exclusive.
        assert!(in_blackout(&windows, utc(2025, 3, 10, 22, 0)).is_some());
        assert!(in_blackout(&windows, utc(2025, 3, 11, 6, 0)).is_none());
    }

    #[test]
    fn blackout_respects_day_of_week_set() {
        let mut w = overnight_window();
        w.start_time = "09:00".into();
        w.end_time = "17:00".into();
        w.days_of_week = Some(vec![0, 6]); // weekends only
        let windows = vec![w];
        // 2025-03-09 is a Sunday, 2025-03-10 a Monday.
        assert!(in_blackout(&windows, utc(2025, 3, 9, 12, 0)).is_some());
        assert!(in_blackout(&windows, utc(2025, 3, 10, 12, 0)).is_none());
    }

    #[test]
    fn wrapped_window_weekday_refers_to_start_day() {
        let mut w = overnight_window();
        w.days_of_week = Some(vec![5]); // Friday nights
        let windows = vec![w];
        // 2025-03-14 is a Friday; 01:00 Saturday is still Friday's window.
        assert!(in_blackout(&windows, utc(2025, 3, 14, 23, 0)).is_some());
        assert!(in_blackout(&windows, utc(2025, 3, 15, 1, 0)).is_some());
        // Saturday 23:00 is Saturday's window, not Friday's.
        assert!(in_blackout(&windows, utc(2025, 3, 15, 23, 0)).is_none());
    }

    #[test]
    fn blackout_one_off_date_range() {
        let mut w = overnight_window();
        w.start_time = "00:00".into();
        w.end_time = "23:59".into();
        w.date_from = Some(chrono::NaiveDate::from_ymd_opt(2025, 12, 24).unwrap());
        w.date_to = Some(chrono::NaiveDate::from_ymd_opt(2025, 12, 26).unwrap());
        let windows = vec![w];
        assert!(in_blackout(&windows, utc(2025, 12, 25, 10, 0)).is_some());
        assert!(in_blackout(&windows, utc(2025, 12, 27, 10, 0)).is_none());
    }

    #[test]
    fn blackout_evaluates_in_window_timezone() {
        let mut w = overnight_window();
        w.start_time = "09:00".into();
        w.end_time = "17:00".into();
        w.timezone = "Asia/Manila".into(); // UTC+8
        let windows = vec![w];
        // 02:00 UTC = 10:00 Manila -> inside.
        assert!(in_blackout(&windows, utc(2025, 3, 10, 2, 0)).is_some());
        // 12:00 UTC = 20:00 Manila -> outside.
        assert!(in_blackout(&windows, utc(2025, 3, 10, 12, 0)).is_none());
    }

    fn counters_at(now: DateTime<Utc>, today: i64) -> QuotaCounters {
        QuotaCounters {
            runs_today: today,
            day_window_start: Some(window_start(QuotaGranularity::Day, now)),
            ..Default::default()
        }
    }

    #[test]
    fn quota_blocks_at_daily_cap_and_resets_after_boundary() {
        let limits = QuotaLimits {
            max_per_day: Some(3),
            ..Default::default()
        };
        let now = utc(2025, 3, 10, 15, 0);

        assert_eq!(check_quota(&limits, &counters_at(now, 2), now), None);
        assert_eq!(
            check_quota(&limits, &counters_at(now, 3), now),
            Some(QuotaGranularity::Day)
        );

        // Same counters the next day: the window rolled over.
        let tomorrow = utc(2025, 3, 11, 0, 5);
        assert_eq!(check_quota(&limits, &counters_at(now, 3), tomorrow), None);
    }

    #[test]
    fn lifetime_quota_never_resets() {
        let limits = QuotaLimits {
            max_total: Some(10),
            ..Default::default()
        };
        let counters = QuotaCounters {
            total_runs: 10,
            ..Default::default()
        };
        assert_eq!(
            check_quota(&limits, &counters, utc(2030, 1, 1, 0, 0)),
            Some(QuotaGranularity::Lifetime)
        );
    }

    #[test]
    fn stale_hour_window_counts_as_zero() {
        let limits = QuotaLimits {
            max_per_hour: Some(1),
            ..Default::default()
        };
        let counters = QuotaCounters {
            runs_this_hour: 5,
            hour_window_start: Some(utc(2025, 3, 10, 9, 0)),
            ..Default::default()
        };
        assert_eq!(check_quota(&limits, &counters, utc(2025, 3, 10, 11, 30)), None);
    }

    #[test]
    fn overlap_policies_map_to_decisions() {
        let base = ConcurrencyConfig {
            overlap_policy: OverlapPolicy::Skip,
            max_concurrent_runs: 1,
        };
        // Below the cap always fires.
        assert_eq!(overlap_decision(&base, 0), OverlapDecision::Fire);

        let at_cap = |policy| {
            overlap_decision(
                &ConcurrencyConfig {
                    overlap_policy: policy,
                    max_concurrent_runs: 1,
                },
                1,
            )
        };
        assert_eq!(at_cap(OverlapPolicy::Skip), OverlapDecision::Skip);
        assert_eq!(at_cap(OverlapPolicy::Queue), OverlapDecision::Enqueue);
        assert_eq!(at_cap(OverlapPolicy::Allow), OverlapDecision::Fire);
        assert_eq!(
            at_cap(OverlapPolicy::CancelPrevious),
            OverlapDecision::CancelRunningThenFire
        );
        assert_eq!(at_cap(OverlapPolicy::CancelNew), OverlapDecision::DropNew);
    }

    #[test]
    fn missed_slots_counts_interval_gaps() {
        let trigger = TriggerConfig::Interval(IntervalTrigger {
            every_minutes: 10,
            start_at: Some(utc(2025, 3, 10, 8, 0)),
        });
        // Last ran 08:00, now 08:35 -> missed 08:10, 08:20, 08:30.
        let missed = missed_slots(
            &trigger,
            utc(2025, 3, 10, 8, 0),
            utc(2025, 3, 10, 8, 35),
            0,
        )
        .unwrap();
        assert_eq!(
            missed,
            vec![
                utc(2025, 3, 10, 8, 10),
                utc(2025, 3, 10, 8, 20),
                utc(2025, 3, 10, 8, 30),
            ]
        );
    }

    #[test]
    fn missed_slots_honors_window() {
        let trigger = TriggerConfig::Cron(CronTrigger {
            expression: "0 * * * *".into(),
            timezone: "UTC".into(),
        });
        // Six hours behind, but only a 2h window: keep the last two slots.
        let missed = missed_slots(
            &trigger,
            utc(2025, 3, 10, 2, 0),
            utc(2025, 3, 10, 8, 30),
            7200,
        )
        .unwrap();
        assert_eq!(missed, vec![utc(2025, 3, 10, 7, 0), utc(2025, 3, 10, 8, 0)]);
    }

    #[test]
    fn catchup_all_replays_every_missed_slot_up_to_cap() {
        let missed = vec![
            utc(2025, 3, 10, 8, 10),
            utc(2025, 3, 10, 8, 20),
            utc(2025, 3, 10, 8, 30),
        ];
        let all = CatchupConfig {
            policy: CatchupPolicy::All,
            window_secs: 0,
            max_catchup_runs: 10,
        };
        assert_eq!(catchup_plan(&all, &missed).len(), 3);

        let capped = CatchupConfig {
            policy: CatchupPolicy::All,
            window_secs: 0,
            max_catchup_runs: 2,
        };
        assert_eq!(catchup_plan(&capped, &missed).len(), 2);
    }

    #[test]
    fn catchup_single_firing_policies_pick_latest_slot() {
        let missed = vec![utc(2025, 3, 10, 8, 10), utc(2025, 3, 10, 8, 20)];
        for policy in [CatchupPolicy::None, CatchupPolicy::One, CatchupPolicy::Latest] {
            let cfg = CatchupConfig {
                policy,
                window_secs: 0,
                max_catchup_runs: 10,
            };
            assert_eq!(catchup_plan(&cfg, &missed), vec![utc(2025, 3, 10, 8, 20)]);
        }
    }
}
