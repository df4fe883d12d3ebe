//! Report schedules and next-run computation.
//!
//! All computations happen in the schedule's fixed UTC offset and are pure:
//! the same `(schedule, from)` always yields the same instant.

use chrono::{
    DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use forgebi_core::{AnalyticsError, AnalyticsResult};

/// ±14h, the widest offset in use.
pub const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Once,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub frequency: Frequency,
    /// Local time of day in the schedule's offset.
    pub time: NaiveTime,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
    /// 1..=31; clamped to the month's last day.
    #[serde(default)]
    pub day_of_month: Option<u32>,
    pub enabled: bool,
}

impl ReportSchedule {
    pub fn daily(time: NaiveTime) -> Self {
        Self {
            frequency: Frequency::Daily,
            time,
            utc_offset_minutes: 0,
            day_of_week: None,
            day_of_month: None,
            enabled: true,
        }
    }

    pub fn weekly(day: Weekday, time: NaiveTime) -> Self {
        Self {
            frequency: Frequency::Weekly,
            day_of_week: Some(day),
            ..Self::daily(time)
        }
    }

    pub fn monthly(day_of_month: u32, time: NaiveTime) -> Self {
        Self {
            frequency: Frequency::Monthly,
            day_of_month: Some(day_of_month),
            ..Self::daily(time)
        }
    }

    pub fn once(time: NaiveTime) -> Self {
        Self {
            frequency: Frequency::Once,
            ..Self::daily(time)
        }
    }

    pub fn with_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        self.offset()?;
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(AnalyticsError::schedule(format!(
                    "day_of_month {day} is outside 1..=31"
                )));
            }
        }
        if self.frequency == Frequency::Weekly && self.day_of_week.is_none() {
            return Err(AnalyticsError::schedule("weekly schedule needs a day_of_week"));
        }
        Ok(())
    }

    fn offset(&self) -> AnalyticsResult<FixedOffset> {
        if !(-MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).contains(&self.utc_offset_minutes) {
            return Err(AnalyticsError::schedule(format!(
                "utc offset {} minutes is outside ±{MAX_OFFSET_MINUTES}",
                self.utc_offset_minutes
            )));
        }
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            AnalyticsError::schedule(format!("invalid utc offset {}", self.utc_offset_minutes))
        })
    }

    fn at(&self, tz: &FixedOffset, date: NaiveDate) -> AnalyticsResult<DateTime<Utc>> {
        tz.from_local_datetime(&date.and_time(self.time))
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| AnalyticsError::schedule(format!("{date} {} is not representable", self.time)))
    }

    fn month_day(&self, year: i32, month: u32, fallback: u32) -> AnalyticsResult<NaiveDate> {
        let wanted = self.day_of_month.unwrap_or(fallback);
        let last = last_day_of_month(year, month)?;
        NaiveDate::from_ymd_opt(year, month, wanted.min(last))
            .ok_or_else(|| AnalyticsError::schedule(format!("no date {year}-{month}-{wanted}")))
    }
}

/// Next run after a run that happened at `from`.
///
/// - daily: the day after `from`'s local date, at `time`
/// - weekly: the next `day_of_week` strictly after `from`'s local date
/// - monthly: one month after `from`, on `day_of_month` (or `from`'s day)
///   clamped to the month's last day
/// - once: `None`
pub fn compute_next_run(
    schedule: &ReportSchedule,
    from: DateTime<Utc>,
) -> AnalyticsResult<Option<DateTime<Utc>>> {
    schedule.validate()?;
    let tz = schedule.offset()?;
    let today = from.with_timezone(&tz).date_naive();

    let date = match schedule.frequency {
        Frequency::Once => return Ok(None),
        Frequency::Daily => add_days(today, 1)?,
        Frequency::Weekly => next_weekday_after(today, weekday(schedule)?)?,
        Frequency::Monthly => {
            let next = today
                .checked_add_months(Months::new(1))
                .ok_or_else(|| AnalyticsError::schedule("month overflow"))?;
            schedule.month_day(next.year(), next.month(), today.day())?
        }
    };
    schedule.at(&tz, date).map(Some)
}

/// First matching instant strictly after `from`; used when a schedule is
/// created, edited or re-enabled.
pub fn first_run(
    schedule: &ReportSchedule,
    from: DateTime<Utc>,
) -> AnalyticsResult<Option<DateTime<Utc>>> {
    schedule.validate()?;
    let tz = schedule.offset()?;
    let today = from.with_timezone(&tz).date_naive();

    let candidate = match schedule.frequency {
        Frequency::Daily | Frequency::Once => {
            let today_at = schedule.at(&tz, today)?;
            if today_at > from {
                today_at
            } else {
                schedule.at(&tz, add_days(today, 1)?)?
            }
        }
        Frequency::Weekly => {
            let day = weekday(schedule)?;
            let mut found = None;
            for offset in 0..=7 {
                let date = add_days(today, offset)?;
                if date.weekday() != day {
                    continue;
                }
                let at = schedule.at(&tz, date)?;
                if at > from {
                    found = Some(at);
                    break;
                }
            }
            found.ok_or_else(|| AnalyticsError::schedule("no weekly slot within 8 days"))?
        }
        Frequency::Monthly => {
            let this_month = schedule.month_day(today.year(), today.month(), today.day())?;
            let this_month_at = schedule.at(&tz, this_month)?;
            if this_month_at > from {
                this_month_at
            } else {
                let next = today
                    .checked_add_months(Months::new(1))
                    .ok_or_else(|| AnalyticsError::schedule("month overflow"))?;
                schedule.at(&tz, schedule.month_day(next.year(), next.month(), today.day())?)?
            }
        }
    };
    Ok(Some(candidate))
}

fn weekday(schedule: &ReportSchedule) -> AnalyticsResult<Weekday> {
    schedule
        .day_of_week
        .ok_or_else(|| AnalyticsError::schedule("weekly schedule needs a day_of_week"))
}

fn add_days(date: NaiveDate, days: u64) -> AnalyticsResult<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| AnalyticsError::schedule(format!("{date} + {days} days overflows")))
}

/// 1..=7 days after `date`.
fn next_weekday_after(date: NaiveDate, day: Weekday) -> AnalyticsResult<NaiveDate> {
    let current = date.weekday().num_days_from_monday();
    let target = day.num_days_from_monday();
    let ahead = (target + 7 - current) % 7;
    add_days(date, u64::from(if ahead == 0 { 7 } else { ahead }))
}

fn last_day_of_month(year: i32, month: u32) -> AnalyticsResult<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AnalyticsError::schedule(format!("no month {year}-{month}")))?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or_else(|| AnalyticsError::schedule("month overflow"))?;
    next.pred_opt()
        .map(|d| d.day())
        .ok_or_else(|| AnalyticsError::schedule("month underflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn monthly_31st_from_january_lands_on_leap_february() {
        let schedule = ReportSchedule::monthly(31, nine());
        let next = compute_next_run(&schedule, at(2024, 1, 31, 9, 0)).unwrap();
        assert_eq!(next, Some(at(2024, 2, 29, 9, 0)));

        let after = compute_next_run(&schedule, at(2024, 2, 29, 9, 0)).unwrap();
        assert_eq!(after, Some(at(2024, 3, 31, 9, 0)));
    }

    #[test]
    fn daily_is_next_day_at_time() {
        let schedule = ReportSchedule::daily(nine());
        assert_eq!(
            compute_next_run(&schedule, at(2024, 5, 10, 23, 30)).unwrap(),
            Some(at(2024, 5, 11, 9, 0))
        );
    }

    #[test]
    fn weekly_is_strictly_after_the_current_date() {
        // 2024-05-13 is a Monday.
        let schedule = ReportSchedule::weekly(Weekday::Mon, nine());
        assert_eq!(
            compute_next_run(&schedule, at(2024, 5, 13, 8, 0)).unwrap(),
            Some(at(2024, 5, 20, 9, 0))
        );
        let friday = ReportSchedule::weekly(Weekday::Fri, nine());
        assert_eq!(
            compute_next_run(&friday, at(2024, 5, 13, 8, 0)).unwrap(),
            Some(at(2024, 5, 17, 9, 0))
        );
    }

    #[test]
    fn once_has_no_next_run() {
        let schedule = ReportSchedule::once(nine());
        assert_eq!(compute_next_run(&schedule, at(2024, 5, 13, 8, 0)).unwrap(), None);
    }

    #[test]
    fn offset_shifts_the_utc_instant() {
        // 09:00 at UTC+02:00 is 07:00 UTC.
        let schedule = ReportSchedule::daily(nine()).with_offset_minutes(120);
        assert_eq!(
            compute_next_run(&schedule, at(2024, 5, 10, 12, 0)).unwrap(),
            Some(at(2024, 5, 11, 7, 0))
        );
    }

    #[test]
    fn invalid_schedules_are_schedule_errors() {
        let bad_day = ReportSchedule::monthly(32, nine());
        assert!(matches!(
            compute_next_run(&bad_day, Utc::now()),
            Err(AnalyticsError::ScheduleComputation(_))
        ));

        let mut no_weekday = ReportSchedule::weekly(Weekday::Mon, nine());
        no_weekday.day_of_week = None;
        assert!(compute_next_run(&no_weekday, Utc::now()).is_err());

        let far = ReportSchedule::daily(nine()).with_offset_minutes(15 * 60);
        assert!(compute_next_run(&far, Utc::now()).is_err());
    }

    #[test]
    fn first_run_prefers_today_when_still_ahead() {
        let schedule = ReportSchedule::daily(nine());
        assert_eq!(
            first_run(&schedule, at(2024, 5, 10, 8, 0)).unwrap(),
            Some(at(2024, 5, 10, 9, 0))
        );
        assert_eq!(
            first_run(&schedule, at(2024, 5, 10, 9, 0)).unwrap(),
            Some(at(2024, 5, 11, 9, 0))
        );

        let monday = ReportSchedule::weekly(Weekday::Mon, nine());
        assert_eq!(
            first_run(&monday, at(2024, 5, 13, 8, 0)).unwrap(),
            Some(at(2024, 5, 13, 9, 0))
        );

        let month_end = ReportSchedule::monthly(31, nine());
        assert_eq!(
            first_run(&month_end, at(2024, 2, 10, 0, 0)).unwrap(),
            Some(at(2024, 2, 29, 9, 0))
        );
    }

    fn schedule_strategy() -> impl Strategy<Value = ReportSchedule> {
        let time = (0u32..24, 0u32..60).prop_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap());
        let weekday = (0u8..7).prop_map(|d| Weekday::try_from(d).unwrap());
        (0u8..3, time, weekday, 1u32..=31, -MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).prop_map(
            |(kind, time, day, dom, offset)| {
                let schedule = match kind {
                    0 => ReportSchedule::daily(time),
                    1 => ReportSchedule::weekly(day, time),
                    _ => ReportSchedule::monthly(dom, time),
                };
                schedule.with_offset_minutes(offset)
            },
        )
    }

    proptest! {
        #[test]
        fn next_run_is_deterministic_and_after_from(
            schedule in schedule_strategy(),
            secs in 1_600_000_000i64..1_900_000_000i64,
        ) {
            let from = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let a = compute_next_run(&schedule, from).unwrap().unwrap();
            let b = compute_next_run(&schedule, from).unwrap().unwrap();
            prop_assert_eq!(a, b);
            prop_assert!(a > from);

            let first = first_run(&schedule, from).unwrap().unwrap();
            prop_assert!(first > from);
            prop_assert!(first <= a);
        }
    }
}
