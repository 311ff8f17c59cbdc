use crate::error::EngineError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use configuration::SchedulerSettings;

/// When, within one business day, a due installment may be attempted.
///
/// Attempt 1 runs at the day start; each retry runs at a fixed time before
/// the cut-off. Nothing runs at or after the cut-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    day_start: NaiveTime,
    retry_times: Vec<NaiveTime>,
    cutoff: NaiveTime,
}

impl RetryPolicy {
    /// Slot times must be strictly increasing and all before `cutoff`.
    pub fn new(day_start: NaiveTime, retry_times: Vec<NaiveTime>, cutoff: NaiveTime) -> Result<Self, EngineError> {
        let mut previous = None;
        for slot in std::iter::once(day_start).chain(retry_times.iter().copied()) {
            if slot >= cutoff {
                return Err(EngineError::Configuration(format!(
                    "attempt slot {} is not before the cut-off {}",
                    slot, cutoff
                )));
            }
            if previous.is_some_and(|p| slot <= p) {
                return Err(EngineError::Configuration(format!(
                    "attempt slot {} does not follow the previous slot",
                    slot
                )));
            }
            previous = Some(slot);
        }
        Ok(Self {
            day_start,
            retry_times,
            cutoff,
        })
    }

    pub fn from_settings(settings: &SchedulerSettings) -> Result<Self, EngineError> {
        let policy = Self::new(settings.day_start, settings.retry_times(), settings.cutoff)?;
        if policy.max_attempts() != settings.max_attempts {
            return Err(EngineError::Configuration(format!(
                "max_attempts is {} but {} retry offset(s) are configured",
                settings.max_attempts,
                policy.retry_times.len()
            )));
        }
        Ok(policy)
    }

    pub fn max_attempts(&self) -> u32 {
        (self.retry_times.len() + 1) as u32
    }

    pub fn day_start_on(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.day_start)
    }

    pub fn cutoff_on(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.cutoff)
    }

    /// Every attempt slot on `date`, in order. Slot `i` belongs to attempt `i + 1`.
    pub fn slots_on(&self, date: NaiveDate) -> Vec<NaiveDateTime> {
        std::iter::once(self.day_start)
            .chain(self.retry_times.iter().copied())
            .map(|time| date.and_time(time))
            .collect()
    }
}

/// Which dates the scheduler runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    skip_weekends: bool,
}

impl BusinessCalendar {
    pub fn new(skip_weekends: bool) -> Self {
        Self { skip_weekends }
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !(self.skip_weekends && matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
    }

    /// The first business day strictly after `date`.
    pub fn next_business_day(&self, date: NaiveDate) -> NaiveDate {
        std::iter::successors(date.succ_opt(), |d| d.succ_opt())
            .find(|d| self.is_business_day(*d))
            .unwrap_or(date)
    }

    /// The last business day strictly before `date`.
    pub fn previous_business_day(&self, date: NaiveDate) -> NaiveDate {
        std::iter::successors(date.pred_opt(), |d| d.pred_opt())
            .find(|d| self.is_business_day(*d))
            .unwrap_or(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    #[test]
    fn default_settings_give_three_slots() {
        let policy = RetryPolicy::from_settings(&SchedulerSettings::default()).unwrap();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            policy.slots_on(date(11, 5)),
            vec![
                date(11, 5).and_time(time(9, 30)),
                date(11, 5).and_time(time(13, 0)),
                date(11, 5).and_time(time(14, 0)),
            ]
        );
        assert_eq!(policy.cutoff_on(date(11, 5)), date(11, 5).and_time(time(15, 0)));
    }

    #[test]
    fn slots_must_precede_the_cutoff_in_order() {
        assert!(RetryPolicy::new(time(9, 30), vec![time(15, 0)], time(15, 0)).is_err());
        assert!(RetryPolicy::new(time(9, 30), vec![time(13, 0), time(12, 0)], time(15, 0)).is_err());
        assert!(RetryPolicy::new(time(16, 0), vec![], time(15, 0)).is_err());
        assert!(RetryPolicy::new(time(9, 30), vec![], time(15, 0)).is_ok());
    }

    #[test]
    fn attempt_count_must_match_offsets() {
        let settings = SchedulerSettings {
            max_attempts: 4,
            ..SchedulerSettings::default()
        };
        assert!(matches!(
            RetryPolicy::from_settings(&settings),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn weekends_are_skipped_when_configured() {
        let calendar = BusinessCalendar::new(true);
        // 2026-11-06 is a Friday, 2026-11-09 a Monday.
        assert!(!calendar.is_business_day(date(11, 7)));
        assert_eq!(calendar.next_business_day(date(11, 6)), date(11, 9));
        assert_eq!(calendar.previous_business_day(date(11, 9)), date(11, 6));

        let every_day = BusinessCalendar::new(false);
        assert!(every_day.is_business_day(date(11, 7)));
        assert_eq!(every_day.previous_business_day(date(11, 9)), date(11, 8));
    }
}
