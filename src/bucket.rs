//! Hour of day, day of week and time-of-day period for each observation.

use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;

use crate::types::{BucketedObservation, Observation};

/// Commute period an observation falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TimeOfDay {
    /// Weekday morning peak.
    Am,
    /// Weekday midday.
    Md,
    /// Weekday afternoon peak.
    Pm,
    /// Evenings, nights and boundary hours.
    Ev,
    /// Weekend daytime.
    We,
}

impl TimeOfDay {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeOfDay::Am => "AM",
            TimeOfDay::Md => "MD",
            TimeOfDay::Pm => "PM",
            TimeOfDay::Ev => "EV",
            TimeOfDay::We => "WE",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Days a rule applies to, using the 1 = Sunday ... 7 = Saturday numbering.
#[derive(Debug, Clone, Copy)]
enum Days {
    Weekdays,
    Weekend,
}

impl Days {
    fn contains(self, day_of_week: u8) -> bool {
        match self {
            Days::Weekdays => (2..=6).contains(&day_of_week),
            Days::Weekend => day_of_week == 1 || day_of_week == 7,
        }
    }
}

/// A period assignment applying to hours strictly between `after` and
/// `before` on the given days.
#[derive(Debug, Clone, Copy)]
struct Rule {
    period: TimeOfDay,
    after: u8,
    before: u8,
    days: Days,
}

impl Rule {
    fn matches(&self, hour: u8, day_of_week: u8) -> bool {
        self.after < hour && hour < self.before && self.days.contains(day_of_week)
    }
}

/// Evaluated top to bottom; the last matching rule wins.
static RULES: &[Rule] = &[
    Rule {
        period: TimeOfDay::Am,
        after: 5,
        before: 10,
        days: Days::Weekdays,
    },
    Rule {
        period: TimeOfDay::Md,
        after: 9,
        before: 16,
        days: Days::Weekdays,
    },
    Rule {
        period: TimeOfDay::Pm,
        after: 15,
        before: 20,
        days: Days::Weekdays,
    },
    Rule {
        period: TimeOfDay::We,
        after: 5,
        before: 20,
        days: Days::Weekend,
    },
];

/// Day of week numbered 1 = Sunday, 2 = Monday ... 7 = Saturday.
pub fn day_of_week(timestamp: &NaiveDateTime) -> u8 {
    let dow = timestamp.weekday().num_days_from_monday() as u8 + 2;
    if dow == 8 { 1 } else { dow }
}

/// Period for an hour (0-23) and a day of week (1-7). Defaults to
/// [`TimeOfDay::Ev`] when no rule matches.
pub fn time_of_day(hour: u8, day_of_week: u8) -> TimeOfDay {
    RULES
        .iter()
        .rev()
        .find(|rule| rule.matches(hour, day_of_week))
        .map_or(TimeOfDay::Ev, |rule| rule.period)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBucket {
    pub hour_of_day: u8,
    pub day_of_week: u8,
    pub time_of_day: TimeOfDay,
}

impl TimeBucket {
    pub fn from_timestamp(timestamp: &NaiveDateTime) -> Self {
        let hour_of_day = timestamp.hour() as u8;
        let day_of_week = day_of_week(timestamp);
        TimeBucket {
            hour_of_day,
            day_of_week,
            time_of_day: time_of_day(hour_of_day, day_of_week),
        }
    }
}

/// Attaches a [`TimeBucket`] to every observation, preserving order.
pub fn bucket_observations(observations: Vec<Observation>) -> Vec<BucketedObservation> {
    observations
        .into_iter()
        .map(|observation| BucketedObservation {
            bucket: TimeBucket::from_timestamp(&observation.timestamp),
            observation,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // 2023-01-01 was a Sunday.
    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_day_of_week_mapping() {
        assert_eq!(day_of_week(&at(1, 0)), 1); // Sunday
        assert_eq!(day_of_week(&at(2, 0)), 2); // Monday
        assert_eq!(day_of_week(&at(6, 0)), 6); // Friday
        assert_eq!(day_of_week(&at(7, 0)), 7); // Saturday
    }

    #[test]
    fn test_weekday_boundary_hours() {
        let expected = [
            (4, TimeOfDay::Ev),
            (5, TimeOfDay::Ev),
            (6, TimeOfDay::Am),
            (9, TimeOfDay::Am),
            (10, TimeOfDay::Md),
            (15, TimeOfDay::Md),
            (16, TimeOfDay::Pm),
            (19, TimeOfDay::Pm),
            (20, TimeOfDay::Ev),
            (23, TimeOfDay::Ev),
        ];
        for dow in 2..=6 {
            for (hour, tod) in expected {
                assert_eq!(time_of_day(hour, dow), tod, "hour {hour} dow {dow}");
            }
        }
    }

    #[test]
    fn test_weekend_boundary_hours() {
        for dow in [1, 7] {
            assert_eq!(time_of_day(5, dow), TimeOfDay::Ev);
            assert_eq!(time_of_day(6, dow), TimeOfDay::We);
            assert_eq!(time_of_day(9, dow), TimeOfDay::We);
            assert_eq!(time_of_day(10, dow), TimeOfDay::We);
            assert_eq!(time_of_day(15, dow), TimeOfDay::We);
            assert_eq!(time_of_day(16, dow), TimeOfDay::We);
            assert_eq!(time_of_day(19, dow), TimeOfDay::We);
            assert_eq!(time_of_day(20, dow), TimeOfDay::Ev);
        }
    }

    #[test]
    fn test_exactly_one_period_for_every_hour_and_day() {
        for dow in 1..=7u8 {
            for hour in 0..24u8 {
                let tod = time_of_day(hour, dow);
                let weekend = dow == 1 || dow == 7;
                match tod {
                    TimeOfDay::We => assert!(weekend),
                    TimeOfDay::Am | TimeOfDay::Md | TimeOfDay::Pm => assert!(!weekend),
                    TimeOfDay::Ev => assert!(!(6..=19).contains(&hour)),
                }
            }
        }
    }

    #[test]
    fn test_weekend_transition() {
        // Friday evening peak, Saturday daytime, Sunday night, Monday morning.
        assert_eq!(TimeBucket::from_timestamp(&at(6, 17)).time_of_day, TimeOfDay::Pm);
        assert_eq!(TimeBucket::from_timestamp(&at(7, 8)).time_of_day, TimeOfDay::We);
        assert_eq!(TimeBucket::from_timestamp(&at(8, 22)).time_of_day, TimeOfDay::Ev);
        assert_eq!(TimeBucket::from_timestamp(&at(9, 7)).time_of_day, TimeOfDay::Am);
    }

    #[test]
    fn test_from_timestamp_fields() {
        let bucket = TimeBucket::from_timestamp(&at(3, 14));
        assert_eq!(
            bucket,
            TimeBucket {
                hour_of_day: 14,
                day_of_week: 3,
                time_of_day: TimeOfDay::Md,
            }
        );
    }

    #[test]
    fn test_time_of_day_labels() {
        assert_eq!(TimeOfDay::Am.to_string(), "AM");
        assert_eq!(TimeOfDay::We.as_str(), "WE");
    }
}
