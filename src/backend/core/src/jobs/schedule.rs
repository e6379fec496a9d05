//! Declarative schedules and next-run resolution.
//!
//! A [`ScheduleConfig`] is one of interval / daily / weekly / monthly / custom
//! cron, plus an `enabled` flag. Resolution is a pure function of the config
//! and the instant passed in; all wall-clock times are UTC.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use cron::Schedule;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::error::{JobflowError, Result};

/// Unit for interval schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl IntervalUnit {
    fn seconds(&self) -> i64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
        }
    }
}

/// `value` units between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub value: u32,
    pub unit: IntervalUnit,
}

/// Day selector for monthly schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOfMonth {
    /// A calendar day (1-31). Months without that day are skipped.
    Day(u32),
    /// The last calendar day of the month.
    Last,
}

impl Serialize for DayOfMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Day(day) => serializer.serialize_u32(*day),
            Self::Last => serializer.serialize_str("last"),
        }
    }
}

impl<'de> Deserialize<'de> for DayOfMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(day) => Ok(Self::Day(day)),
            Raw::Text(text) if text.eq_ignore_ascii_case("last") => Ok(Self::Last),
            Raw::Text(text) => text
                .parse::<u32>()
                .map(Self::Day)
                .map_err(|_| D::Error::custom(format!("invalid day of month: {}", text))),
        }
    }
}

/// The active shape of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval {
        interval: IntervalSpec,
    },
    Daily {
        time: String,
    },
    Weekly {
        day_of_week: Weekday,
        time: String,
    },
    Monthly {
        day_of_month: DayOfMonth,
        time: String,
    },
    Custom {
        custom_cron: String,
    },
}

/// Schedule configuration for a job.
///
/// `enabled = false` suppresses triggering without discarding the definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(flatten)]
    pub kind: ScheduleKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleConfig {
    pub fn interval(value: u32, unit: IntervalUnit) -> Self {
        Self::from_kind(ScheduleKind::Interval {
            interval: IntervalSpec { value, unit },
        })
    }

    pub fn daily(time: impl Into<String>) -> Self {
        Self::from_kind(ScheduleKind::Daily { time: time.into() })
    }

    pub fn weekly(day_of_week: Weekday, time: impl Into<String>) -> Self {
        Self::from_kind(ScheduleKind::Weekly {
            day_of_week,
            time: time.into(),
        })
    }

    pub fn monthly(day_of_month: DayOfMonth, time: impl Into<String>) -> Self {
        Self::from_kind(ScheduleKind::Monthly {
            day_of_month,
            time: time.into(),
        })
    }

    pub fn custom(expression: impl Into<String>) -> Self {
        Self::from_kind(ScheduleKind::Custom {
            custom_cron: expression.into(),
        })
    }

    fn from_kind(kind: ScheduleKind) -> Self {
        Self { kind, enabled: true }
    }

    /// Keep the definition but stop triggering it.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check the definition without resolving anything.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ScheduleKind::Interval { interval } => {
                if interval.value == 0 {
                    return Err(JobflowError::invalid_schedule(
                        "Interval value must be greater than zero",
                    ));
                }
            }
            ScheduleKind::Daily { time } => {
                parse_time(time)?;
            }
            ScheduleKind::Weekly { time, .. } => {
                parse_time(time)?;
            }
            ScheduleKind::Monthly { day_of_month, time } => {
                parse_time(time)?;
                if let DayOfMonth::Day(day) = day_of_month {
                    if !(1..=31).contains(day) {
                        return Err(JobflowError::invalid_schedule(format!(
                            "Day of month must be between 1 and 31, got {}",
                            day
                        ))
                        .with_context("day_of_month", day));
                    }
                }
            }
            ScheduleKind::Custom { custom_cron } => {
                parse_cron(custom_cron)?;
            }
        }
        Ok(())
    }

    /// Next execution instant strictly after `from`.
    ///
    /// Returns `Ok(None)` for disabled schedules; a malformed definition is an
    /// `InvalidSchedule` error.
    pub fn next_run(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if !self.enabled {
            return Ok(None);
        }

        match &self.kind {
            ScheduleKind::Interval { interval } => {
                self.validate()?;
                let seconds = i64::from(interval.value) * interval.unit.seconds();
                from.checked_add_signed(ChronoDuration::seconds(seconds))
                    .map(Some)
                    .ok_or_else(|| {
                        JobflowError::invalid_schedule(format!(
                            "Interval of {} {:?} from {} is out of range",
                            interval.value, interval.unit, from
                        ))
                    })
            }
            ScheduleKind::Daily { time } => {
                let time = parse_time(time)?;
                let mut candidate = at(from.date_naive(), time);
                if candidate <= from {
                    candidate = candidate + ChronoDuration::days(1);
                }
                Ok(Some(candidate))
            }
            ScheduleKind::Weekly { day_of_week, time } => {
                let time = parse_time(time)?;
                let next = (0..=7)
                    .map(|offset| at(from.date_naive() + ChronoDuration::days(offset), time))
                    .find(|candidate| candidate.weekday() == *day_of_week && *candidate > from);
                Ok(next)
            }
            ScheduleKind::Monthly { day_of_month, time } => {
                self.validate()?;
                let time = parse_time(time)?;
                Ok(next_monthly(from, *day_of_month, time))
            }
            ScheduleKind::Custom { custom_cron } => {
                let schedule = parse_cron(custom_cron)?;
                Ok(schedule.after(&from).next())
            }
        }
    }

    /// Equivalent six-field (seconds-first) cron expression, if one exists.
    ///
    /// `Ok(None)` for disabled schedules, `last`-day monthly schedules and
    /// intervals that do not divide their parent unit evenly.
    pub fn to_cron_expression(&self) -> Result<Option<String>> {
        self.validate()?;
        if !self.enabled {
            return Ok(None);
        }

        let expression = match &self.kind {
            ScheduleKind::Interval { interval } => interval_cron(interval),
            ScheduleKind::Daily { time } => {
                let time = parse_time(time)?;
                Some(format!("0 {} {} * * *", time.minute(), time.hour()))
            }
            ScheduleKind::Weekly { day_of_week, time } => {
                let time = parse_time(time)?;
                Some(format!(
                    "0 {} {} * * {}",
                    time.minute(),
                    time.hour(),
                    weekday_name(*day_of_week)
                ))
            }
            ScheduleKind::Monthly { day_of_month, time } => {
                let time = parse_time(time)?;
                match day_of_month {
                    DayOfMonth::Day(day) => Some(format!(
                        "0 {} {} {} * *",
                        time.minute(),
                        time.hour(),
                        day
                    )),
                    DayOfMonth::Last => None,
                }
            }
            ScheduleKind::Custom { custom_cron } => Some(normalize_cron(custom_cron)?),
        };

        Ok(expression)
    }
}

/// Free-function form of [`ScheduleConfig::next_run`].
pub fn next_run(config: &ScheduleConfig, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    config.next_run(from)
}

/// Accept five-field (minute-first) or six/seven-field (seconds-first) cron.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(JobflowError::invalid_schedule(format!(
            "Cron expression must have 5, 6 or 7 fields, got {}",
            n
        ))
        .with_context("expression", expression)),
    }
}

fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = normalize_cron(expression)?;
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| JobflowError::from(e).with_context("expression", expression))?;
    Ok(schedule)
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| {
            JobflowError::invalid_schedule(format!("Invalid time of day: {:?} (expected HH:MM)", value))
        })
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn next_monthly(from: DateTime<Utc>, day_of_month: DayOfMonth, time: NaiveTime) -> Option<DateTime<Utc>> {
    let mut year = from.year();
    let mut month = from.month();

    // Day 31 can be absent for several months in a row; two years covers every case.
    for _ in 0..24 {
        let last = last_day_of_month(year, month);
        let day = match day_of_month {
            DayOfMonth::Last => Some(last),
            DayOfMonth::Day(day) if day <= last => Some(day),
            DayOfMonth::Day(_) => None,
        };

        if let Some(date) = day.and_then(|d| NaiveDate::from_ymd_opt(year, month, d)) {
            let candidate = at(date, time);
            if candidate > from {
                return Some(candidate);
            }
        }

        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }

    None
}

fn interval_cron(interval: &IntervalSpec) -> Option<String> {
    let v = interval.value;
    match interval.unit {
        IntervalUnit::Seconds if 60 % v == 0 => Some(format!("*/{} * * * * *", v)),
        IntervalUnit::Minutes if 60 % v == 0 => Some(format!("0 */{} * * * *", v)),
        IntervalUnit::Hours if 24 % v == 0 => Some(format!("0 0 */{} * * *", v)),
        IntervalUnit::Days if v == 1 => Some("0 0 0 * * *".to_string()),
        IntervalUnit::Weeks if v == 1 => Some("0 0 0 * * Sun".to_string()),
        _ => None,
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}
