use std::{fmt::Display, str::FromStr, sync::OnceLock};

use super::Error;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use regex::Regex;

/// Trigger time used when the stored daily time is missing or malformed.
pub const DEFAULT_DAILY_TIME: &str = "03:00";

const DAILY_TIME_PATTERN: &str = r"^([01][0-9]|2[0-3]):([0-5][0-9])$";

fn daily_time_regex() -> &'static Regex {
    static DAILY_TIME: OnceLock<Regex> = OnceLock::new();
    DAILY_TIME.get_or_init(|| Regex::new(DAILY_TIME_PATTERN).expect("daily time pattern"))
}

/// Validated cron expression (seconds field first).
#[derive(Debug, Clone)]
pub struct JobSchedule {
    cron: String,
    schedule: Schedule,
}

impl JobSchedule {
    /// Converts a strict 24-hour `HH:MM` string into a daily cron trigger.
    pub fn from_daily_time(s: &str) -> Result<Self, Error> {
        let caps = daily_time_regex()
            .captures(s.trim())
            .ok_or(Error::InvalidParams("daily_time"))?;
        let hour: u32 = caps[1]
            .parse()
            .map_err(|_| Error::InvalidParams("daily_time"))?;
        let minute: u32 = caps[2]
            .parse()
            .map_err(|_| Error::InvalidParams("daily_time"))?;
        format!("0 {minute} {hour} * * *").parse()
    }

    pub fn daily_default() -> Self {
        Self::from_daily_time(DEFAULT_DAILY_TIME).expect("default daily time")
    }

    pub fn as_str(&self) -> &str {
        &self.cron
    }

    /// Next fire time strictly after `after`, evaluated in `tz`.
    pub fn next(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl PartialEq for JobSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.cron == other.cron
    }
}

impl FromStr for JobSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(Error::InvalidParams("schedule"));
        }
        let mut parts: Vec<&str> = s.split(['|', ' ']).filter(|p| !p.is_empty()).collect();
        let fixed: String = match parts.len() {
            5 => {
                parts.insert(0, "0");
                Ok(parts.join(" "))
            }
            6 | 7 => Ok(parts.join(" ")),
            _ => Err(Error::InvalidParams("schedule")),
        }?;
        let schedule = Schedule::from_str(&fixed).map_err(|_| Error::InvalidParams("schedule"))?;
        Ok(JobSchedule {
            cron: fixed,
            schedule,
        })
    }
}

impl Display for JobSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cron)
    }
}

#[tokio::test]
async fn schedule_from_str_err() -> anyhow::Result<()> {
    // arrange
    let s = "";
    // act
    let schedule: Result<JobSchedule, _> = s.parse();

    // assert
    assert!(schedule.is_err());
    Ok(())
}

#[tokio::test]
async fn schedule_from_str_widens_five_fields() -> anyhow::Result<()> {
    // arrange
    let s = "*/5 * * * *";
    // act
    let schedule: JobSchedule = s.parse()?;

    // assert
    assert_eq!("0 */5 * * * *", schedule.as_str());
    assert_eq!("0 */5 * * * *", schedule.to_string());
    Ok(())
}

#[tokio::test]
async fn schedule_from_daily_time() -> anyhow::Result<()> {
    // arrange
    let s = "04:30";
    // act
    let schedule = JobSchedule::from_daily_time(s)?;

    // assert
    assert_eq!("0 30 4 * * *", schedule.as_str());
    Ok(())
}

#[tokio::test]
async fn schedule_from_daily_time_is_strict() -> anyhow::Result<()> {
    // act & assert
    for s in ["24:00", "3:00", "03:60", "0300", "03:00:00", "ab:cd", ""] {
        assert!(JobSchedule::from_daily_time(s).is_err(), "{s} accepted");
    }
    assert!(JobSchedule::from_daily_time("23:59").is_ok());
    assert!(JobSchedule::from_daily_time("00:00").is_ok());
    Ok(())
}

#[tokio::test]
async fn schedule_next_in_time_zone() -> anyhow::Result<()> {
    use chrono::TimeZone;

    // arrange
    let schedule = JobSchedule::daily_default();
    let after = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();

    // act
    let next = schedule.next(after, chrono_tz::Asia::Seoul);

    // assert
    assert_eq!(Some(Utc.with_ymd_and_hms(2026, 10, 19, 18, 0, 0).unwrap()), next);
    Ok(())
}
