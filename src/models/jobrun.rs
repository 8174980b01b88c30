use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Error, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    CalendarGenerator,
    FortuneUpdate,
    SubscriptionCheck,
    Backup,
}

impl JobType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobType::CalendarGenerator => "calendar-generator",
            JobType::FortuneUpdate => "fortune-update",
            JobType::SubscriptionCheck => "subscription-check",
            JobType::Backup => "backup",
        }
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar-generator" => Ok(JobType::CalendarGenerator),
            "fortune-update" => Ok(JobType::FortuneUpdate),
            "subscription-check" => Ok(JobType::SubscriptionCheck),
            "backup" => Ok(JobType::Backup),
            _ => Err(Error::InvalidParams("job_type")),
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a run record. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Scheduled,
    Started,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub const OPEN: [RunStatus; 3] = [RunStatus::Scheduled, RunStatus::Started, RunStatus::Running];

    pub const fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Scheduled => "scheduled",
            RunStatus::Started => "started",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }

    /// States a record may be in for a move to `self` to be accepted.
    pub fn predecessors(&self) -> &'static [RunStatus] {
        match self {
            RunStatus::Scheduled | RunStatus::Started => &[],
            RunStatus::Running => &[RunStatus::Scheduled, RunStatus::Started],
            RunStatus::Completed | RunStatus::CompletedWithErrors | RunStatus::Failed => {
                &Self::OPEN
            }
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunStatus::Scheduled),
            "started" => Ok(RunStatus::Started),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "completed_with_errors" => Ok(RunStatus::CompletedWithErrors),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::InvalidParams("status")),
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledBy {
    Scheduler,
    Admin(Option<UserId>),
}

impl Display for ScheduledBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduledBy::Scheduler => f.write_str("scheduler"),
            ScheduledBy::Admin(None) => f.write_str("admin"),
            ScheduledBy::Admin(Some(id)) => write!(f, "admin:{id}"),
        }
    }
}

impl FromStr for ScheduledBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "scheduler" => Ok(ScheduledBy::Scheduler),
            None if s == "admin" => Ok(ScheduledBy::Admin(None)),
            Some(("admin", id)) => id
                .parse()
                .map(|id| ScheduledBy::Admin(Some(id)))
                .map_err(|_| Error::InvalidParams("scheduled_by")),
            _ => Err(Error::InvalidParams("scheduled_by")),
        }
    }
}

/// One entry of a run's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item_id: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl ItemError {
    pub fn new(item_id: Option<String>, err: &Error) -> Self {
        ItemError {
            item_id,
            message: err.to_string(),
            stack: Some(format!("{:?}", err)),
        }
    }

    /// Run-level entry, not tied to an item.
    pub fn system(err: &Error) -> Self {
        Self::new(None, err)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct JobRunRow {
    pub id: i64,
    pub job_type: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_items: i32,
    pub processed_items: i32,
    pub error_items: i32,
    #[sqlx(json)]
    pub error_list: Vec<ItemError>,
    pub params: serde_json::Value,
    pub scheduled_by: String,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct JobRunCreate {
    pub job_type: JobType,
    pub status: RunStatus,
    pub params: serde_json::Value,
    pub scheduled_by: ScheduledBy,
    pub total_items: i32,
}

/// Incremental checkpoint. Counters are absolute values, errors are appended.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    pub total_items: Option<i32>,
    pub processed_items: i32,
    pub error_items: i32,
    pub errors: Vec<ItemError>,
}

#[tokio::test]
async fn run_status_moves_forward_only() -> anyhow::Result<()> {
    // act & assert
    assert!(RunStatus::Running.predecessors().contains(&RunStatus::Scheduled));
    assert!(RunStatus::CompletedWithErrors.predecessors().contains(&RunStatus::Running));
    assert!(RunStatus::Failed.predecessors().contains(&RunStatus::Started));
    assert!(RunStatus::Scheduled.predecessors().is_empty());
    for terminal in [RunStatus::Completed, RunStatus::CompletedWithErrors, RunStatus::Failed] {
        for next in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert!(!next.predecessors().contains(&terminal));
        }
    }
    Ok(())
}

#[tokio::test]
async fn scheduled_by_round_trips_text() -> anyhow::Result<()> {
    // act & assert
    for by in [
        ScheduledBy::Scheduler,
        ScheduledBy::Admin(None),
        ScheduledBy::Admin(Some(42)),
    ] {
        assert_eq!(by, by.to_string().parse::<ScheduledBy>()?);
    }
    assert!("robot".parse::<ScheduledBy>().is_err());
    Ok(())
}
