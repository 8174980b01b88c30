use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use super::collaborators::PillarCalculator;
use crate::{
    db::{CalendarStore, RunLogStore},
    models::{
        CalendarEntryCreate, Error, ItemError, JobRunCreate, JobType, RunProgress, RunStatus,
        ScheduledBy,
    },
};

pub const DEFAULT_CALENDAR_DAYS: u32 = 30;
pub const MAX_CALENDAR_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayError {
    pub date: NaiveDate,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarSummary {
    pub success: bool,
    pub total: u32,
    pub created: u32,
    pub skipped: u32,
    pub errors: u32,
    pub error_details: Vec<DayError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayOutcome {
    Created,
    Skipped,
}

/// Keeps day pillars populated for the upcoming days.
///
/// Existing dates are skipped, so overlapping or concurrent runs never produce a
/// second entry for the same day. Days are handled one after another and a failing
/// day is recorded without stopping the rest.
pub struct CalendarGenerator {
    runs: Arc<dyn RunLogStore>,
    calendar: Arc<dyn CalendarStore>,
    calculator: Arc<dyn PillarCalculator>,
    tz: Tz,
}

impl CalendarGenerator {
    pub fn new(
        runs: Arc<dyn RunLogStore>,
        calendar: Arc<dyn CalendarStore>,
        calculator: Arc<dyn PillarCalculator>,
        tz: Tz,
    ) -> Self {
        Self {
            runs,
            calendar,
            calculator,
            tz,
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    pub async fn generate(
        &self,
        days: u32,
        scheduled_by: ScheduledBy,
    ) -> Result<CalendarSummary, Error> {
        let run_id = self.begin(days, scheduled_by).await?;
        self.execute(run_id, days).await
    }

    /// Creates the run record; the returned id is what callers poll.
    pub async fn begin(&self, days: u32, scheduled_by: ScheduledBy) -> Result<i64, Error> {
        if days > MAX_CALENDAR_DAYS {
            return Err(Error::InvalidParams("days"));
        }
        let run_id = self
            .runs
            .create_run(JobRunCreate {
                job_type: JobType::CalendarGenerator,
                status: RunStatus::Running,
                params: serde_json::json!({ "days": days }),
                scheduled_by,
                total_items: days as i32,
            })
            .await?;
        info!({ run_id, days, scheduled_by = %scheduled_by }, "calendar run created");
        Ok(run_id)
    }

    pub async fn execute(&self, run_id: i64, days: u32) -> Result<CalendarSummary, Error> {
        let anchor = self.today();
        let mut summary = CalendarSummary {
            success: true,
            total: days,
            created: 0,
            skipped: 0,
            errors: 0,
            error_details: Vec::new(),
        };

        for i in 0..days {
            let date = anchor + Days::new(u64::from(i));
            let mut day_errors = Vec::new();
            match self.ensure_day(date).await {
                Ok(DayOutcome::Created) => summary.created += 1,
                Ok(DayOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    warn!({ run_id, date = %date }, "day failed {:?}", err);
                    summary.errors += 1;
                    summary.error_details.push(DayError {
                        date,
                        message: err.to_string(),
                    });
                    day_errors.push(ItemError::new(Some(date.to_string()), &err));
                }
            }
            self.checkpoint(run_id, i + 1, summary.errors, day_errors)
                .await;
        }

        let status = match summary.errors {
            0 => RunStatus::Completed,
            _ => RunStatus::CompletedWithErrors,
        };
        let affected = self
            .runs
            .finish_run(run_id, status, serde_json::to_value(&summary)?, &[])
            .await?;
        if affected == 0 {
            warn!({ run_id }, "run was already finished");
        }
        info!(
            { run_id, created = summary.created, skipped = summary.skipped, errors = summary.errors },
            "calendar run {}", status
        );
        Ok(summary)
    }

    async fn ensure_day(&self, date: NaiveDate) -> Result<DayOutcome, Error> {
        if self.calendar.find_entry(date).await?.is_some() {
            return Ok(DayOutcome::Skipped);
        }
        let pillar = self.calculator.compute_pillar(date)?;
        let inserted = self
            .calendar
            .insert_entry(&CalendarEntryCreate { date, pillar })
            .await?;
        if !inserted {
            debug!({ date = %date }, "entry appeared concurrently");
            return Ok(DayOutcome::Skipped);
        }
        Ok(DayOutcome::Created)
    }

    async fn checkpoint(&self, run_id: i64, processed: u32, errors: u32, new_errors: Vec<ItemError>) {
        let progress = RunProgress {
            total_items: None,
            processed_items: i32::try_from(processed).unwrap_or(i32::MAX),
            error_items: i32::try_from(errors).unwrap_or(i32::MAX),
            errors: new_errors,
        };
        if let Err(err) = self.runs.update_run_progress(run_id, &progress).await {
            warn!({ run_id }, "progress not saved {:?}", err);
        }
    }
}
