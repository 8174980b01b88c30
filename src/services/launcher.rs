use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use super::{
    calendargenerator::{CalendarGenerator, CalendarSummary},
    fortunerefresh::{FortuneRefreshJob, RefreshRequest, RefreshSummary},
};
use crate::models::{Error, RunStatus, ScheduledBy, UserId};

/// A run started in the background. The ids are known before any work is done.
#[derive(Debug)]
pub struct LaunchedRun<T> {
    pub run_id: i64,
    pub fortune_run_id: Option<i64>,
    pub status: RunStatus,
    pub handle: JoinHandle<T>,
}

/// Starts jobs on demand, outside of the cron triggers.
#[derive(Clone)]
pub struct JobLauncher {
    calendar: Arc<CalendarGenerator>,
    fortune: Arc<FortuneRefreshJob>,
    page_size: u32,
    max_concurrent: usize,
}

impl JobLauncher {
    pub fn new(
        calendar: Arc<CalendarGenerator>,
        fortune: Arc<FortuneRefreshJob>,
        page_size: u32,
        max_concurrent: usize,
    ) -> Self {
        Self {
            calendar,
            fortune,
            page_size,
            max_concurrent,
        }
    }

    pub fn calendar(&self) -> Arc<CalendarGenerator> {
        Arc::clone(&self.calendar)
    }

    pub fn fortune(&self) -> Arc<FortuneRefreshJob> {
        Arc::clone(&self.fortune)
    }

    pub async fn run_calendar_now(
        &self,
        days: u32,
        requested_by: Option<UserId>,
    ) -> Result<LaunchedRun<Result<CalendarSummary, Error>>, Error> {
        let run_id = self
            .calendar
            .begin(days, ScheduledBy::Admin(requested_by))
            .await?;
        let generator = Arc::clone(&self.calendar);
        let handle = tokio::spawn(async move {
            let res = generator.execute(run_id, days).await;
            if let Err(err) = &res {
                error!({ run_id }, "manual calendar run error {:?}", err);
            }
            res
        });
        Ok(LaunchedRun {
            run_id,
            fortune_run_id: None,
            status: RunStatus::Running,
            handle,
        })
    }

    pub async fn run_fortune_now(
        &self,
        target_date: Option<NaiveDate>,
        force_update: bool,
        requested_by: Option<UserId>,
    ) -> Result<LaunchedRun<RefreshSummary>, Error> {
        let req = RefreshRequest {
            force_update,
            target_date,
            page_size: self.page_size,
            max_concurrent: self.max_concurrent,
            requested_by: ScheduledBy::Admin(requested_by),
            is_automatic_retry: false,
        };
        let run = self.fortune.begin(&req).await?;
        let refresher = Arc::clone(&self.fortune);
        let handle = tokio::spawn(async move { refresher.execute(run, &req).await });
        info!({ job_run_id = run.job_run_id, fortune_run_id = run.fortune_run_id, force_update }, "manual fortune run");
        Ok(LaunchedRun {
            run_id: run.job_run_id,
            fortune_run_id: Some(run.fortune_run_id),
            status: RunStatus::Running,
            handle,
        })
    }
}
