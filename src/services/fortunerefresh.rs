use std::{panic::AssertUnwindSafe, sync::Arc};

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use super::{collaborators::FortuneService, jobrunner::panic_message};
use crate::{
    db::{RunLogStore, UserDirectory},
    models::{
        Error, FortuneProgress, FortuneRunCreate, ItemError, JobRunCreate, JobType, RunProgress,
        RunStatus, ScheduledBy, UserId,
    },
};

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub force_update: bool,
    /// Defaults to today in the job's time zone.
    pub target_date: Option<NaiveDate>,
    pub page_size: u32,
    pub max_concurrent: usize,
    pub requested_by: ScheduledBy,
    pub is_automatic_retry: bool,
}

impl Default for RefreshRequest {
    fn default() -> Self {
        Self {
            force_update: false,
            target_date: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            requested_by: ScheduledBy::Scheduler,
            is_automatic_retry: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub success: bool,
    pub message: String,
    pub date: NaiveDate,
    pub total_users: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub update_errors: Vec<ItemError>,
}

/// Ids of the two records kept for one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRun {
    pub job_run_id: i64,
    pub fortune_run_id: i64,
    pub date: NaiveDate,
}

#[derive(Debug)]
struct UserFailure {
    user_id: UserId,
    error: Error,
}

#[derive(Debug, Default)]
struct Tally {
    total_users: i32,
    success_count: i32,
    failed_count: i32,
    update_errors: Vec<ItemError>,
}

impl Tally {
    fn visited(&self) -> i32 {
        self.success_count + self.failed_count
    }

    fn total(&self) -> i32 {
        self.total_users.max(self.visited())
    }
}

pub struct FortuneRefreshJob {
    runs: Arc<dyn RunLogStore>,
    users: Arc<dyn UserDirectory>,
    fortunes: Arc<dyn FortuneService>,
    tz: Tz,
}

impl FortuneRefreshJob {
    pub fn new(
        runs: Arc<dyn RunLogStore>,
        users: Arc<dyn UserDirectory>,
        fortunes: Arc<dyn FortuneService>,
        tz: Tz,
    ) -> Self {
        Self {
            runs,
            users,
            fortunes,
            tz,
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Fails only when the run records cannot be created; anything after that is
    /// reported through the summary and the records.
    pub async fn refresh(&self, req: RefreshRequest) -> Result<RefreshSummary, Error> {
        let run = self.begin(&req).await?;
        Ok(self.execute(run, &req).await)
    }

    pub async fn begin(&self, req: &RefreshRequest) -> Result<RefreshRun, Error> {
        let date = req.target_date.unwrap_or_else(|| self.today());
        let job_run_id = self
            .runs
            .create_run(JobRunCreate {
                job_type: JobType::FortuneUpdate,
                status: RunStatus::Running,
                params: serde_json::json!({
                    "force_update": req.force_update,
                    "target_date": date,
                    "page_size": req.page_size,
                    "max_concurrent": req.max_concurrent,
                    "is_automatic_retry": req.is_automatic_retry,
                }),
                scheduled_by: req.requested_by,
                total_items: 0,
            })
            .await?;
        let fortune_run_id = self
            .runs
            .create_fortune_run(FortuneRunCreate {
                job_run_id: Some(job_run_id),
                date,
                is_automatic_retry: req.is_automatic_retry,
                created_by: req.requested_by,
            })
            .await?;
        info!({ job_run_id, fortune_run_id, date = %date }, "fortune run created");
        Ok(RefreshRun {
            job_run_id,
            fortune_run_id,
            date,
        })
    }

    pub async fn execute(&self, run: RefreshRun, req: &RefreshRequest) -> RefreshSummary {
        let mut tally = Tally::default();
        match self.process_all(run, req, &mut tally).await {
            Ok(()) => self.complete(run, tally).await,
            Err(err) => self.abort(run, tally, err).await,
        }
    }

    async fn process_all(
        &self,
        run: RefreshRun,
        req: &RefreshRequest,
        tally: &mut Tally,
    ) -> Result<(), Error> {
        let total = self.users.count_active().await?;
        tally.total_users = i32::try_from(total).unwrap_or(i32::MAX);
        self.checkpoint(run, tally, Vec::new()).await?;

        let page_size = req.page_size.max(1);
        let max_concurrent = req.max_concurrent.max(1);
        let mut after: Option<UserId> = None;
        let mut page_no = 0;
        loop {
            let page = self.users.page_active(after, i64::from(page_size)).await?;
            let Some(&last) = page.last() else {
                break;
            };
            after = Some(last);
            page_no += 1;
            let page_len = page.len();

            let outcomes: Vec<Result<UserId, UserFailure>> = stream::iter(page)
                .map(|user_id| self.refresh_user(user_id, run.date, req.force_update))
                .buffer_unordered(max_concurrent)
                .collect()
                .await;

            let mut page_errors = Vec::new();
            for outcome in outcomes {
                match outcome {
                    Ok(_) => tally.success_count += 1,
                    Err(UserFailure { user_id, error }) => {
                        tally.failed_count += 1;
                        page_errors.push(ItemError::new(Some(user_id.to_string()), &error));
                    }
                }
            }
            tally.update_errors.extend(page_errors.iter().cloned());
            self.checkpoint(run, tally, page_errors).await?;
            debug!(
                { job_run_id = run.job_run_id, page_no, success = tally.success_count, failed = tally.failed_count },
                "page done"
            );

            if page_len < page_size as usize {
                break;
            }
        }
        Ok(())
    }

    async fn refresh_user(
        &self,
        user_id: UserId,
        date: NaiveDate,
        force_update: bool,
    ) -> Result<UserId, UserFailure> {
        let call = self.fortunes.generate_fortune(user_id, date, force_update);
        let res = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(res) => res,
            Err(panic) => Err(Error::JobFailed(format!(
                "panicked: {}",
                panic_message(&*panic)
            ))),
        };
        match res {
            Ok(()) => Ok(user_id),
            Err(error) => {
                warn!({ user_id, date = %date }, "fortune update failed {:?}", error);
                Err(UserFailure { user_id, error })
            }
        }
    }

    async fn checkpoint(
        &self,
        run: RefreshRun,
        tally: &Tally,
        errors: Vec<ItemError>,
    ) -> Result<(), Error> {
        let run_progress = RunProgress {
            total_items: Some(tally.total()),
            processed_items: tally.visited(),
            error_items: tally.failed_count,
            errors: errors.clone(),
        };
        self.runs
            .update_run_progress(run.job_run_id, &run_progress)
            .await?;
        let fortune_progress = FortuneProgress {
            total_users: Some(tally.total()),
            success_count: tally.success_count,
            failed_count: tally.failed_count,
            errors,
        };
        self.runs
            .update_fortune_progress(run.fortune_run_id, &fortune_progress)
            .await?;
        Ok(())
    }

    async fn complete(&self, run: RefreshRun, tally: Tally) -> RefreshSummary {
        let (fortune_status, job_status) = match tally.failed_count {
            0 => (RunStatus::Completed, RunStatus::Completed),
            _ => (RunStatus::Failed, RunStatus::CompletedWithErrors),
        };
        let summary = RefreshSummary {
            success: true,
            message: format!(
                "updated {} of {} users for {}",
                tally.success_count,
                tally.total(),
                run.date
            ),
            date: run.date,
            total_users: tally.total(),
            success_count: tally.success_count,
            failed_count: tally.failed_count,
            update_errors: tally.update_errors,
        };
        self.finalize(run, fortune_status, job_status, &summary, Vec::new())
            .await;
        info!(
            { job_run_id = run.job_run_id, fortune_run_id = run.fortune_run_id },
            "{}", summary.message
        );
        summary
    }

    async fn abort(&self, run: RefreshRun, tally: Tally, err: Error) -> RefreshSummary {
        error!(
            { job_run_id = run.job_run_id, fortune_run_id = run.fortune_run_id },
            "fortune run aborted {:?}", err
        );
        let system = ItemError::system(&err);
        let total_users = tally.total();
        let mut update_errors = tally.update_errors;
        update_errors.push(system.clone());
        let summary = RefreshSummary {
            success: false,
            message: format!("fortune update aborted: {}", err),
            date: run.date,
            total_users,
            success_count: tally.success_count,
            failed_count: tally.failed_count,
            update_errors,
        };
        self.finalize(run, RunStatus::Failed, RunStatus::Failed, &summary, vec![system])
            .await;
        summary
    }

    async fn finalize(
        &self,
        run: RefreshRun,
        fortune_status: RunStatus,
        job_status: RunStatus,
        summary: &RefreshSummary,
        errors: Vec<ItemError>,
    ) {
        let progress = FortuneProgress {
            total_users: Some(summary.total_users),
            success_count: summary.success_count,
            failed_count: summary.failed_count,
            errors: errors.clone(),
        };
        if let Err(err) = self
            .runs
            .finish_fortune_run(run.fortune_run_id, fortune_status, &progress)
            .await
        {
            error!({ fortune_run_id = run.fortune_run_id }, "finish error {:?}", err);
        }
        let result = serde_json::json!({
            "success": summary.success,
            "message": summary.message,
            "date": summary.date,
            "total_users": summary.total_users,
            "success_count": summary.success_count,
            "failed_count": summary.failed_count,
        });
        if let Err(err) = self
            .runs
            .finish_run(run.job_run_id, job_status, result, &errors)
            .await
        {
            error!({ job_run_id = run.job_run_id }, "finish error {:?}", err);
        }
    }
}
