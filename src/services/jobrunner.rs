use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::time;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::{
    db::RunLogStore,
    models::{
        Error, ItemError, JobRetry, JobRunCreate, JobSchedule, JobType, RunStatus, ScheduledBy,
    },
};

pub type JobFuture = BoxFuture<'static, Result<serde_json::Value, Error>>;
pub type JobFn = Arc<dyn Fn(Attempt) -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Starts at 1.
    pub number: u16,
}

impl Attempt {
    pub const fn is_retry(&self) -> bool {
        self.number > 1
    }
}

pub struct JobDefinition {
    pub name: String,
    pub job_type: JobType,
    pub schedule: JobSchedule,
    pub enabled: bool,
    pub retry: JobRetry,
    pub job: JobFn,
}

impl JobDefinition {
    pub fn new<F, Fut>(name: &str, job_type: JobType, schedule: JobSchedule, job: F) -> Self
    where
        F: Fn(Attempt) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, Error>> + Send + 'static,
    {
        Self {
            name: name.to_owned(),
            job_type,
            schedule,
            enabled: true,
            retry: JobRetry::None,
            job: Arc::new(move |attempt| job(attempt).boxed()),
        }
    }

    pub fn with_retry(mut self, retry: JobRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("job_type", &self.job_type)
            .field("schedule", &self.schedule.as_str())
            .field("enabled", &self.enabled)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub run_id: Option<i64>,
    pub status: RunStatus,
    pub attempts: u16,
    pub result: serde_json::Value,
}

/// Runs one invocation of a job under its retry policy.
///
/// Never fails: errors and panics of the job end up in the run record, so the
/// caller's loop keeps going.
pub async fn job_run(
    runs: &dyn RunLogStore,
    def: &JobDefinition,
    scheduled_by: ScheduledBy,
) -> JobOutcome {
    let job = def.name.as_str();
    let run_id = match runs
        .create_run(JobRunCreate {
            job_type: def.job_type,
            status: RunStatus::Scheduled,
            params: serde_json::json!({
                "job": job,
                "cron": def.schedule.as_str(),
                "retry": def.retry,
            }),
            scheduled_by,
            total_items: 0,
        })
        .await
    {
        Ok(id) => Some(id),
        Err(err) => {
            error!({ job }, "create run error {:?}", err);
            None
        }
    };

    let mut retry: u16 = 0;
    loop {
        let attempt = Attempt { number: retry + 1 };
        if !attempt.is_retry() {
            set_running(runs, run_id).await;
        }
        debug!({ job, run_id, attempt = attempt.number }, "==> run");
        match attempt_job(def, attempt).await {
            Ok(result) => {
                info!({ job, run_id, attempt = attempt.number }, "completed");
                let result = serde_json::json!({ "attempts": attempt.number, "result": result });
                finish(runs, run_id, RunStatus::Completed, result.clone(), &[]).await;
                return JobOutcome {
                    run_id,
                    status: RunStatus::Completed,
                    attempts: attempt.number,
                    result,
                };
            }
            Err(err) => match def.retry.next_retry_in(retry) {
                Some(delay) => {
                    warn!({ job, run_id, attempt = attempt.number, delay_secs = delay.as_secs() }, "==> retry {:?}", err);
                    time::sleep(delay).await;
                    retry += 1;
                }
                None => {
                    error!({ job, run_id, attempt = attempt.number }, "failed {:?}", err);
                    let result = serde_json::json!({
                        "attempts": attempt.number,
                        "error": err.to_string(),
                        "stack": format!("{:?}", err),
                    });
                    finish(runs, run_id, RunStatus::Failed, result.clone(), &[ItemError::system(&err)]).await;
                    return JobOutcome {
                        run_id,
                        status: RunStatus::Failed,
                        attempts: attempt.number,
                        result,
                    };
                }
            },
        }
    }
}

async fn attempt_job(def: &JobDefinition, attempt: Attempt) -> Result<serde_json::Value, Error> {
    match AssertUnwindSafe((def.job)(attempt)).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(Error::JobFailed(format!(
            "panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

async fn set_running(runs: &dyn RunLogStore, run_id: Option<i64>) {
    let Some(run_id) = run_id else { return };
    if let Err(err) = runs.set_run_status(run_id, RunStatus::Running).await {
        warn!({ run_id }, "set running error {:?}", err);
    }
}

async fn finish(
    runs: &dyn RunLogStore,
    run_id: Option<i64>,
    status: RunStatus,
    result: serde_json::Value,
    errors: &[ItemError],
) {
    let Some(run_id) = run_id else { return };
    match runs.finish_run(run_id, status, result, errors).await {
        Ok(0) => warn!({ run_id }, "run was already finished"),
        Ok(_) => {}
        Err(err) => error!({ run_id }, "finish error {:?}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use std::sync::atomic::{AtomicU16, Ordering};

    fn counting_job(calls: Arc<AtomicU16>, succeed_on: Option<u16>) -> JobDefinition {
        JobDefinition::new(
            "test-job",
            JobType::Backup,
            "0 0 3 * * *".parse().unwrap(),
            move |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    match succeed_on {
                        Some(n) if attempt.number >= n => Ok(serde_json::json!({ "ok": true })),
                        _ => Err(Error::JobFailed(format!("attempt {}", attempt.number))),
                    }
                }
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn job_run_attempts_retry_count_plus_one() -> anyhow::Result<()> {
        // arrange
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicU16::new(0));
        let def = counting_job(calls.clone(), None).with_retry(JobRetry::Fixed {
            retry_count: 3,
            retry_delay: 60,
        });

        // act
        let outcome = job_run(&store, &def, ScheduledBy::Scheduler).await;

        // assert
        assert_eq!(4, calls.load(Ordering::SeqCst));
        assert_eq!(RunStatus::Failed, outcome.status);
        assert_eq!(4, outcome.attempts);
        let run = store.get_run(1).await?.unwrap();
        assert_eq!("failed", run.status);
        assert_eq!("scheduler", run.scheduled_by);
        assert_eq!("backup", run.job_type);
        let result = run.result.unwrap();
        assert_eq!(4, result["attempts"]);
        assert_eq!("Job Failed - attempt 4", result["error"]);
        assert_eq!(1, run.error_list.len());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn job_run_waits_fixed_delay_between_attempts() -> anyhow::Result<()> {
        // arrange
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicU16::new(0));
        let def = counting_job(calls.clone(), Some(3)).with_retry(JobRetry::Fixed {
            retry_count: 3,
            retry_delay: 300,
        });
        let started = time::Instant::now();

        // act
        let outcome = job_run(&store, &def, ScheduledBy::Scheduler).await;

        // assert
        assert_eq!(RunStatus::Completed, outcome.status);
        assert_eq!(3, outcome.attempts);
        assert!(started.elapsed() >= std::time::Duration::from_secs(600));
        let run = store.get_run(1).await?.unwrap();
        assert_eq!("completed", run.status);
        assert_eq!(serde_json::json!({ "ok": true }), run.result.unwrap()["result"]);
        Ok(())
    }

    #[tokio::test]
    async fn job_run_turns_panic_into_failed_run() -> anyhow::Result<()> {
        // arrange
        let store = MemoryStore::new();
        let def = JobDefinition::new(
            "panicking",
            JobType::Backup,
            "0 0 3 * * *".parse()?,
            |_| async {
                let value: Option<serde_json::Value> = None;
                Ok(value.expect("boom"))
            },
        );

        // act
        let outcome = job_run(&store, &def, ScheduledBy::Scheduler).await;

        // assert
        assert_eq!(RunStatus::Failed, outcome.status);
        assert_eq!(1, outcome.attempts);
        assert_eq!("Job Failed - panicked: boom", outcome.result["error"]);
        Ok(())
    }
}
