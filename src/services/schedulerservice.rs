use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use super::{
    calendargenerator::CalendarGenerator,
    fortunerefresh::{FortuneRefreshJob, RefreshRequest},
    jobrunner::{self, JobDefinition},
};
use crate::{
    db::{RunLogStore, SettingsStore},
    models::{
        state::{CalendarJobOptions, FortuneJobOptions},
        AppState, Error, JobSchedule, JobType, ScheduledBy, DEFAULT_DAILY_TIME,
    },
};

pub const FORTUNE_UPDATE_TIME_KEY: &str = "fortuneUpdateTime";

#[derive(Debug)]
struct Trigger {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the recurring job definitions and their live cron triggers.
pub struct Scheduler {
    runs: Arc<dyn RunLogStore>,
    tz: Tz,
    definitions: Vec<Arc<JobDefinition>>,
    triggers: Vec<Trigger>,
}

impl Scheduler {
    pub fn new(runs: Arc<dyn RunLogStore>, tz: Tz) -> Self {
        Self {
            runs,
            tz,
            definitions: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Builds the scheduler with the calendar and fortune jobs of the application.
    pub async fn from_state(state: &AppState) -> Self {
        let options = &state.options;
        let mut scheduler = Scheduler::new(state.stores.runs.clone(), options.tz);
        scheduler.register(calendar_definition(
            state.launcher.calendar(),
            &options.calendar,
        ));
        let schedule = resolve_fortune_schedule(state.stores.settings.as_ref()).await;
        scheduler.register(fortune_definition(
            state.launcher.fortune(),
            &options.fortune,
            schedule,
        ));
        scheduler
    }

    pub fn register(&mut self, def: JobDefinition) -> &mut Self {
        self.definitions.push(Arc::new(def));
        self
    }

    pub fn is_running(&self) -> bool {
        !self.triggers.is_empty()
    }

    /// Installs a cron trigger for every enabled definition. Returns the number of
    /// installed triggers.
    pub fn start(&mut self) -> usize {
        if self.is_running() {
            warn!({ triggers = self.triggers.len() }, "already started");
            return self.triggers.len();
        }
        for def in &self.definitions {
            let job = def.name.as_str();
            if !def.enabled {
                info!({ job }, "disabled, skipping");
                continue;
            }
            let token = CancellationToken::new();
            let handle = tokio::spawn(run_trigger(
                Arc::clone(&self.runs),
                Arc::clone(def),
                self.tz,
                token.clone(),
            ));
            info!({ job, cron = def.schedule.as_str(), tz = %self.tz }, "trigger installed");
            self.triggers.push(Trigger {
                name: def.name.clone(),
                token,
                handle,
            });
        }
        self.triggers.len()
    }

    /// Cancels every trigger and waits for them to wind down. A run already in
    /// progress finishes first. Safe to call when nothing is running.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            debug!("not running");
            return;
        }
        for trigger in &self.triggers {
            trigger.token.cancel();
        }
        for trigger in self.triggers.drain(..) {
            if let Err(err) = trigger.handle.await {
                error!({ job = trigger.name }, "trigger join error {:?}", err);
            }
        }
        info!("stop");
    }

    /// Fires a registered job right away through the same retry wrapper.
    #[cfg(test)]
    pub async fn trigger(&self, name: &str) -> Result<jobrunner::JobOutcome, Error> {
        let def = self
            .definitions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::EntityNotFound("job", name.to_owned()))?;
        Ok(jobrunner::job_run(self.runs.as_ref(), def, ScheduledBy::Scheduler).await)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for trigger in &self.triggers {
            trigger.token.cancel();
        }
    }
}

async fn run_trigger(
    runs: Arc<dyn RunLogStore>,
    def: Arc<JobDefinition>,
    tz: Tz,
    token: CancellationToken,
) {
    let job = def.name.as_str();
    loop {
        let now = Utc::now();
        let Some(next_at) = def.schedule.next(now, tz) else {
            warn!({ job }, "no upcoming fire time");
            break;
        };
        let wait = (next_at - now).to_std().unwrap_or_default();
        trace!({ job, next_at = %next_at }, "wait");
        select!(
            biased;
            _ = token.cancelled() => break,
            _ = time::sleep(wait) => {},
        );
        jobrunner::job_run(runs.as_ref(), &def, ScheduledBy::Scheduler).await;
    }
    debug!({ job }, "trigger stopped");
}

/// Reads the daily fortune update time from settings. Anything missing,
/// malformed or unreadable falls back to the default time.
pub async fn resolve_fortune_schedule(settings: &dyn SettingsStore) -> JobSchedule {
    let value = match settings.get_setting(FORTUNE_UPDATE_TIME_KEY).await {
        Ok(value) => value,
        Err(err) => {
            warn!({ key = FORTUNE_UPDATE_TIME_KEY }, "settings error {:?}", err);
            None
        }
    };
    let Some(value) = value else {
        info!({ key = FORTUNE_UPDATE_TIME_KEY, fallback = DEFAULT_DAILY_TIME }, "not set");
        return JobSchedule::daily_default();
    };
    match JobSchedule::from_daily_time(&value) {
        Ok(schedule) => schedule,
        Err(_) => {
            warn!({ key = FORTUNE_UPDATE_TIME_KEY, value, fallback = DEFAULT_DAILY_TIME }, "invalid time");
            JobSchedule::daily_default()
        }
    }
}

pub fn calendar_definition(
    generator: Arc<CalendarGenerator>,
    options: &CalendarJobOptions,
) -> JobDefinition {
    let days = options.days;
    JobDefinition::new(
        JobType::CalendarGenerator.as_str(),
        JobType::CalendarGenerator,
        options.cron.clone(),
        move |_| {
            let generator = Arc::clone(&generator);
            async move {
                let summary = generator.generate(days, ScheduledBy::Scheduler).await?;
                Ok(serde_json::to_value(summary)?)
            }
        },
    )
    .with_retry(options.retry)
    .with_enabled(options.enabled)
}

/// A fatal refresh comes back as an error so that the retry policy applies to it.
pub fn fortune_definition(
    refresher: Arc<FortuneRefreshJob>,
    options: &FortuneJobOptions,
    schedule: JobSchedule,
) -> JobDefinition {
    let page_size = options.page_size;
    let max_concurrent = options.max_concurrent;
    JobDefinition::new(
        JobType::FortuneUpdate.as_str(),
        JobType::FortuneUpdate,
        schedule,
        move |attempt| {
            let refresher = Arc::clone(&refresher);
            async move {
                let summary = refresher
                    .refresh(RefreshRequest {
                        force_update: false,
                        target_date: None,
                        page_size,
                        max_concurrent,
                        requested_by: ScheduledBy::Scheduler,
                        is_automatic_retry: attempt.is_retry(),
                    })
                    .await?;
                if !summary.success {
                    return Err(Error::JobFailed(summary.message));
                }
                Ok(serde_json::json!({
                    "message": summary.message,
                    "date": summary.date,
                    "total_users": summary.total_users,
                    "success_count": summary.success_count,
                    "failed_count": summary.failed_count,
                }))
            }
        },
    )
    .with_retry(options.retry)
    .with_enabled(options.enabled)
}
