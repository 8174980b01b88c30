use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use crate::models::{
    CalendarEntry, CalendarEntryCreate, Error, FortuneProgress, FortuneRunCreate, FortuneRunRow,
    ItemError, JobRunCreate, JobRunRow, RunProgress, RunStatus, UserId,
};

pub mod calendar;
pub mod runs;
pub mod settings;
pub mod users;

#[cfg(test)]
pub mod memory;

pub async fn select_one(pool: &Pool<Postgres>) -> Result<(), Error> {
    _ = sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Audit trail of batch executions: generic job runs and fortune update runs.
///
/// Every mutating call returns the number of affected records. Updates against a
/// run that already reached a terminal status affect nothing.
#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn ping(&self) -> Result<(), Error>;

    async fn create_run(&self, run: JobRunCreate) -> Result<i64, Error>;
    async fn set_run_status(&self, id: i64, status: RunStatus) -> Result<u64, Error>;
    async fn update_run_progress(&self, id: i64, progress: &RunProgress) -> Result<u64, Error>;
    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        result: serde_json::Value,
        errors: &[ItemError],
    ) -> Result<u64, Error>;
    async fn get_run(&self, id: i64) -> Result<Option<JobRunRow>, Error>;
    async fn list_runs(&self, limit: i32, offset: i32) -> Result<Vec<JobRunRow>, Error>;

    async fn create_fortune_run(&self, run: FortuneRunCreate) -> Result<i64, Error>;
    async fn update_fortune_progress(
        &self,
        id: i64,
        progress: &FortuneProgress,
    ) -> Result<u64, Error>;
    async fn finish_fortune_run(
        &self,
        id: i64,
        status: RunStatus,
        progress: &FortuneProgress,
    ) -> Result<u64, Error>;
    async fn get_fortune_run(&self, id: i64) -> Result<Option<FortuneRunRow>, Error>;
    async fn list_fortune_runs(&self, limit: i32, offset: i32) -> Result<Vec<FortuneRunRow>, Error>;
}

#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn find_entry(&self, date: NaiveDate) -> Result<Option<CalendarEntry>, Error>;
    /// `false` when an entry for the date already exists.
    async fn insert_entry(&self, entry: &CalendarEntryCreate) -> Result<bool, Error>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>, Error>;
}

/// Directory of users eligible for daily processing, in ascending id order.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn count_active(&self) -> Result<i64, Error>;
    async fn page_active(&self, after: Option<UserId>, limit: i64) -> Result<Vec<UserId>, Error>;
}

#[derive(Clone)]
pub struct Stores {
    pub runs: Arc<dyn RunLogStore>,
    pub calendar: Arc<dyn CalendarStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        let store = Arc::new(PgStore { pool });
        Stores {
            runs: store.clone(),
            calendar: store.clone(),
            settings: store.clone(),
            users: store,
        }
    }

    #[cfg(test)]
    pub fn memory(store: Arc<memory::MemoryStore>) -> Self {
        Stores {
            runs: store.clone(),
            calendar: store.clone(),
            settings: store.clone(),
            users: store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

fn status_names(statuses: &[RunStatus]) -> Vec<&'static str> {
    statuses.iter().map(RunStatus::as_str).collect()
}
