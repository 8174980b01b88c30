//! In-memory stores used by the test suites. Status updates follow the same
//! forward-only guard as the SQL implementation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{CalendarStore, RunLogStore, SettingsStore, UserDirectory};
use crate::models::{
    CalendarEntry, CalendarEntryCreate, Error, FortuneProgress, FortuneRunCreate, FortuneRunRow,
    ItemError, JobRunCreate, JobRunRow, RunProgress, RunStatus, UserId,
};

#[derive(Debug, Default)]
struct Inner {
    runs: Vec<JobRunRow>,
    fortune_runs: Vec<FortuneRunRow>,
    calendar: BTreeMap<NaiveDate, CalendarEntry>,
    settings: HashMap<String, String>,
    users: BTreeSet<UserId>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    users_unavailable: AtomicBool,
    pages_before_failure: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_active_users(&self, ids: impl IntoIterator<Item = UserId>) {
        self.inner.write().await.users.extend(ids);
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        self.inner
            .write()
            .await
            .settings
            .insert(key.to_owned(), value.to_owned());
    }

    /// Makes every user directory call fail, as if the database were unreachable.
    pub fn set_users_unavailable(&self, unavailable: bool) {
        self.users_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Serves `pages` user pages, then fails every later page request.
    pub fn fail_pages_after(&self, pages: usize) {
        if let Ok(mut left) = self.pages_before_failure.lock() {
            *left = Some(pages);
        }
    }

    pub async fn calendar_dates(&self) -> Vec<NaiveDate> {
        self.inner.read().await.calendar.keys().copied().collect()
    }

    pub async fn runs(&self) -> Vec<JobRunRow> {
        self.inner.read().await.runs.clone()
    }

    pub async fn fortune_runs(&self) -> Vec<FortuneRunRow> {
        self.inner.read().await.fortune_runs.clone()
    }

    fn check_users(&self) -> Result<(), Error> {
        if self.users_unavailable.load(Ordering::SeqCst) {
            return Err(Error::DbError(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn take_page(&self) -> Result<(), Error> {
        let mut left = self
            .pages_before_failure
            .lock()
            .map_err(|_| Error::DbError(sqlx::Error::PoolClosed))?;
        match left.as_mut() {
            Some(0) => Err(Error::DbError(sqlx::Error::PoolTimedOut)),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn accepts(current: &str, next: RunStatus) -> bool {
    next.predecessors().iter().any(|s| s.as_str() == current)
}

fn is_open(current: &str) -> bool {
    RunStatus::OPEN.iter().any(|s| s.as_str() == current)
}

fn apply_fortune_progress(row: &mut FortuneRunRow, progress: &FortuneProgress) {
    let total = progress.total_users.unwrap_or(row.total_users);
    row.success_count = row.success_count.max(progress.success_count);
    row.failed_count = row.failed_count.max(progress.failed_count);
    row.total_users = total.max(row.success_count + row.failed_count);
    row.update_errors.extend(progress.errors.iter().cloned());
}

#[async_trait]
impl RunLogStore for MemoryStore {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn create_run(&self, run: JobRunCreate) -> Result<i64, Error> {
        let mut inner = self.inner.write().await;
        let id = inner.runs.len() as i64 + 1;
        inner.runs.push(JobRunRow {
            id,
            job_type: run.job_type.as_str().to_owned(),
            status: run.status.as_str().to_owned(),
            start_time: Utc::now(),
            end_time: None,
            total_items: run.total_items,
            processed_items: 0,
            error_items: 0,
            error_list: Vec::new(),
            params: run.params,
            scheduled_by: run.scheduled_by.to_string(),
            result: None,
        });
        Ok(id)
    }

    async fn set_run_status(&self, id: i64, status: RunStatus) -> Result<u64, Error> {
        let mut inner = self.inner.write().await;
        match inner.runs.iter_mut().find(|r| r.id == id) {
            Some(row) if accepts(&row.status, status) => {
                row.status = status.as_str().to_owned();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_run_progress(&self, id: i64, progress: &RunProgress) -> Result<u64, Error> {
        let mut inner = self.inner.write().await;
        match inner.runs.iter_mut().find(|r| r.id == id) {
            Some(row) if is_open(&row.status) => {
                if let Some(total) = progress.total_items {
                    row.total_items = total;
                }
                row.processed_items = row.processed_items.max(progress.processed_items);
                row.error_items = row.error_items.max(progress.error_items);
                row.error_list.extend(progress.errors.iter().cloned());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        result: serde_json::Value,
        errors: &[ItemError],
    ) -> Result<u64, Error> {
        let mut inner = self.inner.write().await;
        match inner.runs.iter_mut().find(|r| r.id == id) {
            Some(row) if accepts(&row.status, status) => {
                row.status = status.as_str().to_owned();
                row.end_time = Some(Utc::now());
                row.result = Some(result);
                row.error_list.extend(errors.iter().cloned());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn get_run(&self, id: i64) -> Result<Option<JobRunRow>, Error> {
        Ok(self.inner.read().await.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list_runs(&self, limit: i32, offset: i32) -> Result<Vec<JobRunRow>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .runs
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn create_fortune_run(&self, run: FortuneRunCreate) -> Result<i64, Error> {
        let mut inner = self.inner.write().await;
        let id = inner.fortune_runs.len() as i64 + 1;
        inner.fortune_runs.push(FortuneRunRow {
            id,
            job_run_id: run.job_run_id,
            date: run.date,
            status: RunStatus::Running.as_str().to_owned(),
            start_time: Utc::now(),
            end_time: None,
            total_users: 0,
            success_count: 0,
            failed_count: 0,
            is_automatic_retry: run.is_automatic_retry,
            created_by: run.created_by.to_string(),
            update_errors: Vec::new(),
        });
        Ok(id)
    }

    async fn update_fortune_progress(
        &self,
        id: i64,
        progress: &FortuneProgress,
    ) -> Result<u64, Error> {
        let mut inner = self.inner.write().await;
        match inner.fortune_runs.iter_mut().find(|r| r.id == id) {
            Some(row) if is_open(&row.status) => {
                apply_fortune_progress(row, progress);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn finish_fortune_run(
        &self,
        id: i64,
        status: RunStatus,
        progress: &FortuneProgress,
    ) -> Result<u64, Error> {
        let mut inner = self.inner.write().await;
        match inner.fortune_runs.iter_mut().find(|r| r.id == id) {
            Some(row) if accepts(&row.status, status) => {
                apply_fortune_progress(row, progress);
                row.status = status.as_str().to_owned();
                row.end_time = Some(Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn get_fortune_run(&self, id: i64) -> Result<Option<FortuneRunRow>, Error> {
        Ok(self
            .inner
            .read()
            .await
            .fortune_runs
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_fortune_runs(&self, limit: i32, offset: i32) -> Result<Vec<FortuneRunRow>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .fortune_runs
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CalendarStore for MemoryStore {
    async fn find_entry(&self, date: NaiveDate) -> Result<Option<CalendarEntry>, Error> {
        Ok(self.inner.read().await.calendar.get(&date).cloned())
    }

    async fn insert_entry(&self, entry: &CalendarEntryCreate) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        if inner.calendar.contains_key(&entry.date) {
            return Ok(false);
        }
        inner.calendar.insert(
            entry.date,
            CalendarEntry {
                date: entry.date,
                heavenly_stem: entry.pillar.heavenly_stem.clone(),
                earthly_branch: entry.pillar.earthly_branch.clone(),
                hidden_stems: entry.pillar.hidden_stems.clone(),
                energy_description: entry.pillar.energy_description.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.settings.get(key).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn count_active(&self) -> Result<i64, Error> {
        self.check_users()?;
        Ok(self.inner.read().await.users.len() as i64)
    }

    async fn page_active(&self, after: Option<UserId>, limit: i64) -> Result<Vec<UserId>, Error> {
        self.check_users()?;
        self.take_page()?;
        let inner = self.inner.read().await;
        let ids = match after {
            Some(after) => inner
                .users
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .take(limit.max(0) as usize)
                .copied()
                .collect(),
            None => inner.users.iter().take(limit.max(0) as usize).copied().collect(),
        };
        Ok(ids)
    }
}

#[tokio::test]
async fn memory_store_rejects_reopening_finished_run() -> anyhow::Result<()> {
    use crate::models::{JobType, ScheduledBy};

    // arrange
    let store = MemoryStore::new();
    let id = store
        .create_run(JobRunCreate {
            job_type: JobType::Backup,
            status: RunStatus::Started,
            params: serde_json::json!({}),
            scheduled_by: ScheduledBy::Scheduler,
            total_items: 0,
        })
        .await?;
    store
        .finish_run(id, RunStatus::Completed, serde_json::json!({}), &[])
        .await?;

    // act
    let reopened = store.set_run_status(id, RunStatus::Running).await?;
    let refinished = store
        .finish_run(id, RunStatus::Failed, serde_json::json!({}), &[])
        .await?;
    let progressed = store
        .update_run_progress(id, &RunProgress { processed_items: 5, ..Default::default() })
        .await?;

    // assert
    assert_eq!((0, 0, 0), (reopened, refinished, progressed));
    let row = store.get_run(id).await?.unwrap();
    assert_eq!("completed", row.status);
    assert_eq!(0, row.processed_items);
    Ok(())
}
