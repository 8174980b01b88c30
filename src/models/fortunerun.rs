use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::{ItemError, ScheduledBy};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FortuneRunRow {
    pub id: i64,
    pub job_run_id: Option<i64>,
    pub date: NaiveDate,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_users: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub is_automatic_retry: bool,
    pub created_by: String,
    #[sqlx(json)]
    pub update_errors: Vec<ItemError>,
}

#[derive(Debug, Clone)]
pub struct FortuneRunCreate {
    pub job_run_id: Option<i64>,
    pub date: NaiveDate,
    pub is_automatic_retry: bool,
    pub created_by: ScheduledBy,
}

/// Checkpoint of a fortune run. `total_users` is raised, never lowered, so that
/// `success_count + failed_count <= total_users` holds at every observation.
#[derive(Debug, Clone, Default)]
pub struct FortuneProgress {
    pub total_users: Option<i32>,
    pub success_count: i32,
    pub failed_count: i32,
    pub errors: Vec<ItemError>,
}
