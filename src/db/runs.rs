use async_trait::async_trait;
use sqlx::{types::Json, Pool, Postgres};

use super::{status_names, PgStore, RunLogStore};
use crate::models::{
    Error, FortuneProgress, FortuneRunCreate, FortuneRunRow, ItemError, JobRunCreate, JobRunRow,
    RunProgress, RunStatus,
};

pub async fn create(pool: &Pool<Postgres>, run: JobRunCreate) -> Result<i64, Error> {
    const SQL: &str = "INSERT INTO job_runs(job_type, status, params, scheduled_by, total_items)
    VALUES ($1, $2, $3, $4, $5) RETURNING id";
    let id = sqlx::query_scalar::<_, i64>(SQL)
        .bind(run.job_type.as_str())
        .bind(run.status.as_str())
        .bind(Json(&run.params))
        .bind(run.scheduled_by.to_string())
        .bind(run.total_items)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn set_status(pool: &Pool<Postgres>, id: i64, status: RunStatus) -> Result<u64, Error> {
    const SQL: &str = "UPDATE job_runs SET status = $2 WHERE id = $1 AND status = ANY($3)";
    let res = sqlx::query(SQL)
        .bind(id)
        .bind(status.as_str())
        .bind(status_names(status.predecessors()))
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn update_progress(
    pool: &Pool<Postgres>,
    id: i64,
    progress: &RunProgress,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE job_runs SET
        total_items = COALESCE($2, total_items),
        processed_items = GREATEST(processed_items, $3),
        error_items = GREATEST(error_items, $4),
        error_list = error_list || $5
    WHERE id = $1 AND status = ANY($6)";
    let res = sqlx::query(SQL)
        .bind(id)
        .bind(progress.total_items)
        .bind(progress.processed_items)
        .bind(progress.error_items)
        .bind(Json(&progress.errors))
        .bind(status_names(&RunStatus::OPEN))
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn finish(
    pool: &Pool<Postgres>,
    id: i64,
    status: RunStatus,
    result: serde_json::Value,
    errors: &[ItemError],
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE job_runs SET
        status = $2,
        end_time = now(),
        result = $3,
        error_list = error_list || $4
    WHERE id = $1 AND status = ANY($5)";
    let res = sqlx::query(SQL)
        .bind(id)
        .bind(status.as_str())
        .bind(Json(&result))
        .bind(Json(errors))
        .bind(status_names(status.predecessors()))
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn get_by_id(pool: &Pool<Postgres>, id: i64) -> Result<Option<JobRunRow>, Error> {
    const SQL: &str = "SELECT * FROM job_runs WHERE id = $1";
    let row = sqlx::query_as::<_, JobRunRow>(SQL)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_all(pool: &Pool<Postgres>, limit: i32, offset: i32) -> Result<Vec<JobRunRow>, Error> {
    const SQL: &str = "SELECT * FROM job_runs ORDER BY id DESC LIMIT $1 OFFSET $2";
    let rows = sqlx::query_as::<_, JobRunRow>(SQL)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn create_fortune(pool: &Pool<Postgres>, run: FortuneRunCreate) -> Result<i64, Error> {
    const SQL: &str = "INSERT INTO fortune_update_runs(job_run_id, date, status, is_automatic_retry, created_by)
    VALUES ($1, $2, $3, $4, $5) RETURNING id";
    let id = sqlx::query_scalar::<_, i64>(SQL)
        .bind(run.job_run_id)
        .bind(run.date)
        .bind(RunStatus::Running.as_str())
        .bind(run.is_automatic_retry)
        .bind(run.created_by.to_string())
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn update_fortune_progress(
    pool: &Pool<Postgres>,
    id: i64,
    progress: &FortuneProgress,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE fortune_update_runs SET
        total_users = GREATEST(COALESCE($2, total_users), $3 + $4),
        success_count = GREATEST(success_count, $3),
        failed_count = GREATEST(failed_count, $4),
        update_errors = update_errors || $5
    WHERE id = $1 AND status = ANY($6)";
    let res = sqlx::query(SQL)
        .bind(id)
        .bind(progress.total_users)
        .bind(progress.success_count)
        .bind(progress.failed_count)
        .bind(Json(&progress.errors))
        .bind(status_names(&RunStatus::OPEN))
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn finish_fortune(
    pool: &Pool<Postgres>,
    id: i64,
    status: RunStatus,
    progress: &FortuneProgress,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE fortune_update_runs SET
        status = $2,
        end_time = now(),
        total_users = GREATEST(COALESCE($3, total_users), $4 + $5),
        success_count = GREATEST(success_count, $4),
        failed_count = GREATEST(failed_count, $5),
        update_errors = update_errors || $6
    WHERE id = $1 AND status = ANY($7)";
    let res = sqlx::query(SQL)
        .bind(id)
        .bind(status.as_str())
        .bind(progress.total_users)
        .bind(progress.success_count)
        .bind(progress.failed_count)
        .bind(Json(&progress.errors))
        .bind(status_names(status.predecessors()))
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn get_fortune_by_id(pool: &Pool<Postgres>, id: i64) -> Result<Option<FortuneRunRow>, Error> {
    const SQL: &str = "SELECT * FROM fortune_update_runs WHERE id = $1";
    let row = sqlx::query_as::<_, FortuneRunRow>(SQL)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_all_fortune(
    pool: &Pool<Postgres>,
    limit: i32,
    offset: i32,
) -> Result<Vec<FortuneRunRow>, Error> {
    const SQL: &str = "SELECT * FROM fortune_update_runs ORDER BY id DESC LIMIT $1 OFFSET $2";
    let rows = sqlx::query_as::<_, FortuneRunRow>(SQL)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[async_trait]
impl RunLogStore for PgStore {
    async fn ping(&self) -> Result<(), Error> {
        super::select_one(&self.pool).await
    }

    async fn create_run(&self, run: JobRunCreate) -> Result<i64, Error> {
        create(&self.pool, run).await
    }

    async fn set_run_status(&self, id: i64, status: RunStatus) -> Result<u64, Error> {
        set_status(&self.pool, id, status).await
    }

    async fn update_run_progress(&self, id: i64, progress: &RunProgress) -> Result<u64, Error> {
        update_progress(&self.pool, id, progress).await
    }

    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        result: serde_json::Value,
        errors: &[ItemError],
    ) -> Result<u64, Error> {
        finish(&self.pool, id, status, result, errors).await
    }

    async fn get_run(&self, id: i64) -> Result<Option<JobRunRow>, Error> {
        get_by_id(&self.pool, id).await
    }

    async fn list_runs(&self, limit: i32, offset: i32) -> Result<Vec<JobRunRow>, Error> {
        get_all(&self.pool, limit, offset).await
    }

    async fn create_fortune_run(&self, run: FortuneRunCreate) -> Result<i64, Error> {
        create_fortune(&self.pool, run).await
    }

    async fn update_fortune_progress(
        &self,
        id: i64,
        progress: &FortuneProgress,
    ) -> Result<u64, Error> {
        update_fortune_progress(&self.pool, id, progress).await
    }

    async fn finish_fortune_run(
        &self,
        id: i64,
        status: RunStatus,
        progress: &FortuneProgress,
    ) -> Result<u64, Error> {
        finish_fortune(&self.pool, id, status, progress).await
    }

    async fn get_fortune_run(&self, id: i64) -> Result<Option<FortuneRunRow>, Error> {
        get_fortune_by_id(&self.pool, id).await
    }

    async fn list_fortune_runs(&self, limit: i32, offset: i32) -> Result<Vec<FortuneRunRow>, Error> {
        get_all_fortune(&self.pool, limit, offset).await
    }
}
