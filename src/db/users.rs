use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use super::{PgStore, UserDirectory};
use crate::models::{Error, UserId};

pub async fn count_active(pool: &Pool<Postgres>) -> Result<i64, Error> {
    const SQL: &str = "SELECT count(*) FROM users WHERE is_active";
    let count = sqlx::query_scalar::<_, i64>(SQL).fetch_one(pool).await?;
    Ok(count)
}

/// Keyset page: ids strictly greater than `after`, ascending.
pub async fn page_active(
    pool: &Pool<Postgres>,
    after: Option<UserId>,
    limit: i64,
) -> Result<Vec<UserId>, Error> {
    const SQL: &str = "SELECT id FROM users WHERE is_active AND id > $1 ORDER BY id LIMIT $2";
    let ids = sqlx::query_scalar::<_, i64>(SQL)
        .bind(after.unwrap_or(i64::MIN))
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn count_active(&self) -> Result<i64, Error> {
        count_active(&self.pool).await
    }

    async fn page_active(&self, after: Option<UserId>, limit: i64) -> Result<Vec<UserId>, Error> {
        page_active(&self.pool, after, limit).await
    }
}
