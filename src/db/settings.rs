use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use super::{PgStore, SettingsStore};
use crate::models::Error;

pub async fn get_by_key(pool: &Pool<Postgres>, key: &str) -> Result<Option<String>, Error> {
    const SQL: &str = "SELECT value FROM settings WHERE key = $1";
    let value = sqlx::query_scalar::<_, String>(SQL)
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>, Error> {
        get_by_key(&self.pool, key).await
    }
}
