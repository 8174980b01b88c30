use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use super::{CalendarStore, PgStore};
use crate::models::{CalendarEntry, CalendarEntryCreate, Error};

pub async fn get_by_date(pool: &Pool<Postgres>, date: NaiveDate) -> Result<Option<CalendarEntry>, Error> {
    const SQL: &str = "SELECT * FROM calendar_entries WHERE date = $1";
    let row = sqlx::query_as::<_, CalendarEntry>(SQL)
        .bind(date)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Duplicate dates are rejected by the primary key and reported as `false`.
pub async fn insert(pool: &Pool<Postgres>, entry: &CalendarEntryCreate) -> Result<bool, Error> {
    const SQL: &str = "INSERT INTO calendar_entries(date, heavenly_stem, earthly_branch, hidden_stems, energy_description)
    VALUES ($1, $2, $3, $4, $5) ON CONFLICT (date) DO NOTHING";
    let res = sqlx::query(SQL)
        .bind(entry.date)
        .bind(&entry.pillar.heavenly_stem)
        .bind(&entry.pillar.earthly_branch)
        .bind(&entry.pillar.hidden_stems)
        .bind(&entry.pillar.energy_description)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[async_trait]
impl CalendarStore for PgStore {
    async fn find_entry(&self, date: NaiveDate) -> Result<Option<CalendarEntry>, Error> {
        get_by_date(&self.pool, date).await
    }

    async fn insert_entry(&self, entry: &CalendarEntryCreate) -> Result<bool, Error> {
        insert(&self.pool, entry).await
    }
}
