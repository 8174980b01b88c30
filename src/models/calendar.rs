use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Day pillar produced by the calculation engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pillar {
    pub heavenly_stem: String,
    pub earthly_branch: String,
    pub hidden_stems: Vec<String>,
    pub energy_description: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub heavenly_stem: String,
    pub earthly_branch: String,
    pub hidden_stems: Vec<String>,
    pub energy_description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CalendarEntryCreate {
    pub date: NaiveDate,
    pub pillar: Pillar,
}
