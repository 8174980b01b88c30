use crate::models::{AppState, Error};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use problemdetails::Problem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", get(get_runs))
        .route("/runs/:id", get(get_run))
        .route("/fortune-runs", get(get_fortune_runs))
        .route("/fortune-runs/:id", get(get_fortune_run))
        .route("/calendar/:date", get(get_calendar_entry))
        .with_state(state)
}

async fn get_runs(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, Problem> {
    let (limit, offset) = pagination.bounds();
    let result = state.stores.runs.list_runs(limit, offset).await?;
    Ok(Json(PaginationResult { limit, offset, result }))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, Problem> {
    let run = state
        .stores
        .runs
        .get_run(id)
        .await?
        .ok_or_else(|| Error::EntityNotFound("job_run", id.to_string()))?;
    Ok(Json(run))
}

async fn get_fortune_runs(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, Problem> {
    let (limit, offset) = pagination.bounds();
    let result = state.stores.runs.list_fortune_runs(limit, offset).await?;
    Ok(Json(PaginationResult { limit, offset, result }))
}

async fn get_fortune_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, Problem> {
    let run = state
        .stores
        .runs
        .get_fortune_run(id)
        .await?
        .ok_or_else(|| Error::EntityNotFound("fortune_update_run", id.to_string()))?;
    Ok(Json(run))
}

async fn get_calendar_entry(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Result<impl IntoResponse, Problem> {
    let entry = state
        .stores
        .calendar
        .find_entry(date)
        .await?
        .ok_or_else(|| Error::EntityNotFound("calendar_entry", date.to_string()))?;
    Ok(Json(entry))
}

#[derive(Deserialize)]
struct Pagination {
    limit: Option<i32>,
    offset: Option<i32>,
}

impl Pagination {
    fn bounds(&self) -> (i32, i32) {
        (
            self.limit.unwrap_or(10).clamp(1, 100),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[derive(Serialize)]
struct PaginationResult<T> {
    limit: i32,
    offset: i32,
    result: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory::MemoryStore, handlers::testing, models::ScheduledBy,
        services::testing::RecordingFortunes,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn runs_are_listed_newest_first() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        let state = testing::state(&store, Arc::new(RecordingFortunes::new()));
        let calendar = state.launcher.calendar();
        calendar.generate(1, ScheduledBy::Scheduler).await?;
        calendar.generate(2, ScheduledBy::Admin(None)).await?;
        let app = routes(state);

        // act
        let response = app.oneshot(get("/runs?limit=1")).await?;

        // assert
        assert_eq!(StatusCode::OK, response.status());
        let body = testing::body_json(response).await;
        assert_eq!(1, body["limit"]);
        assert_eq!(1, body["result"].as_array().unwrap().len());
        assert_eq!(2, body["result"][0]["id"]);
        assert_eq!("admin", body["result"][0]["scheduled_by"]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_run_is_not_found() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        let app = routes(testing::state(&store, Arc::new(RecordingFortunes::new())));

        // act
        let run = app.clone().oneshot(get("/runs/42")).await?;
        let fortune_run = app.oneshot(get("/fortune-runs/42")).await?;

        // assert
        assert_eq!(StatusCode::NOT_FOUND, run.status());
        assert_eq!(StatusCode::NOT_FOUND, fortune_run.status());
        Ok(())
    }

    #[tokio::test]
    async fn calendar_entry_is_served_by_date() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        let state = testing::state(&store, Arc::new(RecordingFortunes::new()));
        let calendar = state.launcher.calendar();
        calendar.generate(1, ScheduledBy::Scheduler).await?;
        let today = calendar.today();
        let app = routes(state);

        // act
        let found = app.clone().oneshot(get(&format!("/calendar/{today}"))).await?;
        let missing = app.oneshot(get("/calendar/1999-01-01")).await?;

        // assert
        assert_eq!(StatusCode::OK, found.status());
        let body = testing::body_json(found).await;
        assert_eq!(today.to_string(), body["date"]);
        assert!(body["heavenly_stem"].is_string());
        assert_eq!(StatusCode::NOT_FOUND, missing.status());
        Ok(())
    }
}
