use crate::models::{AppState, Error, UserId};
use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json,
    Router,
};
use chrono::NaiveDate;
use problemdetails::Problem;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/jobs/calendar-generator/run", post(run_calendar))
        .route("/jobs/fortune-update/run", post(run_fortune))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct CalendarRunParams {
    days: Option<u32>,
    requested_by: Option<UserId>,
}

#[derive(Debug, Default, Deserialize)]
struct FortuneRunParams {
    target_date: Option<NaiveDate>,
    force_update: Option<bool>,
    requested_by: Option<UserId>,
}

/// An empty body means all defaults; anything else must be a valid parameter object.
fn parse_params<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        warn!("invalid run params {:?}", err);
        Error::InvalidParams("body")
    })
}

#[derive(Debug, Serialize)]
struct RunAccepted {
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    fortune_run_id: Option<i64>,
    status: &'static str,
}

async fn run_calendar(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    let params: CalendarRunParams = parse_params(&body)?;
    let days = params.days.unwrap_or(state.options.calendar.days);
    let launched = state
        .launcher
        .run_calendar_now(days, params.requested_by)
        .await?;
    info!({ run_id = launched.run_id, days }, "calendar run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            id: launched.run_id,
            fortune_run_id: None,
            status: launched.status.as_str(),
        }),
    ))
}

async fn run_fortune(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    let params: FortuneRunParams = parse_params(&body)?;
    let launched = state
        .launcher
        .run_fortune_now(
            params.target_date,
            params.force_update.unwrap_or(false),
            params.requested_by,
        )
        .await?;
    info!({ run_id = launched.run_id, fortune_run_id = launched.fortune_run_id }, "fortune run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            id: launched.run_id,
            fortune_run_id: launched.fortune_run_id,
            status: launched.status.as_str(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{memory::MemoryStore, RunLogStore},
        handlers::testing,
        services::testing::RecordingFortunes,
    };
    use axum::{body::Body, http::Request};
    use std::time::Duration;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn wait_finished(store: &MemoryStore, id: i64) -> anyhow::Result<String> {
        for _ in 0..100 {
            let run = store.get_run(id).await?.unwrap();
            if run.end_time.is_some() {
                return Ok(run.status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!("run {id} did not finish")
    }

    #[tokio::test]
    async fn run_calendar_accepts_and_returns_run_id() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        let app = routes(testing::state(&store, Arc::new(RecordingFortunes::new())));

        // act
        let response = app
            .oneshot(post_json("/jobs/calendar-generator/run", r#"{"days":3,"requested_by":5}"#))
            .await?;

        // assert
        assert_eq!(StatusCode::ACCEPTED, response.status());
        let body = testing::body_json(response).await;
        assert_eq!(1, body["id"]);
        assert_eq!("running", body["status"]);
        assert_eq!("completed", wait_finished(&store, 1).await?);
        assert_eq!(3, store.calendar_dates().await.len());
        Ok(())
    }

    #[tokio::test]
    async fn run_with_malformed_params_is_bad_request() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        let app = routes(testing::state(&store, Arc::new(RecordingFortunes::new())));

        // act
        let bad_days = app
            .clone()
            .oneshot(post_json("/jobs/calendar-generator/run", r#"{"days":"three"}"#))
            .await?;
        let bad_date = app
            .clone()
            .oneshot(post_json(
                "/jobs/fortune-update/run",
                r#"{"target_date":"2026-13-45","force_update":true}"#,
            ))
            .await?;
        let not_json = app
            .oneshot(post_json("/jobs/fortune-update/run", "force"))
            .await?;

        // assert
        assert_eq!(StatusCode::BAD_REQUEST, bad_days.status());
        assert_eq!(StatusCode::BAD_REQUEST, bad_date.status());
        assert_eq!(StatusCode::BAD_REQUEST, not_json.status());
        assert!(store.runs().await.is_empty());
        assert!(store.fortune_runs().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn run_calendar_rejects_too_many_days() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        let app = routes(testing::state(&store, Arc::new(RecordingFortunes::new())));

        // act
        let response = app
            .oneshot(post_json("/jobs/calendar-generator/run", r#"{"days":4000000000}"#))
            .await?;

        // assert
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert!(store.runs().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn run_fortune_without_body_uses_defaults() -> anyhow::Result<()> {
        // arrange
        let store = Arc::new(MemoryStore::new());
        store.add_active_users([1, 2, 3]).await;
        let fortunes = Arc::new(RecordingFortunes::new());
        let app = routes(testing::state(&store, fortunes.clone()));

        // act
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/fortune-update/run")
                    .body(Body::empty())?,
            )
            .await?;

        // assert
        assert_eq!(StatusCode::ACCEPTED, response.status());
        let body = testing::body_json(response).await;
        assert_eq!(1, body["fortune_run_id"]);
        let id = body["id"].as_i64().unwrap();
        assert_eq!("completed", wait_finished(&store, id).await?);
        assert!(fortunes.calls().await.iter().all(|(_, _, force)| !force));
        Ok(())
    }
}
