use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::Full;
use hyper::{header::CONTENT_TYPE, Method};
use hyper_tls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;
use tokio::time;
use url::Url;

use super::collaborators::FortuneService;
use crate::models::{Error, UserId};

#[derive(Debug, Serialize)]
struct FortuneRequest {
    user_id: UserId,
    date: NaiveDate,
    force_update: bool,
}

/// Fortune service reached over HTTP: one JSON `POST` per user and day.
#[derive(Clone)]
pub struct HttpFortuneService {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    url: Url,
    timeout: Duration,
}

impl HttpFortuneService {
    pub fn new(url: Url, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpsConnector::new());
        Self {
            client,
            url,
            timeout,
        }
    }

    fn request(
        &self,
        user_id: UserId,
        date: NaiveDate,
        force_update: bool,
    ) -> Result<hyper::Request<Full<Bytes>>, Error> {
        let body = serde_json::to_vec(&FortuneRequest {
            user_id,
            date,
            force_update,
        })?;
        let req = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;
        Ok(req)
    }
}

#[async_trait]
impl FortuneService for HttpFortuneService {
    async fn generate_fortune(
        &self,
        user_id: UserId,
        date: NaiveDate,
        force_update: bool,
    ) -> Result<(), Error> {
        let req = self.request(user_id, date, force_update)?;
        // first '?' - timeout
        // second '?' - client error
        let response = time::timeout(self.timeout, self.client.request(req)).await??;
        let status_code = response.status();
        // drain the body so the connection can be reused
        http_body_util::BodyExt::collect(response.into_body()).await?;
        if !status_code.is_success() {
            return Err(Error::FortuneServiceError(status_code));
        }
        Ok(())
    }
}

#[tokio::test]
async fn fortune_request_is_json_post() -> anyhow::Result<()> {
    // arrange
    let service = HttpFortuneService::new(
        "http://fortunes.internal/api/daily".parse()?,
        Duration::from_secs(5),
    );
    let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

    // act
    let req = service.request(42, date, true)?;

    // assert
    assert_eq!(Method::POST, req.method());
    assert_eq!("/api/daily", req.uri().path());
    assert_eq!("application/json", req.headers()[CONTENT_TYPE]);
    let body = http_body_util::BodyExt::collect(req.into_body()).await?.to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(
        serde_json::json!({ "user_id": 42, "date": "2026-10-19", "force_update": true }),
        json
    );
    Ok(())
}
