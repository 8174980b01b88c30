use axum::http::StatusCode;
use problemdetails::Problem;
use tokio::time::error::Elapsed;

// region:    Error
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Entity Not Found - {0}[{1}]")]
    EntityNotFound(&'static str, String),

    #[error(transparent)]
    Timeout(#[from] Elapsed),

    #[error(transparent)]
    DbError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    HttpError(#[from] axum::http::Error),

    #[error(transparent)]
    HyperError(#[from] hyper::Error),

    #[error(transparent)]
    HyperClientError(#[from] hyper_util::client::legacy::Error),

    #[error("Invalid Params - {0}")]
    InvalidParams(&'static str),

    #[error("Invalid Config - {0}")]
    InvalidConfig(String),

    #[error("Pillar Error - {0}")]
    PillarError(String),

    #[error("Fortune Service Error - {0}")]
    FortuneServiceError(StatusCode),

    #[error("Job Failed - {0}")]
    JobFailed(String),
}
// endregion: Error

impl From<Error> for Problem {
    fn from(item: Error) -> Problem {
        match item {
            Error::InvalidParams(_) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title(StatusCode::BAD_REQUEST.to_string())
                .with_detail(item.to_string()),
            Error::EntityNotFound(..) | Error::DbError(sqlx::Error::RowNotFound) => {
                problemdetails::new(StatusCode::NOT_FOUND)
                    .with_title(StatusCode::NOT_FOUND.to_string())
                    .with_detail(item.to_string())
            }
            _ => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_title(StatusCode::INTERNAL_SERVER_ERROR.to_string())
                .with_detail(item.to_string())
                .with_instance(format!("{:?}", item)),
        }
    }
}
