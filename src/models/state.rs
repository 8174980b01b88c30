use dotenv::dotenv;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Error, JobRetry, JobSchedule};
use crate::{
    db::Stores,
    services::{
        CalendarGenerator, FortuneRefreshJob, FortuneService, HttpFortuneService, JobLauncher,
        PillarCalculator, SexagenaryCalculator, DEFAULT_CALENDAR_DAYS, DEFAULT_MAX_CONCURRENT,
        DEFAULT_PAGE_SIZE, MAX_CALENDAR_DAYS,
    },
};

pub const DEFAULT_HTTP_PORT: u16 = 8103;
pub const DEFAULT_TZ: chrono_tz::Tz = chrono_tz::Asia::Seoul;
pub const DEFAULT_CALENDAR_CRON: &str = "0 0 0 * * *";
pub const DEFAULT_JOB_RETRY: JobRetry = JobRetry::Fixed {
    retry_count: 3,
    retry_delay: 300,
};

pub struct AppState {
    pub instance_id: String,
    pub options: Options,
    pub stores: Stores,
    pub launcher: JobLauncher,
    pub shutdown_token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub database_url: String,
    pub http_port: u16,
    pub tz: chrono_tz::Tz,
    pub trace_stdout: bool,
    pub calendar: CalendarJobOptions,
    pub fortune: FortuneJobOptions,
    pub fortune_service: FortuneServiceOptions,
}

#[derive(Debug, Clone)]
pub struct CalendarJobOptions {
    pub enabled: bool,
    pub cron: JobSchedule,
    pub days: u32,
    pub retry: JobRetry,
}

impl Default for CalendarJobOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: JobSchedule::from_str(DEFAULT_CALENDAR_CRON)
                .unwrap_or_else(|_| JobSchedule::daily_default()),
            days: DEFAULT_CALENDAR_DAYS,
            retry: DEFAULT_JOB_RETRY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FortuneJobOptions {
    pub enabled: bool,
    pub retry: JobRetry,
    pub page_size: u32,
    pub max_concurrent: usize,
}

impl Default for FortuneJobOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: DEFAULT_JOB_RETRY,
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FortuneServiceOptions {
    pub url: Url,
    pub timeout: Duration,
}

impl Options {
    /// Reads `.env` and the process environment.
    pub fn from_env() -> Result<Options, Error> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Options, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let database_url =
            get("DATABASE_URL").ok_or_else(|| Error::InvalidConfig("DATABASE_URL must be set".into()))?;
        let fortune_url = get("FORTUNE_SERVICE_URL")
            .ok_or_else(|| Error::InvalidConfig("FORTUNE_SERVICE_URL must be set".into()))?;

        let calendar_defaults = CalendarJobOptions::default();
        let fortune_defaults = FortuneJobOptions::default();
        Ok(Options {
            database_url,
            http_port: parse_or(get("HTTP_PORT"), "HTTP_PORT", DEFAULT_HTTP_PORT)?,
            tz: parse_or(get("SCHEDULER_TZ"), "SCHEDULER_TZ", DEFAULT_TZ)?,
            trace_stdout: parse_flag(get("OTEL_STDOUT"), "OTEL_STDOUT", false)?,
            calendar: CalendarJobOptions {
                enabled: parse_flag(get("CALENDAR_JOB_ENABLED"), "CALENDAR_JOB_ENABLED", true)?,
                cron: parse_or(get("CALENDAR_CRON"), "CALENDAR_CRON", calendar_defaults.cron)?,
                days: parse_days(get("CALENDAR_DAYS"), calendar_defaults.days)?,
                retry: parse_or(get("CALENDAR_JOB_RETRY"), "CALENDAR_JOB_RETRY", calendar_defaults.retry)?,
            },
            fortune: FortuneJobOptions {
                enabled: parse_flag(get("FORTUNE_JOB_ENABLED"), "FORTUNE_JOB_ENABLED", true)?,
                retry: parse_or(get("FORTUNE_JOB_RETRY"), "FORTUNE_JOB_RETRY", fortune_defaults.retry)?,
                page_size: parse_or(get("FORTUNE_PAGE_SIZE"), "FORTUNE_PAGE_SIZE", fortune_defaults.page_size)?
                    .max(1),
                max_concurrent: parse_or(
                    get("FORTUNE_MAX_CONCURRENT"),
                    "FORTUNE_MAX_CONCURRENT",
                    fortune_defaults.max_concurrent,
                )?
                .max(1),
            },
            fortune_service: FortuneServiceOptions {
                url: Url::parse(&fortune_url)
                    .map_err(|_| Error::InvalidConfig(format!("FORTUNE_SERVICE_URL={fortune_url}")))?,
                timeout: Duration::from_millis(parse_or(
                    get("FORTUNE_SERVICE_TIMEOUT_MS"),
                    "FORTUNE_SERVICE_TIMEOUT_MS",
                    10_000,
                )?),
            },
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, Error> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{key}={v}"))),
    }
}

fn parse_days(value: Option<String>, default: u32) -> Result<u32, Error> {
    let days = parse_or(value, "CALENDAR_DAYS", default)?;
    if days > MAX_CALENDAR_DAYS {
        return Err(Error::InvalidConfig(format!(
            "CALENDAR_DAYS={days} exceeds {MAX_CALENDAR_DAYS}"
        )));
    }
    Ok(days)
}

fn parse_flag(value: Option<String>, key: &str, default: bool) -> Result<bool, Error> {
    match value.as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(Error::InvalidConfig(format!("{key}={v}"))),
    }
}

/// Names this process in `application_name`; an unreadable hostname is not fatal.
fn instance_id(hostname: std::io::Result<String>) -> String {
    let hostname = hostname.unwrap_or_else(|err| {
        warn!("hostname unavailable {:?}", err);
        "localhost".to_owned()
    });
    format!("{}:1", hostname)
}

impl AppState {
    pub async fn new(options: Options) -> Result<Arc<AppState>, Error> {
        let instance_id = instance_id(whoami::fallible::hostname());
        let conn = PgConnectOptions::from_str(&options.database_url)?.application_name(&instance_id);
        let pool = PgPoolOptions::new()
            .max_connections(32)
            .connect_with(conn)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let stores = Stores::postgres(pool);
        let fortunes = HttpFortuneService::new(
            options.fortune_service.url.clone(),
            options.fortune_service.timeout,
        );
        Ok(Arc::new(Self::from_parts(
            instance_id,
            options,
            stores,
            Arc::new(SexagenaryCalculator),
            Arc::new(fortunes),
        )))
    }

    pub fn from_parts(
        instance_id: String,
        options: Options,
        stores: Stores,
        calculator: Arc<dyn PillarCalculator>,
        fortunes: Arc<dyn FortuneService>,
    ) -> AppState {
        let calendar = CalendarGenerator::new(
            stores.runs.clone(),
            stores.calendar.clone(),
            calculator,
            options.tz,
        );
        let fortune = FortuneRefreshJob::new(
            stores.runs.clone(),
            stores.users.clone(),
            fortunes,
            options.tz,
        );
        let launcher = JobLauncher::new(
            Arc::new(calendar),
            Arc::new(fortune),
            options.fortune.page_size,
            options.fortune.max_concurrent,
        );
        AppState {
            instance_id,
            options,
            stores,
            launcher,
            shutdown_token: CancellationToken::new(),
        }
    }
}
