use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chrono::NaiveDate;
use models::{AppState, Error, Options, ScheduledBy};
use opentelemetry::trace::TracerProvider as _;
use tokio::signal;
use tower_http::trace::TraceLayer;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod db;
mod flags;
mod handlers;
mod models;
mod services;

#[tokio::main]
async fn main() {
    let flags = flags::SajuBatch::from_env_or_exit();
    let options = Options::from_env().expect("Unable to read configuration");
    let _provider = init_tracing(options.trace_stdout);

    let res = match flags.subcommand {
        flags::SajuBatchCmd::Serve(cmd) => serve(options, cmd.port).await,
        flags::SajuBatchCmd::Calendar(cmd) => run_calendar(options, cmd.days).await,
        flags::SajuBatchCmd::Fortune(cmd) => run_fortune(options, cmd.date, cmd.force).await,
    };
    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }
}

/// The returned provider must outlive the process, tracers only keep a weak reference.
fn init_tracing(trace_stdout: bool) -> Option<opentelemetry_sdk::trace::TracerProvider> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "saju_batch=debug,tower_http=debug".into());
    let provider = trace_stdout.then(|| {
        opentelemetry_sdk::trace::TracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build()
    });
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("saju-batch")));

    tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(tracing_subscriber::fmt::layer())
        .init();
    provider
}

async fn serve(mut options: Options, port: Option<u16>) -> Result<(), Error> {
    if let Some(port) = port {
        options.http_port = port;
    }
    let state = AppState::new(options).await?;
    info!({ instance_id = state.instance_id }, "starting");
    let (http, _) = tokio::join!(start_http_server(&state), start_scheduler(&state));
    http?;
    info!("->> SHUTDOWN");
    Ok(())
}

async fn start_http_server(state: &Arc<AppState>) -> Result<(), Error> {
    let res = run_http_server(state).await;
    // the scheduler stops together with the server
    state.shutdown_token.cancel();
    res
}

async fn run_http_server(state: &Arc<AppState>) -> Result<(), Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.options.http_port));
    let app = Router::new()
        .merge(handlers::live::routes(Arc::clone(state)))
        .nest("/api/v1", handlers::jobs::routes(Arc::clone(state)))
        .nest("/api/v1", handlers::runs::routes(Arc::clone(state)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!({ addr = %addr }, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(state)))
        .await?;
    Ok(())
}

async fn start_scheduler(state: &Arc<AppState>) {
    let mut scheduler = services::Scheduler::from_state(state).await;
    let installed = scheduler.start();
    info!({ installed }, "scheduler started");
    state.shutdown_token.cancelled().await;
    scheduler.stop().await;
}

async fn run_calendar(options: Options, days: Option<u32>) -> Result<(), Error> {
    let days = days.unwrap_or(options.calendar.days);
    let state = AppState::new(options).await?;
    let summary = state
        .launcher
        .calendar()
        .generate(days, ScheduledBy::Admin(None))
        .await?;
    info!(
        { created = summary.created, skipped = summary.skipped, errors = summary.errors },
        "calendar done"
    );
    Ok(())
}

async fn run_fortune(options: Options, date: Option<String>, force: bool) -> Result<(), Error> {
    let target_date = date
        .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
        .transpose()
        .map_err(|_| Error::InvalidParams("date"))?;
    let state = AppState::new(options).await?;
    let launched = state
        .launcher
        .run_fortune_now(target_date, force, None)
        .await?;
    let summary = launched
        .handle
        .await
        .map_err(|err| Error::JobFailed(err.to_string()))?;
    info!(
        { run_id = launched.run_id, success = summary.success_count, failed = summary.failed_count },
        "{}", summary.message
    );
    if !summary.success {
        return Err(Error::JobFailed(summary.message));
    }
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    state.shutdown_token.cancel();
    warn!("signal received, starting graceful shutdown");
}
