pub use calendar::CalendarEntry;
pub use calendar::CalendarEntryCreate;
pub use calendar::Pillar;
pub use error::Error;
pub use fortunerun::FortuneProgress;
pub use fortunerun::FortuneRunCreate;
pub use fortunerun::FortuneRunRow;
pub use jobretry::JobRetry;
pub use jobrun::ItemError;
pub use jobrun::JobRunCreate;
pub use jobrun::JobRunRow;
pub use jobrun::JobType;
pub use jobrun::RunProgress;
pub use jobrun::RunStatus;
pub use jobrun::ScheduledBy;
pub use schedule::JobSchedule;
pub use schedule::DEFAULT_DAILY_TIME;
pub use state::AppState;
pub use state::Options;

pub type UserId = i64;

mod calendar;
mod error;
mod fortunerun;
mod jobretry;
mod jobrun;
mod schedule;
pub mod state;
