mod calendargenerator;
mod collaborators;
mod fortuneclient;
mod fortunerefresh;
mod launcher;
mod pillar;
mod schedulerservice;

pub mod jobrunner;

#[cfg(test)]
pub mod testing;

pub use calendargenerator::{CalendarGenerator, DEFAULT_CALENDAR_DAYS, MAX_CALENDAR_DAYS};
pub use collaborators::{FortuneService, PillarCalculator};
pub use fortuneclient::HttpFortuneService;
pub use fortunerefresh::{FortuneRefreshJob, DEFAULT_MAX_CONCURRENT, DEFAULT_PAGE_SIZE};
pub use launcher::JobLauncher;
pub use pillar::SexagenaryCalculator;
pub use schedulerservice::Scheduler;
