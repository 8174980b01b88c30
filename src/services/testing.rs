//! Collaborator fakes shared by the service tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use hyper::StatusCode;
use tokio::sync::Mutex;

use super::{
    collaborators::{FortuneService, PillarCalculator},
    pillar::SexagenaryCalculator,
};
use crate::{
    db::{memory::MemoryStore, RunLogStore},
    models::{Error, Pillar, UserId},
};

pub struct FailingCalculator {
    fail_on: NaiveDate,
}

impl FailingCalculator {
    pub fn on(fail_on: NaiveDate) -> Self {
        Self { fail_on }
    }
}

impl PillarCalculator for FailingCalculator {
    fn compute_pillar(&self, date: NaiveDate) -> Result<Pillar, Error> {
        if date == self.fail_on {
            return Err(Error::PillarError(format!("no pillar for {date}")));
        }
        SexagenaryCalculator.compute_pillar(date)
    }
}

/// Records calls, fails for chosen users and tracks how many calls overlap.
#[derive(Default)]
pub struct RecordingFortunes {
    calls: Mutex<Vec<(UserId, NaiveDate, bool)>>,
    fail_for: HashSet<UserId>,
    panic_for: HashSet<UserId>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    observed: Option<(Arc<MemoryStore>, i64)>,
    observations: AtomicUsize,
    violations: AtomicUsize,
}

impl RecordingFortunes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.fail_for.extend(users);
        self
    }

    pub fn panicking_for(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.panic_for.extend(users);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Checks the counters of a fortune run on every call.
    pub fn observing(mut self, store: Arc<MemoryStore>, fortune_run_id: i64) -> Self {
        self.observed = Some((store, fortune_run_id));
        self
    }

    pub async fn calls(&self) -> Vec<(UserId, NaiveDate, bool)> {
        self.calls.lock().await.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn observations(&self) -> usize {
        self.observations.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    async fn observe(&self) {
        let Some((store, id)) = &self.observed else {
            return;
        };
        if let Ok(Some(row)) = store.get_fortune_run(*id).await {
            self.observations.fetch_add(1, Ordering::SeqCst);
            if row.success_count + row.failed_count > row.total_users {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl FortuneService for RecordingFortunes {
    async fn generate_fortune(
        &self,
        user_id: UserId,
        date: NaiveDate,
        force_update: bool,
    ) -> Result<(), Error> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.observe().await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().await.push((user_id, date, force_update));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.panic_for.contains(&user_id) {
            panic!("fortune engine crashed for user {user_id}");
        }
        if self.fail_for.contains(&user_id) {
            return Err(Error::FortuneServiceError(StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }
}
