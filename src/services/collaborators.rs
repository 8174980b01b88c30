use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{Error, Pillar, UserId};

/// Astrological calculation engine: turns a calendar day into its day pillar.
pub trait PillarCalculator: Send + Sync {
    fn compute_pillar(&self, date: NaiveDate) -> Result<Pillar, Error>;
}

/// Fortune computation service. Idempotent per `(user_id, date)` unless
/// `force_update` is set.
#[async_trait]
pub trait FortuneService: Send + Sync {
    async fn generate_fortune(
        &self,
        user_id: UserId,
        date: NaiveDate,
        force_update: bool,
    ) -> Result<(), Error>;
}
