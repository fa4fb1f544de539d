pub mod dip;
pub mod recurring;
pub mod yield_harvest;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Outcome;

/// Closed decision interface driven by the scheduler.
///
/// `should_execute` is a pure function of the strategy's own state and `now`,
/// apart from idempotent bookkeeping (refreshing a price window). `execute`
/// is only called after `should_execute` returned true on the same tick; the
/// scheduler guarantees single-flight, so no internal re-check is needed.
/// Unexpected faults surface as `Err`; expected terminal results are the
/// `Outcome` variants.
#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &'static str;
    async fn should_execute(&mut self, now: DateTime<Utc>) -> bool;
    async fn execute(&mut self, now: DateTime<Utc>) -> Result<Outcome>;
}
