pub mod connect;
pub mod expiry;
pub mod idgen;
pub mod models;
pub mod orders;
pub mod payments;
pub mod queries;
pub mod reservations;
pub mod stock;

use chrono::{NaiveDateTime, SubsecRound};
use tracing::warn;

use crate::errors::EngineError;

/// Current UTC time at the microsecond precision PostgreSQL stores.
pub fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc().trunc_subsecs(6)
}

pub const CONFLICT_ATTEMPTS: usize = 3;

/// Runs `op` again while it fails with a lock conflict, up to `attempts` times in total.
pub fn retry_on_conflict<T>(
    attempts: usize,
    mut op: impl FnMut() -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, "lock conflict, retrying");
                attempt += 1;
            }
            res => return res,
        }
    }
}
