//! Background expiry of abandoned checkouts.

use std::ops::DerefMut;
use std::time::Duration;

use actix_web::web;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::config::Settings;
use crate::database::connect::DbPool;
use crate::database::expiry::{self, SweepReport};
use crate::database::{self, CONFLICT_ATTEMPTS};
use crate::errors::EngineError;

pub struct Sweeper {
    pool: DbPool,
    interval: Duration,
    batch_size: i64,
}

impl Sweeper {
    pub fn new(pool: DbPool, settings: &Settings) -> Self {
        Self {
            pool,
            interval: Duration::from_secs(settings.sweep_interval_secs),
            batch_size: settings.sweep_batch_size,
        }
    }

    /// Runs until the actix system stops. A failed pass is logged and the
    /// next tick tries again.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), batch_size = self.batch_size, "expiry sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, EngineError> {
        let pool = self.pool.clone();
        let batch_size = self.batch_size;
        web::block(move || {
            let mut conn = pool.get()?;
            database::retry_on_conflict(CONFLICT_ATTEMPTS, || {
                expiry::expire_overdue(conn.deref_mut(), database::now(), batch_size)
            })
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect::testing::test_pool;
    use crate::database::models::OrderStatus;
    use crate::database::orders;
    use crate::database::reservations::testing::{checkout, purge_tenant, seed_product, seed_tenant};

    #[actix_web::test]
    async fn test_sweep_once_expires_committed_orders() {
        let Some(pool) = test_pool() else { return };
        let (tenant, order_id) = {
            let mut conn = pool.get().unwrap();
            let tenant = seed_tenant(&mut conn, Some(3)).unwrap();
            let product = seed_product(&mut conn, &tenant, 2, "4.00").unwrap();
            let created = checkout(&mut conn, &tenant, &[(product, 2)]).unwrap();
            // push the hold into the past
            {
                use crate::schema::orders::dsl::*;
                use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl};
                diesel::update(orders.filter(order_id.eq(created.order_id)))
                    .set(expires_at.eq(database::now() - chrono::Duration::minutes(1)))
                    .execute(&mut conn)
                    .unwrap();
            }
            (tenant, created.order_id)
        };

        let sweeper = Sweeper::new(
            pool.clone(),
            &Settings {
                sweep_batch_size: 1000,
                ..Settings::default()
            },
        );
        // other committed test orders may be swept by the same pass
        sweeper.sweep_once().await.unwrap();

        let mut conn = pool.get().unwrap();
        let order = orders::find_order(&mut conn, order_id).unwrap().unwrap();
        assert_eq!(order.status().unwrap(), OrderStatus::Expired);
        purge_tenant(&mut conn, &tenant).unwrap();
    }
}
