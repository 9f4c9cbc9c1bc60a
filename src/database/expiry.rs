//! One sweep over orders whose hold window has elapsed.

use chrono::NaiveDateTime;
use diesel::{Connection, ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{error, info};

use crate::database::models::OrderStatus;
use crate::database::{orders, reservations};
use crate::errors::EngineError;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Expires up to `batch_size` pending orders with `expires_at < now`.
///
/// Candidate rows are claimed with `FOR UPDATE SKIP LOCKED`, so concurrent
/// sweepers (or a webhook holding the order lock) never process the same order
/// twice. Each order is expired and released inside its own savepoint.
pub fn expire_overdue(conn: &mut PgConnection, now: NaiveDateTime, batch_size: i64) -> Result<SweepReport, EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let claimed: Vec<i64> = {
            use crate::schema::orders::dsl::*;
            orders
                .filter(status.eq(OrderStatus::PendingPayment.as_str()))
                .filter(expires_at.lt(now))
                .order(expires_at.asc())
                .limit(batch_size)
                .select(order_id)
                .for_update()
                .skip_locked()
                .load::<i64>(conn)?
        };

        let mut report = SweepReport {
            claimed: claimed.len(),
            ..SweepReport::default()
        };
        for id in claimed {
            let res = conn.transaction::<_, EngineError, _>(|conn| {
                let res = orders::transition(conn, id, OrderStatus::PendingPayment, OrderStatus::Expired, now)?;
                if res.is_applied() {
                    reservations::release_reservation(conn, id)?;
                }
                Ok(res.is_applied())
            });
            match res {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(order_id = id, error = %e, "failed to expire order");
                    report.failed += 1;
                }
            }
        }
        if report.claimed > 0 {
            info!(claimed = report.claimed, expired = report.expired, failed = report.failed, "expiry sweep");
        }
        Ok(report)
    })
}
