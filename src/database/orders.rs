//! Order lifecycle.
//!
//! `PENDING_PAYMENT` is the only state with more than one way out. Every write
//! is a compare-and-set on the current status, so when the sweeper and a late
//! payment race on the same order the first commit wins and the other side
//! sees [`Transition::Stale`].

use chrono::NaiveDateTime;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{info, warn};

use crate::database::models::{Order, OrderStatus};
use crate::database::{self, reservations};
use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The order was not in the expected source state; nothing was written.
    Stale { current: OrderStatus },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

pub fn is_terminal(state: OrderStatus) -> bool {
    matches!(
        state,
        OrderStatus::Completed | OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Failed
    )
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (PendingPayment, Paid)
            | (PendingPayment, Expired)
            | (PendingPayment, Cancelled)
            | (PendingPayment, Failed)
            | (Paid, Completed)
    )
}

/// Moves an order from `from` to `to` if and only if it is currently in `from`.
pub fn transition(
    conn: &mut PgConnection,
    req_order_id: i64,
    from: OrderStatus,
    to: OrderStatus,
    now: NaiveDateTime,
) -> Result<Transition, EngineError> {
    if !can_transition(from, to) {
        warn!(order_id = req_order_id, %from, %to, "illegal order transition requested");
        return Ok(Transition::Stale { current: current_status(conn, req_order_id)? });
    }

    let updated = {
        use crate::schema::orders::dsl::*;
        let target = orders
            .filter(order_id.eq(req_order_id))
            .filter(status.eq(from.as_str()));
        if to == OrderStatus::Paid {
            diesel::update(target)
                .set((status.eq(to.as_str()), updated_at.eq(now), paid_at.eq(Some(now))))
                .execute(conn)?
        } else {
            diesel::update(target)
                .set((status.eq(to.as_str()), updated_at.eq(now)))
                .execute(conn)?
        }
    };

    if updated == 0 {
        let current = current_status(conn, req_order_id)?;
        info!(order_id = req_order_id, %from, %to, %current, "order transition skipped");
        return Ok(Transition::Stale { current });
    }
    info!(order_id = req_order_id, %from, %to, "order transitioned");
    Ok(Transition::Applied)
}

fn current_status(conn: &mut PgConnection, req_order_id: i64) -> Result<OrderStatus, EngineError> {
    find_order(conn, req_order_id)?
        .ok_or_else(|| EngineError::NotFound(format!("order {req_order_id}")))?
        .status()
}

pub fn find_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Option<Order>, EngineError> {
    use crate::schema::orders::dsl::*;
    Ok(orders
        .filter(order_id.eq(req_order_id))
        .first::<Order>(conn)
        .optional()?)
}

pub fn lock_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Option<Order>, EngineError> {
    use crate::schema::orders::dsl::*;
    Ok(orders
        .filter(order_id.eq(req_order_id))
        .for_update()
        .first::<Order>(conn)
        .optional()?)
}

pub fn lock_order_by_reference(
    conn: &mut PgConnection,
    req_tenant_id: &str,
    reference: &str,
) -> Result<Option<Order>, EngineError> {
    use crate::schema::orders::dsl::*;
    Ok(orders
        .filter(tenant_id.eq(req_tenant_id))
        .filter(order_reference.eq(reference))
        .for_update()
        .first::<Order>(conn)
        .optional()?)
}

/// Marks an order for operator attention. Not part of the lifecycle: status is
/// left untouched and the latest reason wins.
pub fn flag_for_review(
    conn: &mut PgConnection,
    req_order_id: i64,
    reason: &str,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    use crate::schema::orders::dsl::*;
    diesel::update(orders.filter(order_id.eq(req_order_id)))
        .set((
            needs_review.eq(true),
            review_reason.eq(Some(reason)),
            updated_at.eq(now),
        ))
        .execute(conn)?;
    warn!(order_id = req_order_id, reason, "order flagged for manual review");
    Ok(())
}

/// Abandons a pending checkout and returns its stock.
pub fn cancel_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Transition, EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let order = lock_order(conn, req_order_id)?
            .ok_or_else(|| EngineError::NotFound(format!("order {req_order_id}")))?;
        let now = database::now();
        let res = transition(conn, order.order_id, OrderStatus::PendingPayment, OrderStatus::Cancelled, now)?;
        if res.is_applied() {
            reservations::release_reservation(conn, order.order_id)?;
        }
        Ok(res)
    })
}

/// Fulfillment hand-off, issued by the admin side once an order is paid.
pub fn complete_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Transition, EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let order = lock_order(conn, req_order_id)?
            .ok_or_else(|| EngineError::NotFound(format!("order {req_order_id}")))?;
        let now = database::now();
        transition(conn, order.order_id, OrderStatus::Paid, OrderStatus::Completed, now)
    })
}
