use crate::database::models::{Order, PaymentTransaction, ReservationHold};
use crate::database::stock;
use crate::errors::EngineError;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

#[derive(Debug)]
pub struct OrderView {
    pub order: Order,
    pub holds: Vec<ReservationHold>,
    pub payments: Vec<PaymentTransaction>,
}

#[derive(PartialEq, Debug)]
pub struct Availability {
    pub product_id: i64,
    pub stock_quantity: i64,
    pub reserved: i64,
    pub available: i64,
}

pub fn load_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Option<OrderView>, EngineError> {
    // wrap in transaction
    conn.transaction::<_, EngineError, _>(|conn| {
        let order = {
            use crate::schema::orders::dsl::*;
            orders
                .filter(order_id.eq(req_order_id))
                .first::<Order>(conn)
                .optional()?
        };
        let Some(order) = order else {
            return Ok(None);
        };
        let holds = {
            use crate::schema::reservation_holds::dsl::*;
            reservation_holds
                .filter(order_id.eq(req_order_id))
                .order(reservation_id.asc())
                .load::<ReservationHold>(conn)?
        };
        let payments = {
            use crate::schema::payment_transactions::dsl::*;
            payment_transactions
                .filter(order_id.eq(req_order_id))
                .order(received_at.asc())
                .load::<PaymentTransaction>(conn)?
        };
        Ok(Some(OrderView { order, holds, payments }))
    })
}

pub fn load_availability(
    conn: &mut PgConnection,
    req_tenant_id: &str,
    req_product_id: i64,
) -> Result<Option<Availability>, EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let quantity = {
            use crate::schema::products::dsl::*;
            products
                .filter(product_id.eq(req_product_id))
                .filter(tenant_id.eq(req_tenant_id))
                .select(stock_quantity)
                .first::<i32>(conn)
                .optional()?
        };
        let Some(quantity) = quantity else {
            return Ok(None);
        };
        let reserved = stock::active_reserved(conn, req_product_id)?;
        // subtract reserved from stock
        Ok(Some(Availability {
            product_id: req_product_id,
            stock_quantity: quantity as i64,
            reserved,
            available: quantity as i64 - reserved,
        }))
    })
}

/// Orders flagged for an operator, newest first.
pub fn review_queue(conn: &mut PgConnection, req_tenant_id: &str, limit: i64) -> Result<Vec<Order>, EngineError> {
    use crate::schema::orders::dsl::*;
    Ok(orders
        .filter(tenant_id.eq(req_tenant_id))
        .filter(needs_review.eq(true))
        .order(created_at.desc())
        .limit(limit)
        .load::<Order>(conn)?)
}
