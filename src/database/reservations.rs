//! Time-limited stock holds.
//!
//! Available stock is never stored: it is `stock_quantity` minus the ACTIVE holds,
//! computed under the product row locks inside the transaction that inserts new
//! holds. Only [`consume_reservation`] ever lowers `stock_quantity` itself.

use std::collections::HashMap;

use bigdecimal::{BigDecimal, Signed};
use chrono::{Duration, NaiveDateTime};
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::models::{
    HoldStatus, LineItemSnapshot, NewOrder, NewReservationHold, OrderStatus, Product, ReservationHold,
};
use crate::database::{self, idgen, stock};
use crate::errors::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemRequest {
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub tenant_id: String,
    pub items: Vec<LineItemRequest>,
    #[serde(default)]
    pub delivery_fee: BigDecimal,
    pub customer: CustomerContact,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedReservation {
    pub order_id: i64,
    pub order_reference: String,
    pub reservation_ids: Vec<i64>,
    pub total_amount: BigDecimal,
    pub expires_at: NaiveDateTime,
}

fn validate(req: &CheckoutRequest) -> Result<(), EngineError> {
    if req.tenant_id.trim().is_empty() {
        return Err(EngineError::Validation("tenant_id is empty".into()));
    }
    if req.items.is_empty() {
        return Err(EngineError::Validation("items is empty".into()));
    }
    if let Some(item) = req.items.iter().find(|item| item.quantity <= 0) {
        return Err(EngineError::Validation(format!(
            "quantity for product {} must be positive",
            item.product_id
        )));
    }
    if req.delivery_fee.is_negative() {
        return Err(EngineError::Validation("delivery_fee is negative".into()));
    }
    if req.customer.name.trim().is_empty() {
        return Err(EngineError::Validation("customer name is empty".into()));
    }
    if req.customer.phone.trim().is_empty() {
        return Err(EngineError::Validation("customer phone is empty".into()));
    }
    Ok(())
}

fn hold_duration(conn: &mut PgConnection, req_tenant_id: &str, default_hold: Duration) -> Result<Duration, EngineError> {
    use crate::schema::tenant_settings::dsl::*;
    let minutes = tenant_settings
        .filter(tenant_id.eq(req_tenant_id))
        .select(hold_duration_minutes)
        .first::<Option<i32>>(conn)
        .optional()?
        .flatten();
    Ok(minutes.map(|m| Duration::minutes(m as i64)).unwrap_or(default_hold))
}

/// Places an all-or-nothing hold on every line item and opens a
/// `PENDING_PAYMENT` order for them.
pub fn create_reservation(
    conn: &mut PgConnection,
    req: &CheckoutRequest,
    default_hold: Duration,
) -> Result<CreatedReservation, EngineError> {
    validate(req)?;

    conn.transaction::<_, EngineError, _>(|conn| {
        let hold = hold_duration(conn, &req.tenant_id, default_hold)?;

        let product_ids: Vec<i64> = req.items.iter().map(|item| item.product_id).collect();
        let locked: HashMap<i64, Product> = stock::lock_products(conn, &req.tenant_id, &product_ids)?
            .into_iter()
            .map(|p| (p.product_id, p))
            .collect();

        let mut requested: HashMap<i64, i64> = HashMap::new();
        for item in &req.items {
            *requested.entry(item.product_id).or_default() += item.quantity as i64;
        }

        // first failing line item, in request order, decides the error
        let mut available: HashMap<i64, i64> = HashMap::new();
        for item in &req.items {
            let free = match available.get(&item.product_id) {
                Some(free) => *free,
                None => {
                    let product = &locked[&item.product_id];
                    let free = product.stock_quantity as i64 - stock::active_reserved(conn, item.product_id)?;
                    available.insert(item.product_id, free);
                    free
                }
            };
            let wanted = requested[&item.product_id];
            if wanted > free {
                info!(
                    tenant_id = req.tenant_id.as_str(),
                    product_id = item.product_id,
                    requested = wanted,
                    available = free,
                    "insufficient stock"
                );
                return Err(EngineError::InsufficientStock {
                    product_id: item.product_id,
                    requested: wanted,
                    available: free.max(0),
                });
            }
        }

        let snapshot: Vec<LineItemSnapshot> = req
            .items
            .iter()
            .map(|item| {
                let product = &locked[&item.product_id];
                LineItemSnapshot {
                    product_id: item.product_id,
                    name: product.name.clone(),
                    quantity: item.quantity,
                    unit_price: product.price.clone(),
                }
            })
            .collect();
        let subtotal = snapshot
            .iter()
            .fold(BigDecimal::from(0), |acc, item| acc + &item.unit_price * BigDecimal::from(item.quantity));
        let total_amount = &subtotal + &req.delivery_fee;

        let now = database::now();
        let req_expires_at = now + hold;
        let new_order_id = idgen::next();
        let reference = idgen::order_reference(new_order_id, now);
        let line_items = serde_json::to_value(&snapshot)
            .map_err(|e| EngineError::Database(diesel::result::Error::SerializationError(Box::new(e))))?;

        let new_order = NewOrder {
            order_id: new_order_id,
            tenant_id: req.tenant_id.clone(),
            order_reference: reference.clone(),
            line_items,
            subtotal,
            delivery_fee: req.delivery_fee.clone(),
            total_amount: total_amount.clone(),
            customer_name: req.customer.name.clone(),
            customer_phone: req.customer.phone.clone(),
            customer_email: req.customer.email.clone(),
            status: OrderStatus::PendingPayment.as_str().to_string(),
            created_at: now,
            updated_at: now,
            expires_at: req_expires_at,
        };
        diesel::insert_into(crate::schema::orders::table)
            .values(&new_order)
            .execute(conn)?;

        let holds: Vec<NewReservationHold> = req
            .items
            .iter()
            .map(|item| NewReservationHold {
                reservation_id: idgen::next(),
                order_id: new_order_id,
                tenant_id: req.tenant_id.clone(),
                product_id: item.product_id,
                quantity: item.quantity,
                status: HoldStatus::Active.as_str().to_string(),
                created_at: now,
                expires_at: req_expires_at,
            })
            .collect();
        diesel::insert_into(crate::schema::reservation_holds::table)
            .values(&holds)
            .execute(conn)?;

        info!(
            tenant_id = req.tenant_id.as_str(),
            order_id = new_order_id,
            order_reference = reference.as_str(),
            items = holds.len(),
            "stock reserved"
        );

        Ok(CreatedReservation {
            order_id: new_order_id,
            order_reference: reference,
            reservation_ids: holds.iter().map(|h| h.reservation_id).collect(),
            total_amount,
            expires_at: req_expires_at,
        })
    })
}

/// Releases every ACTIVE hold of the order. Holds already RELEASED or CONSUMED
/// are left alone, so calling this twice is harmless. Returns the number of
/// holds released.
pub fn release_reservation(conn: &mut PgConnection, req_order_id: i64) -> Result<usize, EngineError> {
    use crate::schema::reservation_holds::dsl::*;
    let released = diesel::update(
        reservation_holds
            .filter(order_id.eq(req_order_id))
            .filter(status.eq(HoldStatus::Active.as_str())),
    )
    .set(status.eq(HoldStatus::Released.as_str()))
    .execute(conn)?;
    if released > 0 {
        info!(order_id = req_order_id, released, "reservation released");
    }
    Ok(released)
}

/// Turns the order's holds into a permanent stock decrement.
///
/// Fails with [`EngineError::ReservationExpired`] if any hold was already
/// released; nothing is written in that case.
pub fn consume_reservation(conn: &mut PgConnection, req_order_id: i64) -> Result<(), EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let holds = {
            use crate::schema::reservation_holds::dsl::*;
            reservation_holds
                .filter(order_id.eq(req_order_id))
                .order(product_id.asc())
                .for_update()
                .load::<ReservationHold>(conn)?
        };
        if holds.is_empty() {
            return Err(EngineError::NotFound(format!("holds for order {req_order_id}")));
        }

        let mut active = Vec::with_capacity(holds.len());
        for hold in holds {
            match hold.status()? {
                HoldStatus::Released => {
                    warn!(order_id = req_order_id, reservation_id = hold.reservation_id, "hold already released");
                    return Err(EngineError::ReservationExpired(req_order_id));
                }
                HoldStatus::Consumed => {}
                HoldStatus::Active => active.push(hold),
            }
        }
        let Some(first) = active.first() else {
            return Ok(());
        };

        let product_ids: Vec<i64> = active.iter().map(|h| h.product_id).collect();
        stock::lock_products(conn, &first.tenant_id, &product_ids)?;

        for hold in &active {
            stock::decrement_stock(conn, hold.product_id, hold.quantity)?;
            use crate::schema::reservation_holds::dsl::*;
            diesel::update(reservation_holds.filter(reservation_id.eq(hold.reservation_id)))
                .set(status.eq(HoldStatus::Consumed.as_str()))
                .execute(conn)?;
        }
        info!(order_id = req_order_id, holds = active.len(), "reservation consumed");
        Ok(())
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;

    pub const TEST_SECRET: &str = "test-webhook-secret";

    pub fn seed_tenant(conn: &mut PgConnection, hold_minutes: Option<i32>) -> Result<String, EngineError> {
        use crate::schema::tenant_settings::dsl::*;
        let id = format!("tenant-{}", idgen::next());
        diesel::insert_into(tenant_settings)
            .values((
                tenant_id.eq(&id),
                webhook_secret.eq(TEST_SECRET),
                hold_duration_minutes.eq(hold_minutes),
            ))
            .execute(conn)?;
        Ok(id)
    }

    pub fn seed_product(conn: &mut PgConnection, tenant: &str, quantity: i32, unit_price: &str) -> Result<i64, EngineError> {
        use crate::schema::products::dsl::*;
        use std::str::FromStr;
        let id = idgen::next();
        diesel::insert_into(products)
            .values((
                product_id.eq(id),
                tenant_id.eq(tenant),
                name.eq(format!("product {id}")),
                price.eq(BigDecimal::from_str(unit_price).expect("bad test price")),
                stock_quantity.eq(quantity),
            ))
            .execute(conn)?;
        Ok(id)
    }

    pub fn checkout_request(tenant: &str, items: &[(i64, i32)]) -> CheckoutRequest {
        CheckoutRequest {
            tenant_id: tenant.to_string(),
            items: items
                .iter()
                .map(|(product_id, quantity)| LineItemRequest {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .collect(),
            delivery_fee: BigDecimal::from(5),
            customer: CustomerContact {
                name: "Guest".into(),
                phone: "+620000000".into(),
                email: None,
            },
        }
    }

    pub fn checkout(conn: &mut PgConnection, tenant: &str, items: &[(i64, i32)]) -> Result<CreatedReservation, EngineError> {
        create_reservation(conn, &checkout_request(tenant, items), Duration::minutes(15))
    }

    pub fn stock_of(conn: &mut PgConnection, req_product_id: i64) -> Result<i32, EngineError> {
        use crate::schema::products::dsl::*;
        Ok(products
            .filter(product_id.eq(req_product_id))
            .select(stock_quantity)
            .first::<i32>(conn)?)
    }

    // removes everything a committed (non test_transaction) test created for a tenant
    pub fn purge_tenant(conn: &mut PgConnection, tenant: &str) -> Result<(), EngineError> {
        use crate::schema;
        diesel::delete(schema::payment_transactions::table.filter(schema::payment_transactions::tenant_id.eq(tenant)))
            .execute(conn)?;
        diesel::delete(schema::reservation_holds::table.filter(schema::reservation_holds::tenant_id.eq(tenant)))
            .execute(conn)?;
        diesel::delete(schema::orders::table.filter(schema::orders::tenant_id.eq(tenant))).execute(conn)?;
        diesel::delete(schema::products::table.filter(schema::products::tenant_id.eq(tenant))).execute(conn)?;
        diesel::delete(schema::tenant_settings::table.filter(schema::tenant_settings::tenant_id.eq(tenant)))
            .execute(conn)?;
        Ok(())
    }
}
